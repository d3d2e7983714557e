//! Connection tuning applied to every SQLite connection the stores open

use rusqlite::Connection;
use std::time::Duration;

/// Apply WAL journaling and the pragmas the stores rely on.
///
/// In-memory databases report `memory` for the journal mode; that is fine.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::debug!("SQLite journal_mode={}", mode);

    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(5))?;

    Ok(())
}
