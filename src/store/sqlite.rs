//! SQLite implementation of the item, ledger and aggregate stores
//!
//! One connection behind `Arc<Mutex<_>>`, shared by all three traits.
//! Aggregate increments are single `INSERT ... ON CONFLICT DO UPDATE ...
//! RETURNING` statements, so concurrent votes on the same record never
//! lose an update and the win rate always matches the counters it was
//! computed from.

use super::{AggregateRecord, AggregateStore, AppendOutcome, ItemStore, SubjectType, VoteLedger};
use crate::aggregation::bucket::Period;
use crate::error::StoreError;
use crate::sqlite_pragma::apply_optimized_pragmas;
use crate::types::{Item, ItemStatus, PromotionWeight, VoteEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Schema files, applied in order. Every statement uses IF NOT EXISTS.
const SCHEMA: &[(&str, &str)] = &[
    ("01_items.sql", include_str!("../../sql/01_items.sql")),
    ("02_votes.sql", include_str!("../../sql/02_votes.sql")),
    ("03_aggregates.sql", include_str!("../../sql/03_aggregates.sql")),
];

const ITEM_COLUMNS: &str = "i.id, i.status, i.promotion_weight, i.vote_count, i.win_count, \
     i.title, i.url, i.created_at, \
     (SELECT group_concat(c.category, char(31)) FROM item_categories c WHERE c.item_id = i.id)";

const CATEGORY_SEPARATOR: char = '\u{1f}';

const RECORD_COLUMNS: &str = "subject_type, subject_id, period, period_bucket, \
     vote_count, win_count, win_rate, last_updated";

/// Idempotent schema loader
pub fn run_schema_migrations(conn: &Connection) -> Result<(), StoreError> {
    log::info!("🔧 Running schema migrations");

    for (name, sql) in SCHEMA {
        log::debug!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }

    log::info!("✅ All schema migrations completed successfully");
    Ok(())
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file, tune it and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = db_path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Database(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        log::info!("📂 Opened ranking database: {}", path.display());
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, StoreError> {
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }

    fn increment(
        &self,
        subject_type: SubjectType,
        period: Period,
        bucket: &str,
        subject_id: &str,
        wins: i64,
        at: DateTime<Utc>,
    ) -> Result<AggregateRecord, StoreError> {
        let conn = self.conn()?;

        // SET expressions see the pre-update row, hence the explicit +1
        let sql = format!(
            r#"
            INSERT INTO aggregates (
                subject_type, period, period_bucket, subject_id,
                vote_count, win_count, win_rate, last_updated
            ) VALUES (?1, ?2, ?3, ?4, 1, ?5, CAST(?5 AS REAL), ?6)
            ON CONFLICT(subject_type, period, period_bucket, subject_id) DO UPDATE SET
                vote_count = aggregates.vote_count + 1,
                win_count = aggregates.win_count + excluded.win_count,
                win_rate = CAST(aggregates.win_count + excluded.win_count AS REAL)
                           / (aggregates.vote_count + 1),
                last_updated = excluded.last_updated
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let record = conn.query_row(
            &sql,
            params![
                subject_type.as_str(),
                period.as_str(),
                bucket,
                subject_id,
                wins,
                at.timestamp_millis(),
            ],
            record_from_row,
        )?;

        Ok(record)
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    let status: String = row.get(1)?;
    let status = ItemStatus::from_str(&status)
        .ok_or_else(|| conversion_error(1, Type::Text, format!("unknown item status {status}")))?;

    let weight = PromotionWeight::new(row.get(2)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Integer, Box::new(e)))?;

    let categories: Option<String> = row.get(8)?;

    Ok(Item {
        id: row.get(0)?,
        status,
        categories: categories
            .map(|joined| {
                joined
                    .split(CATEGORY_SEPARATOR)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        promotion_weight: weight,
        vote_count: row.get::<_, i64>(3)? as u64,
        win_count: row.get::<_, i64>(4)? as u64,
        title: row.get(5)?,
        url: row.get(6)?,
        created_at: millis_to_utc(row.get(7)?),
    })
}

fn vote_from_row(row: &Row<'_>) -> rusqlite::Result<VoteEvent> {
    Ok(VoteEvent {
        vote_id: row.get(0)?,
        voter_id: row.get(1)?,
        winner_id: row.get(2)?,
        loser_id: row.get(3)?,
        category: row.get(4)?,
        session_id: row.get(5)?,
        timestamp: millis_to_utc(row.get(6)?),
        idempotency_key: row.get(7)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AggregateRecord> {
    let subject_type: String = row.get(0)?;
    let subject_type = SubjectType::from_str(&subject_type).ok_or_else(|| {
        conversion_error(0, Type::Text, format!("unknown subject type {subject_type}"))
    })?;

    let period: String = row.get(2)?;
    let period = Period::from_str(&period)
        .ok_or_else(|| conversion_error(2, Type::Text, format!("unknown period {period}")))?;

    Ok(AggregateRecord {
        subject_type,
        subject_id: row.get(1)?,
        period,
        period_bucket: row.get(3)?,
        vote_count: row.get::<_, i64>(4)? as u64,
        win_count: row.get::<_, i64>(5)? as u64,
        win_rate: row.get(6)?,
        last_updated: millis_to_utc(row.get(7)?),
    })
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn list_approved(&self, category: Option<&str>) -> Result<Vec<Item>, StoreError> {
        let conn = self.conn()?;

        let items = match category {
            Some(category) => {
                let sql = format!(
                    "SELECT {ITEM_COLUMNS} FROM items i \
                     JOIN item_categories ic ON ic.item_id = i.id \
                     WHERE i.status = 'approved' AND ic.category = ?1 \
                     ORDER BY i.id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![category], item_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {ITEM_COLUMNS} FROM items i WHERE i.status = 'approved' ORDER BY i.id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], item_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(items)
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<Item>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.id = ?1");

        let item = conn
            .query_row(&sql, params![item_id], item_from_row)
            .optional()?;

        Ok(item)
    }

    async fn get_items(&self, item_ids: &[String]) -> Result<Vec<Item>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.id = ?1");
        let mut stmt = conn.prepare(&sql)?;

        let mut items = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            if let Some(item) = stmt
                .query_row(params![item_id], item_from_row)
                .optional()?
            {
                items.push(item);
            }
        }

        Ok(items)
    }

    async fn upsert_item(&self, item: &Item) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO items (id, status, promotion_weight, title, url, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                promotion_weight = excluded.promotion_weight,
                title = excluded.title,
                url = excluded.url
            "#,
            params![
                item.id,
                item.status.as_str(),
                i64::from(item.promotion_weight),
                item.title,
                item.url,
                item.created_at.timestamp_millis(),
            ],
        )?;

        tx.execute(
            "DELETE FROM item_categories WHERE item_id = ?1",
            params![item.id],
        )?;
        for category in &item.categories {
            tx.execute(
                "INSERT INTO item_categories (item_id, category) VALUES (?1, ?2)",
                params![item.id, category],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn set_promotion_weight(
        &self,
        item_id: &str,
        weight: PromotionWeight,
        promoted_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;

        let changed = conn.execute(
            "UPDATE items SET promotion_weight = ?2, promoted_at = ?3 WHERE id = ?1",
            params![item_id, i64::from(weight), promoted_at.timestamp_millis()],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!("item {item_id}")));
        }
        Ok(())
    }

    async fn record_outcome(&self, winner_id: &str, loser_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let winner = tx.execute(
            "UPDATE items SET vote_count = vote_count + 1, win_count = win_count + 1 WHERE id = ?1",
            params![winner_id],
        )?;
        let loser = tx.execute(
            "UPDATE items SET vote_count = vote_count + 1 WHERE id = ?1",
            params![loser_id],
        )?;

        if winner == 0 {
            return Err(StoreError::NotFound(format!("item {winner_id}")));
        }
        if loser == 0 {
            return Err(StoreError::NotFound(format!("item {loser_id}")));
        }

        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl VoteLedger for SqliteStore {
    async fn append(&self, event: &VoteEvent) -> Result<AppendOutcome, StoreError> {
        let conn = self.conn()?;

        let inserted = conn.execute(
            r#"
            INSERT INTO votes (
                vote_id, voter_id, winner_id, loser_id, category, session_id, timestamp,
                idempotency_key
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT DO NOTHING
            "#,
            params![
                event.vote_id,
                event.voter_id,
                event.winner_id,
                event.loser_id,
                event.category,
                event.session_id,
                event.timestamp.timestamp_millis(),
                event.idempotency_key,
            ],
        )?;

        if inserted > 0 {
            return Ok(AppendOutcome::Appended);
        }

        let existing: Option<String> = conn
            .query_row(
                "SELECT vote_id FROM votes WHERE voter_id = ?1 AND idempotency_key = ?2",
                params![event.voter_id, event.idempotency_key],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(vote_id) => Ok(AppendOutcome::Duplicate { vote_id }),
            None => Err(StoreError::Database(format!(
                "vote {} already in ledger",
                event.vote_id
            ))),
        }
    }

    async fn recent_votes_for_voter(
        &self,
        voter_id: &str,
        limit: usize,
    ) -> Result<Vec<VoteEvent>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT vote_id, voter_id, winner_id, loser_id, category, session_id, timestamp,
                   idempotency_key
            FROM votes
            WHERE voter_id = ?1
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?2
            "#,
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![voter_id, limit], vote_from_row)?;
        let votes = rows.collect::<Result<Vec<_>, _>>()?;

        Ok(votes)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM votes", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[async_trait]
impl AggregateStore for SqliteStore {
    async fn increment_item(
        &self,
        period: Period,
        bucket: &str,
        item_id: &str,
        won: bool,
        at: DateTime<Utc>,
    ) -> Result<AggregateRecord, StoreError> {
        self.increment(SubjectType::Item, period, bucket, item_id, won as i64, at)
    }

    async fn increment_category(
        &self,
        period: Period,
        bucket: &str,
        category: &str,
        at: DateTime<Utc>,
    ) -> Result<AggregateRecord, StoreError> {
        self.increment(SubjectType::Category, period, bucket, category, 0, at)
    }

    async fn get_record(
        &self,
        subject_type: SubjectType,
        period: Period,
        bucket: &str,
        subject_id: &str,
    ) -> Result<Option<AggregateRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM aggregates \
             WHERE subject_type = ?1 AND period = ?2 AND period_bucket = ?3 AND subject_id = ?4"
        );

        let record = conn
            .query_row(
                &sql,
                params![subject_type.as_str(), period.as_str(), bucket, subject_id],
                record_from_row,
            )
            .optional()?;

        Ok(record)
    }

    async fn item_records(
        &self,
        period: Period,
        bucket: &str,
    ) -> Result<Vec<AggregateRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM aggregates \
             WHERE subject_type = 'item' AND period = ?1 AND period_bucket = ?2"
        );
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt.query_map(params![period.as_str(), bucket], record_from_row)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }
}
