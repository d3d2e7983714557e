//! Durable key-value storage for the offline vote queue
//!
//! Values are JSON strings. The file-backed store writes each key to
//! `<dir>/<key>.json` through a temp file and rename, so a crash mid-write
//! leaves the previous value intact. File I/O runs on the blocking pool.

use {
    async_trait::async_trait,
    std::{
        collections::HashMap,
        fs,
        io::Write,
        path::{Path, PathBuf},
        sync::{Arc, Mutex, PoisonError},
    },
    tempfile::NamedTempFile,
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt value under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Client setup error: {0}")]
    Client(String),
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        QueueError::Storage(err.to_string())
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>, QueueError>;

    async fn save(&self, key: &str, value: &str) -> Result<(), QueueError>;

    /// Remove every key
    async fn clear(&self) -> Result<(), QueueError>;
}

#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn load(&self, key: &str) -> Result<Option<String>, QueueError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), QueueError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
        Ok(())
    }
}

pub struct FileKeyValueStore {
    dir: Arc<PathBuf>,
}

impl FileKeyValueStore {
    /// Use `dir` for storage, creating it if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, QueueError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        log::info!("📂 Offline vote storage: {}", dir.display());
        Ok(Self { dir: Arc::new(dir) })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

async fn run_blocking<T, F>(op: &str, f: F) -> Result<T, QueueError>
where
    F: FnOnce() -> Result<T, QueueError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| QueueError::Storage(format!("{op} task failed: {err}")))?
}

fn read_value(path: &Path) -> Result<Option<String>, QueueError> {
    match fs::read_to_string(path) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_value(dir: &Path, path: &Path, value: &str) -> Result<(), QueueError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(value.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| QueueError::Storage(e.to_string()))?;
    Ok(())
}

fn remove_values(dir: &Path) -> Result<(), QueueError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn load(&self, key: &str) -> Result<Option<String>, QueueError> {
        let path = self.path_for(key);
        run_blocking("load", move || read_value(&path)).await
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), QueueError> {
        let dir = Arc::clone(&self.dir);
        let path = self.path_for(key);
        let value = value.to_string();
        run_blocking("save", move || write_value(&dir, &path, &value)).await
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let dir = Arc::clone(&self.dir);
        run_blocking("clear", move || remove_values(&dir)).await
    }
}
