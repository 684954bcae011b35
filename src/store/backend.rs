//! Keyed byte-storage backends for session records.
//!
//! The store logic never talks to RocksDB or a map directly; it goes through
//! `SessionBackend` so the durable engine and the in-process fallback are
//! interchangeable and tests can inject failing implementations.

use dashmap::DashMap;
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{backend} backend unavailable: {detail}")]
    Unavailable {
        backend: &'static str,
        detail: String,
    },

    #[error("corrupted record: {0}")]
    Corrupted(String),

    #[error("failed to open durable store: {0}")]
    OpenFailed(String),
}

/// Synchronous keyed byte storage. Values are serialized session records.
pub trait SessionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, sorted by key.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}

/// In-process backend: a concurrency-safe keyed map owned by its store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: DashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }
}

impl SessionBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.map.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut rows: Vec<(String, Vec<u8>)> = self
            .map
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }
}

/// Durable backend over RocksDB.
#[derive(Clone)]
pub struct RocksBackend {
    db: Arc<DB>,
}

impl RocksBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl SessionBackend for RocksBackend {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.db
            .get(key.as_bytes())
            .map_err(|e| StoreError::Unavailable {
                backend: "rocksdb",
                detail: e.to_string(),
            })
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .put(key.as_bytes(), value)
            .map_err(|e| StoreError::Unavailable {
                backend: "rocksdb",
                detail: e.to_string(),
            })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.db
            .delete(key.as_bytes())
            .map_err(|e| StoreError::Unavailable {
                backend: "rocksdb",
                detail: e.to_string(),
            })
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Unavailable {
                backend: "rocksdb",
                detail: e.to_string(),
            })?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Corrupted(format!("non-utf8 key: {}", e)))?;
            rows.push((key, value.to_vec()));
        }

        Ok(rows)
    }
}
