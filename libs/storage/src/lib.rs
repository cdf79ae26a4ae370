//! Opaque key/blob storage used by a Raft node to persist its hard state.
//!
//! A [`Storage`] implementation only needs to round-trip bytes: the Raft
//! core never inspects the encoding, it just asks for the three well-known
//! keys (`"currentTerm"`, `"votedFor"`, `"log"`) back exactly as they were
//! set. [`MemoryStorage`] is the in-memory default; a durable implementation
//! (e.g. backed by a log file with `fsync`) can swap in behind the same
//! trait without the Raft core noticing.

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

/// The three keys a Raft node persists. Storage implementations don't need
/// to know about these names, but the core always uses exactly these.
pub const KEY_CURRENT_TERM: &str = "currentTerm";
pub const KEY_VOTED_FOR: &str = "votedFor";
pub const KEY_LOG: &str = "log";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage key {0:?} missing at startup despite has_data() == true")]
    MissingKey(&'static str),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Opaque key -> bytes store.
///
/// Implementations must be safe to share across threads; the Raft core
/// holds one [`Arc<dyn Storage>`] per node and calls it from under its own
/// node lock, so `get`/`set` should not block for long.
pub trait Storage: Send + Sync {
    /// Fetch the bytes stored at `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Overwrite the bytes stored at `key`.
    fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Whether this store already holds a prior node's state. Used at
    /// startup to decide whether to restore or bootstrap fresh.
    fn has_data(&self) -> Result<bool>;
}

/// Validates the three well-known keys are present as a unit, per the
/// storage interface contract: "if `HasData()` is true, all three keys
/// must be present; inconsistency is fatal."
pub fn require_all_keys(storage: &dyn Storage) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let term = storage
        .get(KEY_CURRENT_TERM)?
        .ok_or(StorageError::MissingKey("currentTerm"))?;
    let voted_for = storage
        .get(KEY_VOTED_FOR)?
        .ok_or(StorageError::MissingKey("votedFor"))?;
    let log = storage.get(KEY_LOG)?.ok_or(StorageError::MissingKey("log"))?;
    Ok((term, voted_for, log))
}

/// In-memory [`Storage`] backed by a concurrent map. Data does not survive
/// process exit; see the module docs for the durability tradeoff.
#[derive(Default, Clone)]
pub struct MemoryStorage {
    data: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    fn has_data(&self) -> Result<bool> {
        Ok(!self.data.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_has_no_data() {
        let s = MemoryStorage::new();
        assert!(!s.has_data().unwrap());
        assert!(s.get(KEY_CURRENT_TERM).unwrap().is_none());
    }

    #[test]
    fn round_trips_bytes_exactly() {
        let s = MemoryStorage::new();
        s.set(KEY_CURRENT_TERM, vec![1, 2, 3]).unwrap();
        assert_eq!(s.get(KEY_CURRENT_TERM).unwrap(), Some(vec![1, 2, 3]));
        assert!(s.has_data().unwrap());
    }

    #[test]
    fn require_all_keys_fails_when_one_missing() {
        let s = MemoryStorage::new();
        s.set(KEY_CURRENT_TERM, vec![0]).unwrap();
        s.set(KEY_VOTED_FOR, vec![0]).unwrap();
        // log missing
        assert!(matches!(
            require_all_keys(&s),
            Err(StorageError::MissingKey("log"))
        ));
    }

    #[test]
    fn require_all_keys_succeeds_when_complete() {
        let s = MemoryStorage::new();
        s.set(KEY_CURRENT_TERM, vec![1]).unwrap();
        s.set(KEY_VOTED_FOR, vec![2]).unwrap();
        s.set(KEY_LOG, vec![3]).unwrap();
        let (t, v, l) = require_all_keys(&s).unwrap();
        assert_eq!((t, v, l), (vec![1], vec![2], vec![3]));
    }
}
