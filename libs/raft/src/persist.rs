//! Encodes [`PersistentState`] onto the three well-known [`raftkv_storage::Storage`] keys.

use crate::state::PersistentState;
use raftkv_storage::{KEY_CURRENT_TERM, KEY_LOG, KEY_VOTED_FOR};
use raftkv_transport::{Entry, NodeId, Term};

/// Writes `currentTerm`, `votedFor`, and `log` as opaque bincode blobs.
/// A failure here is fatal to the node per the error taxonomy (`StorageError`
/// ⇒ transition to Dead); callers propagate with `?`.
pub fn save(storage: &dyn raftkv_storage::Storage, state: &PersistentState) -> raftkv_storage::Result<()> {
    let term_bytes = bincode::serialize(&state.current_term.0).expect("Term encodes infallibly");
    let voted_for_bytes = bincode::serialize(&state.voted_for.map(|n| n.0)).expect("Option<u64> encodes infallibly");
    let log_bytes = bincode::serialize(&state.log).expect("Vec<Entry> encodes infallibly");

    storage.set(KEY_CURRENT_TERM, term_bytes)?;
    storage.set(KEY_VOTED_FOR, voted_for_bytes)?;
    storage.set(KEY_LOG, log_bytes)?;
    Ok(())
}

/// Restores state written by [`save`]. Returns `Ok(None)` if the store is
/// empty (a brand-new node); [`raftkv_storage::require_all_keys`] already
/// enforces that a non-empty store carries all three keys.
pub fn load(storage: &dyn raftkv_storage::Storage) -> raftkv_storage::Result<Option<PersistentState>> {
    if !storage.has_data()? {
        return Ok(None);
    }
    let (term_bytes, voted_for_bytes, log_bytes) = raftkv_storage::require_all_keys(storage)?;

    let current_term: u64 = bincode::deserialize(&term_bytes)
        .map_err(|e| raftkv_storage::StorageError::Backend(e.to_string()))?;
    let voted_for: Option<u64> = bincode::deserialize(&voted_for_bytes)
        .map_err(|e| raftkv_storage::StorageError::Backend(e.to_string()))?;
    let log: Vec<Entry> =
        bincode::deserialize(&log_bytes).map_err(|e| raftkv_storage::StorageError::Backend(e.to_string()))?;

    Ok(Some(PersistentState {
        current_term: Term(current_term),
        voted_for: voted_for.map(NodeId),
        log,
    }))
}
