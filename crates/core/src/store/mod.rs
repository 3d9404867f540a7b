//! Document storage layer
//!
//! Rooms live as JSON documents keyed by `(collection, id)`. Every document
//! carries a version that increases on each change, including deletion, so
//! a reader can later write back only if nobody changed the document in the
//! meantime. `transact` builds the optimistic read-modify-write on top of
//! that primitive.

mod memory;
mod migrations;
mod parse;
mod sqlite;
mod transaction;
mod watch;

use serde_json::Value;

use crate::error::Result;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use transaction::{transact, RetryPolicy};
pub use watch::{CollectionWatch, DocumentWatch};

/// Collection holding one document per room
pub const ROOMS: &str = "rooms";

/// A document as read at a specific version
///
/// `version` is 0 for a document that has never existed. A deleted document
/// keeps its (bumped) version with `value` set to `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub version: u64,
    pub value: Option<Value>,
}

impl Snapshot {
    pub fn absent() -> Self {
        Self {
            version: 0,
            value: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }
}

/// Outcome of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
    /// Written; the document is now at this version
    Committed(u64),
    /// The document moved on since it was read
    Conflict { actual: u64 },
}

/// Storage backend for JSON documents
///
/// Implementations may be backed by SQLite, memory, or a remote service.
pub trait DocumentStore: Send + Sync {
    /// Generate a fresh, unique key in `collection`
    fn generate_id(&self, collection: &str) -> String;

    /// Read the current value and version
    fn read(&self, collection: &str, id: &str) -> Result<Snapshot>;

    /// Unconditionally replace a document, returning its new version
    fn write(&self, collection: &str, id: &str, value: &Value) -> Result<u64>;

    /// Delete a document (no-op if it does not exist)
    fn remove(&self, collection: &str, id: &str) -> Result<()>;

    /// Write `value` (or delete when `None`) only if the document is still
    /// at `expected_version`
    fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        value: Option<&Value>,
    ) -> Result<CasResult>;

    /// All live documents in a collection, ordered by key
    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>>;

    /// Observe one document: holds the current value and is notified on
    /// every change, `None` once deleted
    fn watch(&self, collection: &str, id: &str) -> Result<DocumentWatch>;

    /// Observe every live document of a collection
    fn watch_collection(&self, collection: &str) -> Result<CollectionWatch>;
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every `DocumentStore` must share

    use super::*;
    use serde_json::json;

    pub fn absent_document_reads_as_version_zero(store: &dyn DocumentStore) {
        let snapshot = store.read(ROOMS, "missing").unwrap();
        assert_eq!(snapshot, Snapshot::absent());
        assert!(!snapshot.exists());
    }

    pub fn write_bumps_version(store: &dyn DocumentStore) {
        let v1 = store.write(ROOMS, "r1", &json!({"n": 1})).unwrap();
        let v2 = store.write(ROOMS, "r1", &json!({"n": 2})).unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);

        let snapshot = store.read(ROOMS, "r1").unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.value, Some(json!({"n": 2})));
    }

    pub fn compare_and_swap_detects_conflict(store: &dyn DocumentStore) {
        let created = store
            .compare_and_swap(ROOMS, "r1", 0, Some(&json!({"n": 1})))
            .unwrap();
        assert_eq!(created, CasResult::Committed(1));

        // A second creator loses
        let again = store
            .compare_and_swap(ROOMS, "r1", 0, Some(&json!({"n": 9})))
            .unwrap();
        assert_eq!(again, CasResult::Conflict { actual: 1 });

        let updated = store
            .compare_and_swap(ROOMS, "r1", 1, Some(&json!({"n": 2})))
            .unwrap();
        assert_eq!(updated, CasResult::Committed(2));

        let stale = store
            .compare_and_swap(ROOMS, "r1", 1, Some(&json!({"n": 3})))
            .unwrap();
        assert_eq!(stale, CasResult::Conflict { actual: 2 });

        assert_eq!(store.read(ROOMS, "r1").unwrap().value, Some(json!({"n": 2})));
    }

    pub fn remove_leaves_versioned_tombstone(store: &dyn DocumentStore) {
        store.write(ROOMS, "r1", &json!({"n": 1})).unwrap();
        store.remove(ROOMS, "r1").unwrap();

        let snapshot = store.read(ROOMS, "r1").unwrap();
        assert!(!snapshot.exists());
        assert_eq!(snapshot.version, 2);

        // A writer holding the pre-delete version cannot resurrect it
        let stale = store
            .compare_and_swap(ROOMS, "r1", 1, Some(&json!({"n": 5})))
            .unwrap();
        assert_eq!(stale, CasResult::Conflict { actual: 2 });

        // Removing again is a no-op
        store.remove(ROOMS, "r1").unwrap();
        assert_eq!(store.read(ROOMS, "r1").unwrap().version, 2);
        assert!(store.list(ROOMS).unwrap().is_empty());
    }

    pub fn list_skips_deleted_and_other_collections(store: &dyn DocumentStore) {
        store.write(ROOMS, "b", &json!(2)).unwrap();
        store.write(ROOMS, "a", &json!(1)).unwrap();
        store.write(ROOMS, "c", &json!(3)).unwrap();
        store.write("other", "z", &json!(0)).unwrap();
        store.remove(ROOMS, "c").unwrap();

        let listed = store.list(ROOMS).unwrap();
        assert_eq!(
            listed,
            vec![("a".to_string(), json!(1)), ("b".to_string(), json!(2))]
        );
    }

    pub fn watch_sees_changes_and_deletion(store: &dyn DocumentStore) {
        store.write(ROOMS, "r1", &json!({"n": 1})).unwrap();

        let mut doc = store.watch(ROOMS, "r1").unwrap();
        let mut all = store.watch_collection(ROOMS).unwrap();
        assert_eq!(*doc.borrow_and_update(), Some(json!({"n": 1})));
        assert_eq!(all.borrow_and_update().len(), 1);

        store.write(ROOMS, "r1", &json!({"n": 2})).unwrap();
        assert!(doc.has_changed().unwrap());
        assert_eq!(*doc.borrow_and_update(), Some(json!({"n": 2})));

        store.write(ROOMS, "r2", &json!({"n": 0})).unwrap();
        assert!(all.has_changed().unwrap());
        assert_eq!(all.borrow_and_update().len(), 2);
        // Unrelated document does not wake the single-document watcher
        assert!(!doc.has_changed().unwrap());

        store.remove(ROOMS, "r1").unwrap();
        assert_eq!(*doc.borrow_and_update(), None);
        assert_eq!(all.borrow_and_update().len(), 1);
    }

    pub fn generated_ids_are_unique(store: &dyn DocumentStore) {
        let mut ids: Vec<String> = (0..200).map(|_| store.generate_id(ROOMS)).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 200);
    }

    pub fn run_all(make: impl Fn() -> Box<dyn DocumentStore>) {
        absent_document_reads_as_version_zero(make().as_ref());
        write_bumps_version(make().as_ref());
        compare_and_swap_detects_conflict(make().as_ref());
        remove_leaves_versioned_tombstone(make().as_ref());
        list_skips_deleted_and_other_collections(make().as_ref());
        watch_sees_changes_and_deletion(make().as_ref());
        generated_ids_are_unique(make().as_ref());
    }
}
