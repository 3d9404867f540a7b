//! Optimistic read-modify-write over a single document

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{CasResult, DocumentStore};
use crate::error::{Error, Result};

/// Bounded retry for conflicting transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 25;

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

/// Atomically update one document
///
/// `update` receives the current value (`None` if absent) and returns the
/// next value, or `None` to leave the document untouched. If another writer
/// commits first, `update` runs again against the fresher value. Errors from
/// `update` abort without writing.
///
/// Returns the committed value, or the current one when `update` declined.
pub fn transact<S, F>(
    store: &S,
    collection: &str,
    id: &str,
    policy: RetryPolicy,
    mut update: F,
) -> Result<Option<Value>>
where
    S: DocumentStore + ?Sized,
    F: FnMut(Option<&Value>) -> Result<Option<Value>>,
{
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        let snapshot = store.read(collection, id)?;

        let Some(next) = update(snapshot.value.as_ref())? else {
            return Ok(snapshot.value);
        };

        match store.compare_and_swap(collection, id, snapshot.version, Some(&next))? {
            CasResult::Committed(version) => {
                debug!(collection, id, version, attempt, "Transaction committed");
                return Ok(Some(next));
            }
            CasResult::Conflict { actual } => {
                debug!(
                    collection,
                    id,
                    attempt,
                    expected = snapshot.version,
                    actual,
                    "Transaction conflict, retrying"
                );
            }
        }
    }

    warn!(collection, id, attempts, "Transaction retry budget exhausted");
    Err(Error::TransactionAborted { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CollectionWatch, DocumentWatch, MemoryStore, Snapshot, ROOMS};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Lets a rival writer commit right before each of the first `rivals` conditional writes
    struct ContendedStore {
        inner: MemoryStore,
        rivals: AtomicU32,
    }

    impl ContendedStore {
        fn new(rivals: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                rivals: AtomicU32::new(rivals),
            }
        }
    }

    impl DocumentStore for ContendedStore {
        fn generate_id(&self, collection: &str) -> String {
            self.inner.generate_id(collection)
        }

        fn read(&self, collection: &str, id: &str) -> Result<Snapshot> {
            self.inner.read(collection, id)
        }

        fn write(&self, collection: &str, id: &str, value: &Value) -> Result<u64> {
            self.inner.write(collection, id, value)
        }

        fn remove(&self, collection: &str, id: &str) -> Result<()> {
            self.inner.remove(collection, id)
        }

        fn compare_and_swap(
            &self,
            collection: &str,
            id: &str,
            expected_version: u64,
            value: Option<&Value>,
        ) -> Result<CasResult> {
            let pending = self.rivals.load(Ordering::SeqCst);
            if pending > 0 {
                self.rivals.store(pending - 1, Ordering::SeqCst);
                let current = self.inner.read(collection, id)?.value;
                let n = current.and_then(|v| v["n"].as_i64()).unwrap_or(0);
                self.inner.write(collection, id, &json!({ "n": n + 100 }))?;
            }
            self.inner
                .compare_and_swap(collection, id, expected_version, value)
        }

        fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
            self.inner.list(collection)
        }

        fn watch(&self, collection: &str, id: &str) -> Result<DocumentWatch> {
            self.inner.watch(collection, id)
        }

        fn watch_collection(&self, collection: &str) -> Result<CollectionWatch> {
            self.inner.watch_collection(collection)
        }
    }

    fn increment(current: Option<&Value>) -> Result<Option<Value>> {
        let n = current.and_then(|v| v["n"].as_i64()).unwrap_or(0);
        Ok(Some(json!({ "n": n + 1 })))
    }

    #[test]
    fn test_commit_without_contention() {
        let store = MemoryStore::new();
        store.write(ROOMS, "r1", &json!({"n": 1})).unwrap();

        let committed = transact(&store, ROOMS, "r1", RetryPolicy::default(), increment).unwrap();
        assert_eq!(committed, Some(json!({"n": 2})));
        assert_eq!(store.read(ROOMS, "r1").unwrap().version, 2);
    }

    #[test]
    fn test_retry_recomputes_from_fresh_value() {
        let store = ContendedStore::new(2);
        store.write(ROOMS, "r1", &json!({"n": 0})).unwrap();

        let mut calls = 0;
        let committed = transact(&store, ROOMS, "r1", RetryPolicy::default(), |current| {
            calls += 1;
            increment(current)
        })
        .unwrap();

        // Two rival writes of +100 each land before our +1
        assert_eq!(calls, 3);
        assert_eq!(committed, Some(json!({"n": 201})));
        assert_eq!(store.read(ROOMS, "r1").unwrap().value, Some(json!({"n": 201})));
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let store = ContendedStore::new(10);
        store.write(ROOMS, "r1", &json!({"n": 0})).unwrap();

        let result = transact(&store, ROOMS, "r1", RetryPolicy::new(3), increment);
        assert!(matches!(result, Err(Error::TransactionAborted { attempts: 3 })));
    }

    #[test]
    fn test_declined_update_does_not_write() {
        let store = MemoryStore::new();
        store.write(ROOMS, "r1", &json!({"n": 7})).unwrap();

        let current = transact(&store, ROOMS, "r1", RetryPolicy::default(), |_| Ok(None)).unwrap();
        assert_eq!(current, Some(json!({"n": 7})));
        assert_eq!(store.read(ROOMS, "r1").unwrap().version, 1);
    }

    #[test]
    fn test_update_error_aborts() {
        let store = MemoryStore::new();
        let result = transact(&store, ROOMS, "missing", RetryPolicy::default(), |current| {
            match current {
                None => Err(Error::RoomNotFound("missing".into())),
                Some(_) => Ok(None),
            }
        });
        assert!(matches!(result, Err(Error::RoomNotFound(_))));
        assert_eq!(store.read(ROOMS, "missing").unwrap().version, 0);
    }
}
