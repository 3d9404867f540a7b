//! In-process document store
//!
//! Used for tests and for running a server without persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use super::watch::WatchHub;
use super::{CasResult, CollectionWatch, DocumentStore, DocumentWatch, Snapshot};
use crate::error::Result;
use crate::ids;

#[derive(Debug, Clone)]
struct Entry {
    version: u64,
    value: Option<Value>,
}

/// Mutex-guarded map of collections to documents
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Entry>>>,
    hub: WatchHub,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, HashMap<String, BTreeMap<String, Entry>>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self, collection: &str) -> Vec<(String, Value)> {
        self.data()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter_map(|(id, entry)| entry.value.clone().map(|v| (id.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn current(&self, collection: &str, id: &str) -> Option<Value> {
        self.data()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .and_then(|entry| entry.value.clone())
    }

    fn publish(&self, collection: &str, id: &str) -> Result<()> {
        self.hub
            .publish_document(collection, id, || Ok(self.current(collection, id)))?;
        self.hub
            .publish_collection(collection, || Ok(self.live(collection)))
    }
}

impl DocumentStore for MemoryStore {
    fn generate_id(&self, _collection: &str) -> String {
        ids::push_id()
    }

    fn read(&self, collection: &str, id: &str) -> Result<Snapshot> {
        let snapshot = self
            .data()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|entry| Snapshot {
                version: entry.version,
                value: entry.value.clone(),
            })
            .unwrap_or_else(Snapshot::absent);
        Ok(snapshot)
    }

    fn write(&self, collection: &str, id: &str, value: &Value) -> Result<u64> {
        let version = {
            let mut data = self.data();
            let entry = data
                .entry(collection.to_string())
                .or_default()
                .entry(id.to_string())
                .or_insert(Entry {
                    version: 0,
                    value: None,
                });
            entry.version += 1;
            entry.value = Some(value.clone());
            entry.version
        };

        self.publish(collection, id)?;
        Ok(version)
    }

    fn remove(&self, collection: &str, id: &str) -> Result<()> {
        let removed = {
            let mut data = self.data();
            match data.get_mut(collection).and_then(|docs| docs.get_mut(id)) {
                Some(entry) if entry.value.is_some() => {
                    entry.version += 1;
                    entry.value = None;
                    true
                }
                _ => false,
            }
        };

        if removed {
            self.publish(collection, id)?;
        }
        Ok(())
    }

    fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        value: Option<&Value>,
    ) -> Result<CasResult> {
        let result = {
            let mut data = self.data();
            let docs = data.entry(collection.to_string()).or_default();
            let actual = docs.get(id).map(|e| e.version).unwrap_or(0);

            if actual != expected_version {
                CasResult::Conflict { actual }
            } else {
                let version = actual + 1;
                docs.insert(
                    id.to_string(),
                    Entry {
                        version,
                        value: value.cloned(),
                    },
                );
                CasResult::Committed(version)
            }
        };

        if matches!(result, CasResult::Committed(_)) {
            self.publish(collection, id)?;
        }
        Ok(result)
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        Ok(self.live(collection))
    }

    fn watch(&self, collection: &str, id: &str) -> Result<DocumentWatch> {
        self.hub
            .subscribe_document(collection, id, || Ok(self.current(collection, id)))
    }

    fn watch_collection(&self, collection: &str) -> Result<CollectionWatch> {
        self.hub
            .subscribe_collection(collection, || Ok(self.live(collection)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn test_memory_store_contract() {
        contract::run_all(|| Box::new(MemoryStore::new()));
    }
}
