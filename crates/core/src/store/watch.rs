//! Change notification for stored documents
//!
//! Watchers are `tokio::sync::watch` channels, so a receiver always holds the
//! latest value and can be polled synchronously or awaited. Publishing re-reads
//! the value while holding the hub lock: whichever publisher runs last sends
//! the newest state, even if writers finish out of order. Callers must not
//! hold their own storage lock while publishing.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use crate::error::Result;

/// Receiver for a single document (`None` while absent)
pub type DocumentWatch = watch::Receiver<Option<Value>>;

/// Receiver for every live document in a collection
pub type CollectionWatch = watch::Receiver<Vec<(String, Value)>>;

type DocKey = (String, String);

#[derive(Default)]
pub(crate) struct WatchHub {
    documents: Mutex<HashMap<DocKey, watch::Sender<Option<Value>>>>,
    collections: Mutex<HashMap<String, watch::Sender<Vec<(String, Value)>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn replace_if_changed<T: PartialEq>(sender: &watch::Sender<T>, next: T) {
    sender.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

impl WatchHub {
    pub fn subscribe_document<F>(&self, collection: &str, id: &str, read: F) -> Result<DocumentWatch>
    where
        F: FnOnce() -> Result<Option<Value>>,
    {
        let mut documents = lock(&self.documents);
        let key = (collection.to_string(), id.to_string());
        if let Some(sender) = documents.get(&key) {
            return Ok(sender.subscribe());
        }

        let (sender, receiver) = watch::channel(read()?);
        documents.insert(key, sender);
        Ok(receiver)
    }

    pub fn publish_document<F>(&self, collection: &str, id: &str, read: F) -> Result<()>
    where
        F: FnOnce() -> Result<Option<Value>>,
    {
        let mut documents = lock(&self.documents);
        let key = (collection.to_string(), id.to_string());
        let Some(sender) = documents.get(&key) else {
            return Ok(());
        };

        if sender.receiver_count() == 0 {
            trace!(collection, id, "Dropping idle document watcher");
            documents.remove(&key);
            return Ok(());
        }

        replace_if_changed(sender, read()?);
        Ok(())
    }

    pub fn subscribe_collection<F>(&self, collection: &str, list: F) -> Result<CollectionWatch>
    where
        F: FnOnce() -> Result<Vec<(String, Value)>>,
    {
        let mut collections = lock(&self.collections);
        if let Some(sender) = collections.get(collection) {
            return Ok(sender.subscribe());
        }

        let (sender, receiver) = watch::channel(list()?);
        collections.insert(collection.to_string(), sender);
        Ok(receiver)
    }

    pub fn publish_collection<F>(&self, collection: &str, list: F) -> Result<()>
    where
        F: FnOnce() -> Result<Vec<(String, Value)>>,
    {
        let mut collections = lock(&self.collections);
        let Some(sender) = collections.get(collection) else {
            return Ok(());
        };

        if sender.receiver_count() == 0 {
            trace!(collection, "Dropping idle collection watcher");
            collections.remove(collection);
            return Ok(());
        }

        replace_if_changed(sender, list()?);
        Ok(())
    }
}
