use super::SessionId;
use crate::core::Document;
use std::collections::HashMap;
use std::time::Instant;

/// Buffered write for one document inside a transaction.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    /// Committed version seen when the transaction first wrote the document
    /// (`None` if it did not exist). Commit fails if it moved since.
    pub base_version: Option<u64>,
    /// New contents; `None` deletes the document.
    pub document: Option<Document>,
}

/// Write set of an open transaction.
#[derive(Debug)]
pub(crate) struct TxnState {
    number: u64,
    writes: HashMap<(String, String), PendingWrite>,
    /// First-touch order of (collection, id) pairs
    order: Vec<(String, String)>,
    started_at: Instant,
}

impl TxnState {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            writes: HashMap::new(),
            order: Vec::new(),
            started_at: Instant::now(),
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn write_count(&self) -> usize {
        self.order.len()
    }

    pub fn age(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn pending(&self, collection: &str, id: &str) -> Option<&PendingWrite> {
        self.writes.get(&(collection.to_string(), id.to_string()))
    }

    /// Pending writes for one collection, in first-touch order, with their position.
    pub fn pending_in<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = (usize, &'a str, &'a PendingWrite)> + 'a {
        self.order
            .iter()
            .enumerate()
            .filter(move |(_, (coll, _))| coll.as_str() == collection)
            .filter_map(move |(pos, key)| {
                self.writes.get(key).map(|write| (pos, key.1.as_str(), write))
            })
    }

    pub fn touches(&self, collection: &str, id: &str) -> bool {
        self.pending(collection, id).is_some()
    }

    /// Buffer a write, keeping the base version from the first touch.
    pub fn record(
        &mut self,
        collection: &str,
        id: &str,
        base_version: Option<u64>,
        document: Option<Document>,
    ) {
        let key = (collection.to_string(), id.to_string());
        match self.writes.get_mut(&key) {
            Some(existing) => existing.document = document,
            None => {
                self.order.push(key.clone());
                self.writes.insert(
                    key,
                    PendingWrite {
                        base_version,
                        document,
                    },
                );
            }
        }
    }

    /// Drain writes in first-touch order.
    pub fn into_writes(mut self) -> Vec<(String, String, PendingWrite)> {
        self.order
            .drain(..)
            .filter_map(|key| {
                let write = self.writes.remove(&key)?;
                Some((key.0, key.1, write))
            })
            .collect()
    }
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub id: SessionId,
    pub txn: Option<TxnState>,
    pub opened_at: Instant,
    pub transactions_started: u64,
}

impl SessionState {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            txn: None,
            opened_at: Instant::now(),
            transactions_started: 0,
        }
    }
}
