// ============================================================================
// In-Memory Document Store
// ============================================================================
//
// Single-process implementation of `DocumentStore`.
//
// Every write goes through a transaction write set. Auto-commit calls open a
// throwaway one and commit it before returning, so uniqueness checks and
// index maintenance have exactly one code path.
//
// Concurrency control is first-committer-wins at document granularity: a
// transaction remembers the committed version of each document it writes
// and commit fails with `WriteConflict` if any of them moved.
//
// ============================================================================

use super::collection::{Collection, ID_INDEX, Plan, duplicate_key, validate_collection_name};
use super::session::{SessionState, TxnState};
use super::{
    DeleteResult, DocumentStore, ExplainStats, InsertOneResult, ScanStage, SessionId,
    StoreConfig, UpdateResult,
};
use crate::core::document::{ID_FIELD, id_key};
use crate::core::index::tokenize;
use crate::core::{DbError, Document, Filter, FindOptions, IndexSpec, Result, Update};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{Level, event};

/// Pending-only documents sort after every committed one.
const PENDING_ORDER_BASE: u64 = u64::MAX / 2;

#[derive(Default)]
struct StoreState {
    collections: HashMap<String, Collection>,
    sessions: HashMap<SessionId, SessionState>,
    next_txn: u64,
}

impl StoreState {
    fn next_txn_number(&mut self) -> u64 {
        self.next_txn += 1;
        self.next_txn
    }
}

pub struct InMemoryStore {
    config: StoreConfig,
    state: RwLock<StoreState>,
    next_session: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            state: RwLock::new(StoreState::default()),
            next_session: AtomicU64::new(1),
        }
    }

    /// Validate `config` before building the store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        event!(Level::INFO, url = %config.to_url(), "opening in-memory document store");
        Ok(Self::with_config(config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub async fn active_sessions(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    pub async fn list_collections(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state.collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Committed document count.
    pub async fn count(&self, collection: &str) -> usize {
        let state = self.state.read().await;
        state.collections.get(collection).map_or(0, Collection::len)
    }

    /// Run `op` against the session's open transaction, or against a
    /// throwaway transaction committed immediately afterwards.
    async fn write<T>(
        &self,
        session: Option<SessionId>,
        op: impl FnOnce(&HashMap<String, Collection>, &mut TxnState) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.state.write().await;
        let StoreState {
            collections,
            sessions,
            next_txn,
        } = &mut *guard;

        if let Some(id) = session {
            let state = sessions.get_mut(&id).ok_or(DbError::SessionNotFound(id.0))?;
            if let Some(txn) = state.txn.as_mut() {
                return op(&*collections, txn);
            }
        }

        *next_txn += 1;
        let mut txn = TxnState::new(*next_txn);
        let value = op(&*collections, &mut txn)?;
        commit_writes(collections, txn)?;
        Ok(value)
    }

    async fn read<T>(
        &self,
        session: Option<SessionId>,
        op: impl FnOnce(&HashMap<String, Collection>, Option<&TxnState>) -> Result<T>,
    ) -> Result<T> {
        let guard = self.state.read().await;
        let txn = match session {
            Some(id) => guard
                .sessions
                .get(&id)
                .ok_or(DbError::SessionNotFound(id.0))?
                .txn
                .as_ref(),
            None => None,
        };
        op(&guard.collections, txn)
    }

    /// Give the document an `_id` (placed first) when it has none.
    fn prepare_insert(&self, mut document: Document) -> Result<Document> {
        if let Some(key) = document.keys().find(|k| k.starts_with('$')) {
            return Err(DbError::InvalidDocument(format!(
                "field names cannot start with '$': {}",
                key
            )));
        }
        match document.get(ID_FIELD) {
            Some(Value::Array(_)) => Err(DbError::InvalidDocument(
                "_id cannot be an array".into(),
            )),
            Some(_) => Ok(document),
            None if self.config.generate_ids => {
                let mut with_id = Document::new();
                with_id.insert(
                    ID_FIELD.to_string(),
                    Value::String(uuid::Uuid::new_v4().to_string()),
                );
                with_id.append(&mut document);
                Ok(with_id)
            }
            None => Err(DbError::InvalidDocument("document has no _id".into())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Committed data overlaid with one transaction's pending writes.
struct View<'a> {
    name: &'a str,
    collection: Option<&'a Collection>,
    txn: Option<&'a TxnState>,
}

struct QueryOutcome {
    docs: Vec<Document>,
    stage: ScanStage,
    index_name: Option<String>,
    keys_examined: usize,
    docs_examined: usize,
}

impl<'a> View<'a> {
    fn new(collections: &'a HashMap<String, Collection>, txn: Option<&'a TxnState>, name: &'a str) -> Self {
        Self {
            name,
            collection: collections.get(name),
            txn,
        }
    }

    fn get(&self, id: &str) -> Option<Document> {
        if let Some(write) = self.txn.and_then(|txn| txn.pending(self.name, id)) {
            return write.document.clone();
        }
        self.collection
            .and_then(|c| c.get(id))
            .map(|stored| stored.doc.clone())
    }

    fn committed_version(&self, id: &str) -> Option<u64> {
        self.collection.and_then(|c| c.version_of(id))
    }

    /// Enforce `_id` and unique-index constraints for `doc` stored under `id`.
    fn check_unique(&self, doc: &Document, id: &str, is_insert: bool) -> Result<()> {
        if is_insert && self.get(id).is_some() {
            return Err(DbError::DuplicateKey {
                collection: self.name.to_string(),
                index: ID_INDEX.to_string(),
                key: id.to_string(),
            });
        }

        let Some(collection) = self.collection else {
            return Ok(());
        };
        let txn = self.txn;
        collection.unique_conflicts(doc, id, |other| {
            txn.is_some_and(|t| t.touches(self.name, other))
        })?;

        let Some(txn) = txn else {
            return Ok(());
        };
        for index in collection.unique_indexes() {
            let key = index.spec().key_for(doc);
            for (_, other_id, write) in txn.pending_in(self.name) {
                if other_id == id {
                    continue;
                }
                if let Some(other) = &write.document
                    && index.spec().key_for(other) == key
                {
                    return Err(duplicate_key(self.name, &index.spec().name(), &key));
                }
            }
        }
        Ok(())
    }

    fn query(&self, filter: &Filter, limit: Option<usize>) -> Result<QueryOutcome> {
        filter.validate()?;
        let text_search = filter.text_search()?;

        let Some(collection) = self.collection else {
            if text_search.is_some() {
                return Err(DbError::IndexNotFound(format!(
                    "text index required for $text query on '{}'",
                    self.name
                )));
            }
            return self.pending_only(filter, limit);
        };

        let plan: Plan = collection.plan(filter)?;
        let terms = text_search.map(tokenize);
        let text_index = collection.text_index();

        // order key -> id, committed documents first in insertion order
        let mut ordered: BTreeMap<u64, &str> = BTreeMap::new();
        match &plan.candidates {
            Some(ids) => {
                for id in ids {
                    if let Some(stored) = collection.get(id) {
                        ordered.insert(stored.seq, id.as_str());
                    }
                }
            }
            None => {
                for id in collection.scan_ids() {
                    if let Some(stored) = collection.get(id) {
                        ordered.insert(stored.seq, id.as_str());
                    }
                }
            }
        }
        if let Some(txn) = self.txn {
            for (pos, id, _) in txn.pending_in(self.name) {
                let order = match collection.get(id) {
                    Some(stored) => stored.seq,
                    None => PENDING_ORDER_BASE + pos as u64,
                };
                ordered.insert(order, id);
            }
        }

        let mut outcome = QueryOutcome {
            docs: Vec::new(),
            stage: plan.stage,
            index_name: plan.index_name.clone(),
            keys_examined: plan.keys_examined,
            docs_examined: 0,
        };

        for id in ordered.into_values() {
            if limit.is_some_and(|l| outcome.docs.len() >= l) {
                break;
            }
            let Some(doc) = self.get(id) else {
                continue;
            };
            outcome.docs_examined += 1;
            let text_ok = match (&terms, text_index) {
                (Some(terms), Some(index)) => index.text_matches(&doc, terms),
                _ => true,
            };
            if text_ok && filter.matches(&doc)? {
                outcome.docs.push(doc);
            }
        }
        Ok(outcome)
    }

    /// Query a collection that exists only in this transaction's write set.
    fn pending_only(&self, filter: &Filter, limit: Option<usize>) -> Result<QueryOutcome> {
        let mut outcome = QueryOutcome {
            docs: Vec::new(),
            stage: ScanStage::CollScan,
            index_name: None,
            keys_examined: 0,
            docs_examined: 0,
        };
        let Some(txn) = self.txn else {
            return Ok(outcome);
        };
        for (_, _, write) in txn.pending_in(self.name) {
            if limit.is_some_and(|l| outcome.docs.len() >= l) {
                break;
            }
            if let Some(doc) = &write.document {
                outcome.docs_examined += 1;
                if filter.matches(doc)? {
                    outcome.docs.push(doc.clone());
                }
            }
        }
        Ok(outcome)
    }
}

/// Validate and install a transaction's write set atomically.
fn commit_writes(collections: &mut HashMap<String, Collection>, txn: TxnState) -> Result<()> {
    let number = txn.number();
    let writes = txn.into_writes();

    for (coll, id, write) in &writes {
        let current = collections.get(coll).and_then(|c| c.version_of(id));
        if current != write.base_version {
            if write.base_version.is_none() && write.document.is_some() {
                return Err(DbError::DuplicateKey {
                    collection: coll.clone(),
                    index: ID_INDEX.to_string(),
                    key: id.clone(),
                });
            }
            return Err(DbError::WriteConflict {
                collection: coll.clone(),
                id: id.clone(),
            });
        }
    }

    let touched: HashSet<(&str, &str)> = writes
        .iter()
        .map(|(coll, id, _)| (coll.as_str(), id.as_str()))
        .collect();
    for (coll, id, write) in &writes {
        if let (Some(doc), Some(collection)) = (&write.document, collections.get(coll)) {
            collection.unique_conflicts(doc, id, |other| touched.contains(&(coll.as_str(), other)))?;
        }
    }

    let count = writes.len();
    for (coll, id, write) in writes {
        if write.document.is_none() && !collections.contains_key(&coll) {
            continue;
        }
        collections
            .entry(coll.clone())
            .or_insert_with(|| Collection::new(&coll))
            .apply(&id, write.document);
    }

    event!(Level::TRACE, txn = number, writes = count, "write set committed");
    Ok(())
}

fn first_match(view: &View<'_>, filter: &Filter) -> Result<Option<(String, Document)>> {
    let outcome = view.query(filter, Some(1))?;
    Ok(outcome.docs.into_iter().next().and_then(|doc| {
        let key = doc.get(ID_FIELD).map(id_key)?;
        Some((key, doc))
    }))
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn start_session(&self) -> Result<SessionId> {
        let mut state = self.state.write().await;
        if state.sessions.len() >= self.config.max_sessions {
            return Err(DbError::Connection(format!(
                "session limit of {} reached for database '{}'",
                self.config.max_sessions, self.config.database
            )));
        }
        let id = SessionId(self.next_session.fetch_add(1, Ordering::SeqCst));
        state.sessions.insert(id, SessionState::new(id));
        event!(Level::DEBUG, session = %id, "session started");
        Ok(id)
    }

    async fn end_session(&self, session: SessionId) -> Result<()> {
        let mut state = self.state.write().await;
        let ended = state
            .sessions
            .remove(&session)
            .ok_or(DbError::SessionNotFound(session.0))?;
        if let Some(txn) = ended.txn {
            event!(
                Level::DEBUG,
                session = %session,
                txn = txn.number(),
                discarded_writes = txn.write_count(),
                "open transaction aborted by session end"
            );
        }
        event!(
            Level::DEBUG,
            session = %ended.id,
            transactions = ended.transactions_started,
            lifetime_ms = ended.opened_at.elapsed().as_millis() as u64,
            "session ended"
        );
        Ok(())
    }

    async fn start_transaction(&self, session: SessionId) -> Result<()> {
        let mut state = self.state.write().await;
        let number = state.next_txn_number();
        let entry = state
            .sessions
            .get_mut(&session)
            .ok_or(DbError::SessionNotFound(session.0))?;
        if entry.txn.is_some() {
            return Err(DbError::TransactionInProgress(session.0));
        }
        entry.txn = Some(TxnState::new(number));
        entry.transactions_started += 1;
        event!(Level::DEBUG, session = %session, txn = number, "transaction started");
        Ok(())
    }

    async fn commit_transaction(&self, session: SessionId) -> Result<()> {
        let mut guard = self.state.write().await;
        let StoreState {
            collections,
            sessions,
            ..
        } = &mut *guard;
        let txn = sessions
            .get_mut(&session)
            .ok_or(DbError::SessionNotFound(session.0))?
            .txn
            .take()
            .ok_or(DbError::NoTransaction(session.0))?;

        let number = txn.number();
        let age = txn.age();
        match commit_writes(collections, txn) {
            Ok(()) => {
                event!(Level::DEBUG, session = %session, txn = number, elapsed_us = age.as_micros() as u64, "transaction committed");
                Ok(())
            }
            Err(err) => {
                event!(Level::DEBUG, session = %session, txn = number, error = %err, "transaction commit rejected");
                Err(err)
            }
        }
    }

    async fn abort_transaction(&self, session: SessionId) -> Result<()> {
        let mut state = self.state.write().await;
        let txn = state
            .sessions
            .get_mut(&session)
            .ok_or(DbError::SessionNotFound(session.0))?
            .txn
            .take()
            .ok_or(DbError::NoTransaction(session.0))?;
        event!(
            Level::DEBUG,
            session = %session,
            txn = txn.number(),
            discarded_writes = txn.write_count(),
            "transaction aborted"
        );
        Ok(())
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<SessionId>,
    ) -> Result<InsertOneResult> {
        validate_collection_name(collection)?;
        let document = self.prepare_insert(document)?;
        let inserted_id = document.get(ID_FIELD).cloned().unwrap_or(Value::Null);
        let key = id_key(&inserted_id);

        self.write(session, |collections, txn| {
            let view = View::new(collections, Some(&*txn), collection);
            view.check_unique(&document, &key, true)?;
            let base = view.committed_version(&key);
            txn.record(collection, &key, base, Some(document));
            Ok(())
        })
        .await?;

        Ok(InsertOneResult { inserted_id })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        session: Option<SessionId>,
    ) -> Result<UpdateResult> {
        validate_collection_name(collection)?;
        update.validate()?;

        self.write(session, |collections, txn| {
            let view = View::new(collections, Some(&*txn), collection);
            let Some((key, mut doc)) = first_match(&view, filter)? else {
                return Ok(UpdateResult::default());
            };
            if !update.apply(&mut doc)? {
                return Ok(UpdateResult {
                    matched_count: 1,
                    modified_count: 0,
                });
            }
            view.check_unique(&doc, &key, false)?;
            let base = view.committed_version(&key);
            txn.record(collection, &key, base, Some(doc));
            Ok(UpdateResult {
                matched_count: 1,
                modified_count: 1,
            })
        })
        .await
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<SessionId>,
    ) -> Result<DeleteResult> {
        validate_collection_name(collection)?;

        self.write(session, |collections, txn| {
            let view = View::new(collections, Some(&*txn), collection);
            let Some((key, _)) = first_match(&view, filter)? else {
                return Ok(DeleteResult::default());
            };
            let base = view.committed_version(&key);
            txn.record(collection, &key, base, None);
            Ok(DeleteResult { deleted_count: 1 })
        })
        .await
    }

    async fn find(
        &self,
        collection: &str,
        options: &FindOptions,
        session: Option<SessionId>,
    ) -> Result<Vec<Document>> {
        let limit = if options.sort.is_empty() {
            options.limit.map(|l| l.saturating_add(options.skip))
        } else {
            None
        };
        self.read(session, |collections, txn| {
            let outcome = View::new(collections, txn, collection).query(&options.filter, limit)?;
            Ok(options.finish(outcome.docs))
        })
        .await
    }

    async fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<String> {
        validate_collection_name(collection)?;
        let mut state = self.state.write().await;
        let (name, created) = state
            .collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection::new(collection))
            .create_index(spec)?;
        if created {
            event!(Level::INFO, collection, index = %name, "index created");
        } else {
            event!(Level::DEBUG, collection, index = %name, "index already exists");
        }
        Ok(name)
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(collection)
            .map(Collection::index_specs)
            .unwrap_or_default())
    }

    async fn explain(&self, collection: &str, options: &FindOptions) -> Result<ExplainStats> {
        let started = Instant::now();
        self.read(None, |collections, _| {
            let outcome = View::new(collections, None, collection).query(&options.filter, None)?;
            let returned = options.finish(outcome.docs).len();
            Ok(ExplainStats {
                stage: outcome.stage,
                index_name: outcome.index_name,
                n_returned: returned,
                total_keys_examined: outcome.keys_examined,
                total_docs_examined: outcome.docs_examined,
                execution_time: started.elapsed(),
            })
        })
        .await
    }
}
