#![allow(dead_code)]

use async_trait::async_trait;
use docrunner::core::{Document, Filter, FindOptions, IndexSpec, Result, Update, document};
use docrunner::store::{
    DeleteResult, DocumentStore, ExplainStats, InMemoryStore, InsertOneResult, SessionId,
    UpdateResult,
};
use docrunner::DbError;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub fn doc(value: Value) -> Document {
    document(value).unwrap()
}

/// Store wrapper counting lifecycle calls, with switchable failures.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryStore,
    pub sessions_started: AtomicUsize,
    pub sessions_ended: AtomicUsize,
    pub transactions_started: AtomicUsize,
    pub commits: AtomicUsize,
    pub aborts: AtomicUsize,
    pub fail_start_session: AtomicBool,
    pub fail_start_transaction: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_end_session: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> usize {
        self.sessions_started.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> usize {
        self.sessions_ended.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }
}

fn injected(what: &str) -> DbError {
    DbError::Connection(format!("injected {} failure", what))
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn start_session(&self) -> Result<SessionId> {
        if self.fail_start_session.load(Ordering::SeqCst) {
            return Err(injected("start_session"));
        }
        let id = self.inner.start_session().await?;
        self.sessions_started.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn end_session(&self, session: SessionId) -> Result<()> {
        self.sessions_ended.fetch_add(1, Ordering::SeqCst);
        // the session is released either way; only the reported result changes
        let result = self.inner.end_session(session).await;
        if self.fail_end_session.load(Ordering::SeqCst) {
            return Err(injected("end_session"));
        }
        result
    }

    async fn start_transaction(&self, session: SessionId) -> Result<()> {
        if self.fail_start_transaction.load(Ordering::SeqCst) {
            return Err(injected("start_transaction"));
        }
        self.transactions_started.fetch_add(1, Ordering::SeqCst);
        self.inner.start_transaction(session).await
    }

    async fn commit_transaction(&self, session: SessionId) -> Result<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(injected("commit_transaction"));
        }
        self.inner.commit_transaction(session).await?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_transaction(&self, session: SessionId) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort_transaction(session).await
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<SessionId>,
    ) -> Result<InsertOneResult> {
        self.inner.insert_one(collection, document, session).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        session: Option<SessionId>,
    ) -> Result<UpdateResult> {
        self.inner.update_one(collection, filter, update, session).await
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<SessionId>,
    ) -> Result<DeleteResult> {
        self.inner.delete_one(collection, filter, session).await
    }

    async fn find(
        &self,
        collection: &str,
        options: &FindOptions,
        session: Option<SessionId>,
    ) -> Result<Vec<Document>> {
        self.inner.find(collection, options, session).await
    }

    async fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<String> {
        self.inner.create_index(collection, spec).await
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        self.inner.list_indexes(collection).await
    }

    async fn explain(&self, collection: &str, options: &FindOptions) -> Result<ExplainStats> {
        self.inner.explain(collection, options).await
    }
}
