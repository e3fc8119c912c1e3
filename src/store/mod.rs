// ============================================================================
// Document Store Contract
// ============================================================================
//
// The runner talks to a document store only through `DocumentStore`.
// `InMemoryStore` is the bundled implementation; anything else (a driver
// wrapper, a mock counting calls in tests) plugs in the same way.
//
// ============================================================================

mod collection;
pub mod config;
pub mod memory;
mod session;

pub use config::StoreConfig;
pub use memory::InMemoryStore;

use crate::core::{Document, Filter, FindOptions, IndexSpec, Result, Update};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Opaque handle binding operations to one unit-of-work context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertOneResult {
    pub inserted_id: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Access path chosen for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStage {
    #[serde(rename = "COLLSCAN")]
    CollScan,
    #[serde(rename = "IXSCAN")]
    IxScan,
    #[serde(rename = "IDHACK")]
    IdLookup,
    #[serde(rename = "TEXT")]
    Text,
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStage::CollScan => write!(f, "COLLSCAN"),
            ScanStage::IxScan => write!(f, "IXSCAN"),
            ScanStage::IdLookup => write!(f, "IDHACK"),
            ScanStage::Text => write!(f, "TEXT"),
        }
    }
}

/// Execution statistics returned by `explain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainStats {
    pub stage: ScanStage,
    pub index_name: Option<String>,
    pub n_returned: usize,
    pub total_keys_examined: usize,
    pub total_docs_examined: usize,
    pub execution_time: Duration,
}

/// Client surface of a document store.
///
/// Write and read calls take an optional session: with a session whose
/// transaction is open, the call joins that transaction; otherwise it
/// auto-commits on its own.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn start_session(&self) -> Result<SessionId>;

    /// Release a session. An open transaction on it is aborted.
    async fn end_session(&self, session: SessionId) -> Result<()>;

    async fn start_transaction(&self, session: SessionId) -> Result<()>;

    async fn commit_transaction(&self, session: SessionId) -> Result<()>;

    async fn abort_transaction(&self, session: SessionId) -> Result<()>;

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<SessionId>,
    ) -> Result<InsertOneResult>;

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        session: Option<SessionId>,
    ) -> Result<UpdateResult>;

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<SessionId>,
    ) -> Result<DeleteResult>;

    async fn find(
        &self,
        collection: &str,
        options: &FindOptions,
        session: Option<SessionId>,
    ) -> Result<Vec<Document>>;

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        session: Option<SessionId>,
    ) -> Result<Option<Document>> {
        let options = FindOptions::new(filter.clone()).limit(1);
        Ok(self.find(collection, &options, session).await?.into_iter().next())
    }

    /// Create an index and return its name. Creating an identical index again is a no-op.
    async fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<String>;

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>>;

    /// Run the query outside any transaction and report how it was executed.
    async fn explain(&self, collection: &str, options: &FindOptions) -> Result<ExplainStats>;
}
