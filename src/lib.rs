// ============================================================================
// docrunner Library
// ============================================================================
//
// Transactional command runner over a document store, plus an in-memory
// store implementing the same client surface.
//
// ============================================================================

pub mod core;
pub mod instrument;
pub mod runner;
pub mod store;
pub mod workload;

// Re-export main types for convenience
pub use core::{DbError, Document, Filter, FindOptions, IndexSpec, Result, Update, document};
pub use instrument::{
    IndexImpact, Instrumentation, RecordingInstrumentation, TracingInstrumentation,
    measure_index_impact,
};
pub use runner::{
    CommandSequence, Operation, OperationOutcome, RunReport, RunState, RunnerConfig,
    TransactionRunner, TxnContext,
};
pub use store::{DocumentStore, ExplainStats, InMemoryStore, ScanStage, SessionId, StoreConfig};
pub use workload::{Workload, WorkloadReport};
