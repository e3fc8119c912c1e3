// ============================================================================
// Instrumentation
// ============================================================================
//
// Optional timing hook for the runner and the before/after index benchmark.
// Nothing here changes what a run does; it only observes.
//
// ============================================================================

use crate::core::{FindOptions, IndexSpec, Result};
use crate::runner::RunState;
use crate::store::{DocumentStore, ExplainStats};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{Level, event};

/// Observer for run and query timings. All methods default to no-ops.
pub trait Instrumentation: Send + Sync {
    fn operation_completed(&self, _label: &str, _operation: &str, _elapsed: Duration, _succeeded: bool) {}

    fn run_completed(&self, _label: &str, _history: &[RunState], _elapsed: Duration) {}

    fn query_measured(&self, _collection: &str, _label: &str, _stats: &ExplainStats) {}
}

/// Emits every measurement as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInstrumentation;

impl Instrumentation for TracingInstrumentation {
    fn operation_completed(&self, label: &str, operation: &str, elapsed: Duration, succeeded: bool) {
        event!(
            Level::DEBUG,
            label,
            operation,
            elapsed_us = elapsed.as_micros() as u64,
            succeeded,
            "operation timing"
        );
    }

    fn run_completed(&self, label: &str, history: &[RunState], elapsed: Duration) {
        let committed = history.contains(&RunState::Committed);
        event!(
            Level::INFO,
            label,
            committed,
            elapsed_ms = elapsed.as_millis() as u64,
            "run timing"
        );
    }

    fn query_measured(&self, collection: &str, label: &str, stats: &ExplainStats) {
        event!(
            Level::INFO,
            collection,
            label,
            stage = %stats.stage,
            index = stats.index_name.as_deref().unwrap_or("-"),
            returned = stats.n_returned,
            keys_examined = stats.total_keys_examined,
            docs_examined = stats.total_docs_examined,
            elapsed_us = stats.execution_time.as_micros() as u64,
            "query timing"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurement {
    Operation {
        label: String,
        operation: String,
        elapsed: Duration,
        succeeded: bool,
    },
    Run {
        label: String,
        committed: bool,
        elapsed: Duration,
    },
    Query {
        collection: String,
        label: String,
        stats: ExplainStats,
    },
}

/// Keeps every measurement in memory, for tests and reports.
#[derive(Debug, Default)]
pub struct RecordingInstrumentation {
    measurements: Mutex<Vec<Measurement>>,
}

impl RecordingInstrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measurements(&self) -> Vec<Measurement> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push(&self, measurement: Measurement) {
        self.lock().push(measurement);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Measurement>> {
        self.measurements
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Instrumentation for RecordingInstrumentation {
    fn operation_completed(&self, label: &str, operation: &str, elapsed: Duration, succeeded: bool) {
        self.push(Measurement::Operation {
            label: label.to_string(),
            operation: operation.to_string(),
            elapsed,
            succeeded,
        });
    }

    fn run_completed(&self, label: &str, history: &[RunState], elapsed: Duration) {
        self.push(Measurement::Run {
            label: label.to_string(),
            committed: history.contains(&RunState::Committed),
            elapsed,
        });
    }

    fn query_measured(&self, collection: &str, label: &str, stats: &ExplainStats) {
        self.push(Measurement::Query {
            collection: collection.to_string(),
            label: label.to_string(),
            stats: stats.clone(),
        });
    }
}

/// Explain output for one query before and after an index was built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexImpact {
    pub collection: String,
    pub index_name: String,
    pub before: ExplainStats,
    pub after: ExplainStats,
}

impl IndexImpact {
    /// Documents the query no longer has to look at.
    pub fn docs_examined_saved(&self) -> i64 {
        self.before.total_docs_examined as i64 - self.after.total_docs_examined as i64
    }

    pub fn uses_index(&self) -> bool {
        self.after.index_name.as_deref() == Some(self.index_name.as_str())
    }
}

/// Explain `query`, create `index`, explain again.
pub async fn measure_index_impact<S>(
    store: &S,
    collection: &str,
    query: &FindOptions,
    index: IndexSpec,
    hook: Option<&dyn Instrumentation>,
) -> Result<IndexImpact>
where
    S: DocumentStore + ?Sized,
{
    let before = store.explain(collection, query).await?;
    let index_name = store.create_index(collection, index).await?;
    let after = store.explain(collection, query).await?;

    if let Some(hook) = hook {
        hook.query_measured(collection, "before_index", &before);
        hook.query_measured(collection, "after_index", &after);
    }

    Ok(IndexImpact {
        collection: collection.to_string(),
        index_name,
        before,
        after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Filter, document};
    use crate::store::{InMemoryStore, ScanStage};
    use serde_json::json;

    #[tokio::test]
    async fn test_measure_index_impact() {
        let store = InMemoryStore::new();
        for i in 0..50 {
            store
                .insert_one(
                    "orders",
                    document(json!({"_id": i, "customerId": i % 10, "amount": i * 3})).unwrap(),
                    None,
                )
                .await
                .unwrap();
        }

        let recorder = RecordingInstrumentation::new();
        let query = FindOptions::new(Filter::eq("customerId", json!(3)));
        let impact = measure_index_impact(
            &store,
            "orders",
            &query,
            IndexSpec::ascending("customerId"),
            Some(&recorder),
        )
        .await
        .unwrap();

        assert_eq!(impact.before.stage, ScanStage::CollScan);
        assert_eq!(impact.after.stage, ScanStage::IxScan);
        assert_eq!(impact.before.n_returned, impact.after.n_returned);
        assert_eq!(impact.after.total_docs_examined, 5);
        assert_eq!(impact.docs_examined_saved(), 45);
        assert!(impact.uses_index());
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn test_recording_run_measurement() {
        let recorder = RecordingInstrumentation::new();
        recorder.run_completed(
            "transfer",
            &[RunState::Idle, RunState::Started, RunState::Aborted, RunState::Ended],
            Duration::from_millis(3),
        );
        assert_eq!(
            recorder.measurements(),
            vec![Measurement::Run {
                label: "transfer".into(),
                committed: false,
                elapsed: Duration::from_millis(3),
            }]
        );
    }
}
