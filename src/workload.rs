// ============================================================================
// Workload Files
// ============================================================================
//
// A workload is a JSON description of what to do against a store, run in
// this order:
//
//   seed -> benchmarks -> indexes -> queries -> sequences
//
// Seeding, index builds and queries are plain store calls and stop the
// workload on error. Each sequence is one transactional run; a failed
// sequence is recorded in the report and the next one still runs.
//
// ============================================================================

use crate::core::{DbError, Document, Filter, FindOptions, IndexSpec, Result};
use crate::instrument::{IndexImpact, measure_index_impact};
use crate::runner::{CommandSequence, OperationOutcome, TransactionRunner};
use crate::store::{DocumentStore, ExplainStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{Level, event};

const DEMO_WORKLOAD: &str = include_str!("../demos/assignment.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRequest {
    pub collection: String,
    pub keys: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexRequest {
    pub fn spec(&self) -> Result<IndexSpec> {
        let mut spec = IndexSpec::from_document(&self.keys)?;
        if let Some(name) = &self.name {
            spec = spec.named(name.clone());
        }
        if self.unique {
            spec = spec.unique();
        }
        Ok(spec)
    }
}

/// Explain a query, build an index, explain again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    pub collection: String,
    #[serde(default)]
    pub filter: Filter,
    pub index: Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub collection: String,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub explain: bool,
}

impl QueryRequest {
    pub fn options(&self) -> Result<FindOptions> {
        let mut options = FindOptions::new(self.filter.clone());
        if let Some(sort) = &self.sort {
            options = options.sort_document(sort)?;
        }
        if let Some(skip) = self.skip {
            options = options.skip(skip);
        }
        if let Some(limit) = self.limit {
            options = options.limit(limit);
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub seed: BTreeMap<String, Vec<Document>>,
    #[serde(default)]
    pub benchmarks: Vec<Benchmark>,
    #[serde(default)]
    pub indexes: Vec<IndexRequest>,
    #[serde(default)]
    pub queries: Vec<QueryRequest>,
    #[serde(default)]
    pub sequences: Vec<CommandSequence>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    pub label: Option<String>,
    pub collection: String,
    pub documents: Vec<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<ExplainStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceReport {
    pub label: String,
    pub committed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<OperationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_operation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkloadReport {
    pub seeded: usize,
    pub benchmarks: Vec<IndexImpact>,
    pub indexes: Vec<String>,
    pub queries: Vec<QueryReport>,
    pub sequences: Vec<SequenceReport>,
}

impl WorkloadReport {
    pub fn committed(&self) -> usize {
        self.sequences.iter().filter(|s| s.committed).count()
    }

    pub fn aborted(&self) -> usize {
        self.sequences.len() - self.committed()
    }
}

impl Workload {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Built-in workload: index benchmark, compound and text indexes,
    /// withdrawal, duplicate-key rollback, balance guard and transfer.
    pub fn demo() -> Result<Self> {
        Self::from_json(DEMO_WORKLOAD)
    }

    pub fn validate(&self) -> Result<()> {
        for request in &self.indexes {
            request.spec()?.validate()?;
        }
        for benchmark in &self.benchmarks {
            IndexSpec::from_document(&benchmark.index)?.validate()?;
            benchmark.filter.validate()?;
        }
        for query in &self.queries {
            query.options()?.filter.validate()?;
        }
        for (position, sequence) in self.sequences.iter().enumerate() {
            if sequence.is_empty() {
                return Err(DbError::Validation(format!(
                    "sequence #{} ({}) has no operations",
                    position,
                    sequence.label()
                )));
            }
        }
        Ok(())
    }

    pub async fn execute<S>(&self, runner: &TransactionRunner<S>) -> Result<WorkloadReport>
    where
        S: DocumentStore + ?Sized,
    {
        self.validate()?;
        let store = runner.store();
        let mut report = WorkloadReport::default();

        for (collection, documents) in &self.seed {
            for doc in documents {
                store.insert_one(collection, doc.clone(), None).await?;
                report.seeded += 1;
            }
            event!(Level::INFO, collection = %collection, documents = documents.len(), "collection seeded");
        }

        for benchmark in &self.benchmarks {
            let query = FindOptions::new(benchmark.filter.clone());
            let impact = measure_index_impact(
                &**store,
                &benchmark.collection,
                &query,
                IndexSpec::from_document(&benchmark.index)?,
                runner.instrumentation(),
            )
            .await?;
            event!(
                Level::INFO,
                collection = %impact.collection,
                index = %impact.index_name,
                before_stage = %impact.before.stage,
                after_stage = %impact.after.stage,
                before_us = impact.before.execution_time.as_micros() as u64,
                after_us = impact.after.execution_time.as_micros() as u64,
                "index benchmark"
            );
            report.benchmarks.push(impact);
        }

        for request in &self.indexes {
            let name = store.create_index(&request.collection, request.spec()?).await?;
            report.indexes.push(name);
        }

        for query in &self.queries {
            let options = query.options()?;
            let documents = store.find(&query.collection, &options, None).await?;
            let explain = if query.explain {
                let stats = store.explain(&query.collection, &options).await?;
                if let Some(hook) = runner.instrumentation() {
                    hook.query_measured(
                        &query.collection,
                        query.label.as_deref().unwrap_or("query"),
                        &stats,
                    );
                }
                Some(stats)
            } else {
                None
            };
            event!(
                Level::INFO,
                collection = %query.collection,
                returned = documents.len(),
                "query executed"
            );
            report.queries.push(QueryReport {
                label: query.label.clone(),
                collection: query.collection.clone(),
                documents,
                explain,
            });
        }

        for sequence in &self.sequences {
            let entry = match runner.run(sequence).await {
                Ok(run) => SequenceReport {
                    label: sequence.label().to_string(),
                    committed: true,
                    outcomes: run.outcomes,
                    failed_operation: None,
                    error: None,
                },
                Err(err) => SequenceReport {
                    label: sequence.label().to_string(),
                    committed: false,
                    outcomes: Vec::new(),
                    failed_operation: err.failed_operation(),
                    error: Some(err.to_string()),
                },
            };
            report.sequences.push(entry);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, ScanStage};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_demo_workload_parses() {
        let workload = Workload::demo().unwrap();
        assert_eq!(workload.sequences.len(), 4);
        assert_eq!(workload.benchmarks.len(), 1);
        workload.validate().unwrap();
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let workload = Workload::from_json(r#"{"sequences": [{"label": "x", "operations": []}]}"#).unwrap();
        assert!(workload.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_index_request_spec() {
        let request: IndexRequest = serde_json::from_value(json!({
            "collection": "customers",
            "keys": {"email": 1},
            "name": "email_unique",
            "unique": true
        }))
        .unwrap();
        let spec = request.spec().unwrap();
        assert_eq!(spec.name(), "email_unique");
        assert!(spec.unique);
    }

    #[tokio::test]
    async fn test_demo_workload_outcomes() {
        let runner = TransactionRunner::new(Arc::new(InMemoryStore::new()));
        let report = Workload::demo().unwrap().execute(&runner).await.unwrap();

        assert_eq!(report.benchmarks[0].before.stage, ScanStage::CollScan);
        assert_eq!(report.benchmarks[0].after.stage, ScanStage::IxScan);

        let orders: Vec<&str> = report.queries[0]
            .documents
            .iter()
            .map(|d| d["_id"].as_str().unwrap())
            .collect();
        assert_eq!(orders, vec!["o-1003", "o-1004", "o-1002"]);
        assert_eq!(report.queries[1].documents.len(), 3);

        let committed: Vec<bool> = report.sequences.iter().map(|s| s.committed).collect();
        assert_eq!(committed, vec![true, false, false, true]);
        assert_eq!(report.sequences[1].failed_operation, Some(1));
        assert_eq!(report.sequences[2].failed_operation, Some(0));
        assert_eq!(runner.store().count("transactions").await, 1);
    }
}
