// ============================================================================
// Transactional Command Runner
// ============================================================================
//
// Runs an ordered sequence of operations under one session and one
// transaction:
//
//   start_session -> start_transaction -> op 0..n -> commit | abort -> end_session
//
// Any failing step aborts the transaction and is reported with the position
// and description of the operation that failed. The session is released on
// every path, exactly once. Nothing is retried.
//
// ============================================================================

pub mod operation;
pub mod state;

pub use operation::{CommandSequence, Operation, OperationOutcome, RunReport};
pub use state::{RunLifecycle, RunState};

use crate::core::{DbError, Document, Filter, FindOptions, Result, Update};
use crate::instrument::Instrumentation;
use crate::store::{DeleteResult, DocumentStore, InsertOneResult, SessionId, UpdateResult};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, Level, event, info_span};

/// Runner settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Name attached to every run span
    pub name: String,

    /// Runs slower than this are logged at WARN
    pub slow_run_threshold: Duration,
}

impl RunnerConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            slow_run_threshold: Duration::from_millis(500),
        }
    }

    pub fn slow_run_threshold(mut self, threshold: Duration) -> Self {
        self.slow_run_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DbError::Config("Runner name cannot be empty".to_string()));
        }
        if self.slow_run_threshold.is_zero() {
            return Err(DbError::Config("slow_run_threshold must be > 0".to_string()));
        }
        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new("docrunner")
    }
}

/// Store and session handed to a managed transaction body.
///
/// Every call made through the context joins the run's transaction.
pub struct TxnContext<S: ?Sized> {
    store: Arc<S>,
    session: SessionId,
}

impl<S: ?Sized> Clone for TxnContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            session: self.session,
        }
    }
}

impl<S: DocumentStore + ?Sized> TxnContext<S> {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn execute(&self, operation: &Operation) -> Result<OperationOutcome> {
        operation.execute(&*self.store, Some(self.session)).await
    }

    pub async fn insert_one(&self, collection: &str, document: Document) -> Result<InsertOneResult> {
        self.store
            .insert_one(collection, document, Some(self.session))
            .await
    }

    pub async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<UpdateResult> {
        self.store
            .update_one(collection, filter, update, Some(self.session))
            .await
    }

    pub async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<DeleteResult> {
        self.store
            .delete_one(collection, filter, Some(self.session))
            .await
    }

    pub async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        self.store
            .find_one(collection, filter, Some(self.session))
            .await
    }

    pub async fn find(&self, collection: &str, options: &FindOptions) -> Result<Vec<Document>> {
        self.store.find(collection, options, Some(self.session)).await
    }
}

/// Value produced by a managed run plus what the lifecycle recorded.
struct Managed<T> {
    value: T,
    session: SessionId,
    history: Vec<RunState>,
}

pub struct TransactionRunner<S: ?Sized> {
    store: Arc<S>,
    config: RunnerConfig,
    hook: Option<Arc<dyn Instrumentation>>,
}

impl<S: DocumentStore + ?Sized> TransactionRunner<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, RunnerConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: RunnerConfig) -> Self {
        Self {
            store,
            config,
            hook: None,
        }
    }

    /// Attach a timing hook called after every operation and run.
    pub fn with_instrumentation(mut self, hook: Arc<dyn Instrumentation>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// The underlying store, for calls outside any transaction
    /// (index creation, plain queries).
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn instrumentation(&self) -> Option<&dyn Instrumentation> {
        self.hook.as_deref()
    }

    /// Run every operation of `sequence` in one transaction.
    ///
    /// Commits when all operations succeed. Otherwise aborts and returns
    /// `DbError::OperationFailed` naming the zero-based position of the
    /// failing operation.
    pub async fn run(&self, sequence: &CommandSequence) -> Result<RunReport> {
        let label = sequence.label();
        let operations = &sequence.operations;
        let hook = self.hook.as_deref();
        let started = Instant::now();

        let managed = self
            .managed(label, move |ctx| async move {
                let mut outcomes = Vec::with_capacity(operations.len());
                for (index, operation) in operations.iter().enumerate() {
                    let op_started = Instant::now();
                    let result = ctx.execute(operation).await;
                    if let Some(hook) = hook {
                        hook.operation_completed(
                            label,
                            &operation.describe(),
                            op_started.elapsed(),
                            result.is_ok(),
                        );
                    }
                    match result {
                        Ok(outcome) => {
                            event!(Level::DEBUG, index, operation = %operation.describe(), "operation succeeded");
                            outcomes.push(outcome);
                        }
                        Err(source) => {
                            return Err(DbError::OperationFailed {
                                index,
                                operation: operation.describe(),
                                source: Box::new(source),
                            });
                        }
                    }
                }
                Ok(outcomes)
            })
            .await?;

        Ok(RunReport {
            label: sequence.label.clone(),
            session: managed.session,
            outcomes: managed.value,
            history: managed.history,
            elapsed: started.elapsed(),
        })
    }

    /// Run `body` in one transaction, committing when it returns `Ok`.
    ///
    /// ```
    /// use docrunner::core::{Filter, Update, document};
    /// use docrunner::runner::TransactionRunner;
    /// use docrunner::store::InMemoryStore;
    /// use serde_json::json;
    /// use std::sync::Arc;
    ///
    /// # tokio_test::block_on(async {
    /// let runner = TransactionRunner::new(Arc::new(InMemoryStore::new()));
    /// let balance = runner
    ///     .with_transaction(|txn| async move {
    ///         txn.insert_one("accounts", document(json!({"_id": 1, "balance": 500}))?).await?;
    ///         txn.update_one("accounts", &Filter::by_id(json!(1)), &Update::new().inc("balance", -100)).await?;
    ///         let account = txn.find_one("accounts", &Filter::by_id(json!(1))).await?;
    ///         Ok::<_, docrunner::DbError>(account.map(|a| a["balance"].clone()))
    ///     })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(balance, Some(json!(400)));
    /// # });
    /// ```
    pub async fn with_transaction<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(TxnContext<S>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let label = self.config.name.clone();
        Ok(self.managed(&label, body).await?.value)
    }

    async fn managed<F, Fut, T>(&self, label: &str, body: F) -> Result<Managed<T>>
    where
        F: FnOnce(TxnContext<S>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let span = info_span!("runner.run", runner = %self.config.name, label = %label);
        async move {
            let started = Instant::now();
            let session = self.store.start_session().await?;
            let ctx = TxnContext {
                store: Arc::clone(&self.store),
                session,
            };
            let mut lifecycle = RunLifecycle::new();

            let outcome = self.drive(&ctx, &mut lifecycle, body).await;
            let release = self.store.end_session(session).await;
            lifecycle.end()?;

            let elapsed = started.elapsed();
            if let Some(hook) = &self.hook {
                hook.run_completed(label, lifecycle.history(), elapsed);
            }
            if elapsed > self.config.slow_run_threshold {
                event!(Level::WARN, session = %session, elapsed_ms = elapsed.as_millis() as u64, "slow run");
            }

            match (outcome, release) {
                (Ok(value), Ok(())) => {
                    event!(Level::INFO, session = %session, "run committed");
                    Ok(Managed {
                        value,
                        session,
                        history: lifecycle.into_history(),
                    })
                }
                (Ok(_), Err(err)) => {
                    event!(Level::ERROR, session = %session, error = %err, "session release failed after commit");
                    Err(DbError::ReleaseFailed(Box::new(err)))
                }
                (Err(err), Ok(())) => {
                    event!(Level::WARN, session = %session, error = %err, "run aborted");
                    Err(err)
                }
                (Err(err), Err(release_err)) => {
                    event!(Level::WARN, session = %session, error = %err, "run aborted");
                    event!(Level::ERROR, session = %session, error = %release_err, "session release failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Everything between session acquisition and release. Leaves the
    /// lifecycle in `Idle` (start failed), `Committed` or `Aborted`.
    async fn drive<F, Fut, T>(
        &self,
        ctx: &TxnContext<S>,
        lifecycle: &mut RunLifecycle,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(TxnContext<S>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.store.start_transaction(ctx.session).await?;
        lifecycle.start()?;

        let result = match body(ctx.clone()).await {
            Ok(value) => self
                .store
                .commit_transaction(ctx.session)
                .await
                .map(|()| value),
            Err(err) => {
                self.abort_quietly(ctx.session).await;
                lifecycle.abort()?;
                return Err(err);
            }
        };

        match result {
            Ok(value) => {
                lifecycle.commit()?;
                Ok(value)
            }
            Err(err) => {
                event!(Level::DEBUG, session = %ctx.session, error = %err, "commit failed");
                self.abort_quietly(ctx.session).await;
                lifecycle.abort()?;
                Err(err)
            }
        }
    }

    /// Abort on a path that already failed. Its own errors are logged only.
    async fn abort_quietly(&self, session: SessionId) {
        match self.store.abort_transaction(session).await {
            Ok(()) => {}
            Err(DbError::NoTransaction(_)) => {
                event!(Level::DEBUG, session = %session, "transaction already discarded");
            }
            Err(err) => {
                event!(Level::WARN, session = %session, error = %err, "abort failed");
            }
        }
    }
}
