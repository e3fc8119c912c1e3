use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Duplicate key error: collection '{collection}' index '{index}' dup key {key}")]
    DuplicateKey {
        collection: String,
        index: String,
        key: String,
    },

    #[error("Write conflict on '{collection}' document {id}")]
    WriteConflict { collection: String, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index conflict: {0}")]
    IndexConflict(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session {0} not found")]
    SessionNotFound(u64),

    #[error("No transaction in progress on session {0}")]
    NoTransaction(u64),

    #[error("Transaction already in progress on session {0}")]
    TransactionInProgress(u64),

    #[error("Invalid run state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Operation #{index} ({operation}) failed: {source}")]
    OperationFailed {
        index: usize,
        operation: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Session release failed: {0}")]
    ReleaseFailed(#[source] Box<DbError>),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Unwrap run-level wrappers down to the error the store reported.
    pub fn root_cause(&self) -> &DbError {
        match self {
            DbError::OperationFailed { source, .. } => source.root_cause(),
            DbError::ReleaseFailed(inner) => inner.root_cause(),
            other => other,
        }
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self.root_cause(), DbError::DuplicateKey { .. })
    }

    pub fn is_write_conflict(&self) -> bool {
        matches!(self.root_cause(), DbError::WriteConflict { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root_cause(), DbError::Validation(_))
    }

    /// Connection and session-bookkeeping failures, as opposed to data errors.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self.root_cause(),
            DbError::Connection(_)
                | DbError::SessionNotFound(_)
                | DbError::NoTransaction(_)
                | DbError::TransactionInProgress(_)
        )
    }

    /// Index of the failed step, when the error came out of a command sequence.
    pub fn failed_operation(&self) -> Option<usize> {
        match self {
            DbError::OperationFailed { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_operation_failure() {
        let err = DbError::OperationFailed {
            index: 1,
            operation: "insert_one customers".into(),
            source: Box::new(DbError::DuplicateKey {
                collection: "customers".into(),
                index: "_id_".into(),
                key: "{ _id: 2 }".into(),
            }),
        };

        assert!(err.is_duplicate_key());
        assert!(!err.is_validation());
        assert_eq!(err.failed_operation(), Some(1));
        assert!(err.to_string().contains("#1"));
        assert!(err.to_string().contains("Duplicate key"));
    }

    #[test]
    fn test_infrastructure_classification() {
        assert!(DbError::Connection("refused".into()).is_infrastructure());
        assert!(DbError::ReleaseFailed(Box::new(DbError::SessionNotFound(3))).is_infrastructure());
        assert!(DbError::TransactionInProgress(7).is_infrastructure());
        assert!(!DbError::Validation("Insufficient funds".into()).is_infrastructure());
    }
}
