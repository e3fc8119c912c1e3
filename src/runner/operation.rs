use super::state::RunState;
use crate::core::{DbError, Document, Filter, Result, Update};
use crate::store::{DeleteResult, DocumentStore, InsertOneResult, SessionId, UpdateResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One store call in a command sequence.
///
/// ```
/// use docrunner::runner::Operation;
/// use serde_json::json;
///
/// let op: Operation = serde_json::from_value(json!({
///     "op": "update_one",
///     "collection": "accounts",
///     "filter": {"_id": 1},
///     "update": {"$inc": {"balance": -100}}
/// }))
/// .unwrap();
/// assert_eq!(op.describe(), "update_one accounts");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    InsertOne {
        collection: String,
        document: Document,
    },
    UpdateOne {
        collection: String,
        filter: Filter,
        update: Update,
    },
    DeleteOne {
        collection: String,
        filter: Filter,
    },
    FindOne {
        collection: String,
        filter: Filter,
    },
    /// Fails the run unless the document matching `filter` exists and satisfies `condition`.
    Require {
        collection: String,
        filter: Filter,
        condition: Filter,
        message: String,
    },
}

impl Operation {
    pub fn insert_one(collection: impl Into<String>, document: Document) -> Self {
        Operation::InsertOne {
            collection: collection.into(),
            document,
        }
    }

    pub fn update_one(collection: impl Into<String>, filter: Filter, update: Update) -> Self {
        Operation::UpdateOne {
            collection: collection.into(),
            filter,
            update,
        }
    }

    pub fn delete_one(collection: impl Into<String>, filter: Filter) -> Self {
        Operation::DeleteOne {
            collection: collection.into(),
            filter,
        }
    }

    pub fn find_one(collection: impl Into<String>, filter: Filter) -> Self {
        Operation::FindOne {
            collection: collection.into(),
            filter,
        }
    }

    pub fn require(
        collection: impl Into<String>,
        filter: Filter,
        condition: Filter,
        message: impl Into<String>,
    ) -> Self {
        Operation::Require {
            collection: collection.into(),
            filter,
            condition,
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::InsertOne { .. } => "insert_one",
            Operation::UpdateOne { .. } => "update_one",
            Operation::DeleteOne { .. } => "delete_one",
            Operation::FindOne { .. } => "find_one",
            Operation::Require { .. } => "require",
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Operation::InsertOne { collection, .. }
            | Operation::UpdateOne { collection, .. }
            | Operation::DeleteOne { collection, .. }
            | Operation::FindOne { collection, .. }
            | Operation::Require { collection, .. } => collection,
        }
    }

    /// Short label used in errors and logs, e.g. `insert_one customers`.
    pub fn describe(&self) -> String {
        format!("{} {}", self.name(), self.collection())
    }

    /// Issue this operation against `store`, inside `session`'s transaction if one is open.
    pub async fn execute<S>(&self, store: &S, session: Option<SessionId>) -> Result<OperationOutcome>
    where
        S: DocumentStore + ?Sized,
    {
        match self {
            Operation::InsertOne {
                collection,
                document,
            } => store
                .insert_one(collection, document.clone(), session)
                .await
                .map(OperationOutcome::Inserted),
            Operation::UpdateOne {
                collection,
                filter,
                update,
            } => store
                .update_one(collection, filter, update, session)
                .await
                .map(OperationOutcome::Updated),
            Operation::DeleteOne { collection, filter } => store
                .delete_one(collection, filter, session)
                .await
                .map(OperationOutcome::Deleted),
            Operation::FindOne { collection, filter } => {
                let document = store.find_one(collection, filter, session).await?;
                Ok(OperationOutcome::Found { document })
            }
            Operation::Require {
                collection,
                filter,
                condition,
                message,
            } => {
                let document = store
                    .find_one(collection, filter, session)
                    .await?
                    .ok_or_else(|| DbError::Validation(message.clone()))?;
                if !condition.matches(&document)? {
                    return Err(DbError::Validation(message.clone()));
                }
                Ok(OperationOutcome::Checked { document })
            }
        }
    }
}

/// What a single operation did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationOutcome {
    Inserted(InsertOneResult),
    Updated(UpdateResult),
    Deleted(DeleteResult),
    Found { document: Option<Document> },
    Checked { document: Document },
}

/// Ordered operations run under one session and one transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSequence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub operations: Vec<Operation>,
}

impl CommandSequence {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            label: None,
            operations,
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn push(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("unlabeled")
    }
}

impl From<Vec<Operation>> for CommandSequence {
    fn from(operations: Vec<Operation>) -> Self {
        Self::new(operations)
    }
}

/// Outcome of a committed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub session: SessionId,
    pub outcomes: Vec<OperationOutcome>,
    pub history: Vec<RunState>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn final_state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Idle)
    }

    pub fn committed(&self) -> bool {
        self.history.contains(&RunState::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::document;
    use serde_json::json;

    #[test]
    fn test_operations_parse_from_json() {
        let seq: CommandSequence = serde_json::from_value(json!({
            "label": "signup",
            "operations": [
                {"op": "insert_one", "collection": "customers", "document": {"_id": 1, "name": "Alice"}},
                {"op": "delete_one", "collection": "customers", "filter": {"_id": 1}},
                {"op": "require", "collection": "accounts", "filter": {"_id": 1},
                 "condition": {"balance": {"$gte": 100}}, "message": "insufficient balance"}
            ]
        }))
        .unwrap();

        assert_eq!(seq.label(), "signup");
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.operations[0].describe(), "insert_one customers");
        assert_eq!(seq.operations[2].name(), "require");
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let parsed = serde_json::from_value::<Operation>(json!({"op": "drop", "collection": "x"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_builders_serialize_with_tag() {
        let op = Operation::insert_one("customers", document(json!({"_id": 1})).unwrap());
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["op"], json!("insert_one"));
        assert_eq!(value["collection"], json!("customers"));
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = OperationOutcome::Updated(UpdateResult {
            matched_count: 1,
            modified_count: 1,
        });
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"kind": "updated", "matched_count": 1, "modified_count": 1})
        );
    }
}
