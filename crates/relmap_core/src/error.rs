//! Error types for the persistence engine.

use crate::entity::EntityId;
use crate::schema::SchemaError;
use relmap_store::{StatementKind, StoreError};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while building, sequencing or executing a run.
///
/// Every error aborts the current `run()` in full. None of them is retried
/// by the engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An entity is already tracked by the heap.
    #[error("entity {entity} is already tracked as {existing_role}, cannot track it as {role}")]
    DuplicateNode {
        /// The entity being registered.
        entity: EntityId,
        /// Role requested by the caller.
        role: String,
        /// Role of the existing node.
        existing_role: String,
    },

    /// A dependency cycle exists that no deferred update can break.
    #[error("unresolvable dependency cycle between roles: {}", roles.join(", "))]
    CyclicDependency {
        /// Roles of the commands participating in the cycle, in enqueue order.
        roles: Vec<String>,
    },

    /// A deferred binding had no value at execution time.
    #[error("binding {role}.{field} via {relation} has no resolved value")]
    IncompleteBinding {
        /// Role of the command being executed.
        role: String,
        /// Relation (or key) the binding belongs to.
        relation: String,
        /// Field that could not be filled.
        field: String,
    },

    /// A storage failure while executing a command.
    #[error("{kind} of {role} failed: {source}")]
    Transaction {
        /// Role of the failing command.
        role: String,
        /// Kind of the failing statement.
        kind: StatementKind,
        /// Underlying storage error.
        #[source]
        source: StoreError,
    },

    /// Role is not declared in the schema.
    #[error("unknown role: {role}")]
    UnknownRole {
        /// The missing role.
        role: String,
    },

    /// Relation is not declared for the role.
    #[error("unknown relation {relation} on role {role}")]
    UnknownRelation {
        /// Owning role.
        role: String,
        /// Missing relation name.
        relation: String,
    },

    /// A reference points to an entity that is neither stored nor scheduled.
    #[error("{role}.{relation} references an unsaved {target} that is not scheduled for insert")]
    UnresolvableReference {
        /// Role holding the reference.
        role: String,
        /// Relation name.
        relation: String,
        /// Role of the referenced entity.
        target: String,
    },

    /// A non-nullable relation is empty.
    #[error("relation {role}.{relation} is required but empty")]
    RequiredRelationMissing {
        /// Owning role.
        role: String,
        /// Relation name.
        relation: String,
    },

    /// A promise has no loader and was never resolved.
    #[error("promise for {role} cannot be resolved: no loader")]
    PromiseUnresolved {
        /// Target role of the promise.
        role: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Schema declaration error.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Storage error outside command execution (transaction control, reads).
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    /// Creates an unknown role error.
    pub fn unknown_role(role: impl Into<String>) -> Self {
        Self::UnknownRole { role: role.into() }
    }

    /// Creates an unknown relation error.
    pub fn unknown_relation(role: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::UnknownRelation {
            role: role.into(),
            relation: relation.into(),
        }
    }

    /// Creates an incomplete binding error.
    pub fn incomplete_binding(
        role: impl Into<String>,
        relation: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::IncompleteBinding {
            role: role.into(),
            relation: relation.into(),
            field: field.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a required relation error.
    pub fn required_relation(role: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::RequiredRelationMissing {
            role: role.into(),
            relation: relation.into(),
        }
    }

    /// Returns the role of the failing command for execution errors.
    #[must_use]
    pub fn failed_role(&self) -> Option<&str> {
        match self {
            Self::Transaction { role, .. } | Self::IncompleteBinding { role, .. } => Some(role),
            _ => None,
        }
    }

    /// Returns true if this error is a configuration problem rather than a
    /// storage failure.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency { .. }
                | Self::UnknownRole { .. }
                | Self::UnknownRelation { .. }
                | Self::Schema(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclic_dependency_lists_roles() {
        let err = CoreError::CyclicDependency {
            roles: vec!["user".into(), "profile".into()],
        };
        assert_eq!(
            err.to_string(),
            "unresolvable dependency cycle between roles: user, profile"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn transaction_error_identifies_role() {
        let err = CoreError::Transaction {
            role: "post".into(),
            kind: StatementKind::Insert,
            source: StoreError::Injected("boom".into()),
        };
        assert_eq!(err.failed_role(), Some("post"));
        assert!(err.to_string().starts_with("insert of post failed"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn store_errors_convert() {
        let err: CoreError = StoreError::NoActiveTransaction.into();
        assert!(matches!(err, CoreError::Store(_)));
        assert_eq!(err.failed_role(), None);
    }
}
