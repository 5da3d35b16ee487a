//! Error types for objgraph.
//!
//! Every failure is strongly typed using thiserror. Errors are grouped by
//! the layer that raises them (metamodel, identity, predicates, contexts)
//! and folded into [`GraphError`] so callers can match on the exact
//! condition or just propagate with `?`.

use thiserror::Error;

use crate::id::ObjectId;
use crate::storage::StorageError;

/// Errors raised while building or querying the metamodel.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Unknown entity '{name}'")]
    UnknownEntity {
        name: String,
    },

    #[error("Entity '{name}' is defined more than once")]
    DuplicateEntity {
        name: String,
    },

    #[error("Property '{property}' on entity '{entity}' collides with an existing property")]
    DuplicateProperty {
        entity: String,
        property: String,
    },

    #[error("Relationship '{entity}.{relationship}' declares inverse '{inverse}' with an incompatible destination")]
    IncompatibleInverse {
        entity: String,
        relationship: String,
        inverse: String,
    },

    #[error("Default value of '{entity}.{attribute}' does not match its type {expected}")]
    InvalidDefault {
        entity: String,
        attribute: String,
        expected: String,
    },

    #[error("Entity '{entity}' inherits from itself")]
    InheritanceCycle {
        entity: String,
    },
}

/// Errors raised by object identifiers and their URI form.
#[derive(Debug, Error)]
pub enum IdError {
    #[error("Object ID is temporary and has no store identity: {uri}")]
    TemporaryId {
        uri: String,
    },

    #[error("Malformed object ID '{uri}': {reason}")]
    MalformedId {
        uri: String,
        reason: String,
    },

    #[error("No store with identifier {store} is registered")]
    UnknownStore {
        store: String,
    },
}

/// Errors raised while parsing or evaluating predicates.
#[derive(Debug, Error)]
pub enum PredicateError {
    #[error("Syntax error near '{token}': {message}")]
    Syntax {
        message: String,
        token: String,
    },

    #[error("Type error: {message}")]
    Type {
        message: String,
    },
}

impl PredicateError {
    pub(crate) fn syntax(message: impl Into<String>, token: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
            token: token.into(),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }
}

/// Errors raised by object contexts, managed objects and the coordinator.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Entity '{entity}' has no property named '{property}'")]
    NoSuchProperty {
        entity: String,
        property: String,
    },

    #[error("Invalid value for '{property}': expected {expected}, got {actual}")]
    InvalidValue {
        property: String,
        expected: String,
        actual: String,
    },

    #[error("Object belongs to a different context")]
    CrossContext,

    #[error("Contexts do not share a store coordinator")]
    IncompatibleContext,

    #[error("No stored record for object {id}")]
    NotFound {
        id: ObjectId,
    },

    #[error("Store is already bound to another coordinator")]
    AlreadyBound,

    #[error("Object is no longer registered with its context")]
    Unregistered,

    #[error("Re-entrant fault while loading {id}")]
    ReentrantFault {
        id: ObjectId,
    },

    #[error("Required property '{entity}.{property}' has no value")]
    MissingRequired {
        entity: String,
        property: String,
    },

    #[error("The coordinator has no persistent store to assign objects to")]
    NoPersistentStore,
}

/// Top-level error type for objgraph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Identity error: {0}")]
    Id(#[from] IdError),

    #[error("Predicate error: {0}")]
    Predicate(#[from] PredicateError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Store error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid configuration: {reason}")]
    Config {
        reason: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl GraphError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a metamodel error.
    #[must_use]
    pub const fn is_model(&self) -> bool {
        matches!(self, Self::Model(_))
    }

    /// Returns true if this is an object identity error.
    #[must_use]
    pub const fn is_id(&self) -> bool {
        matches!(self, Self::Id(_))
    }

    /// Returns true if this is a predicate parse or evaluation error.
    #[must_use]
    pub const fn is_predicate(&self) -> bool {
        matches!(self, Self::Predicate(_))
    }

    /// Returns true if this is a context error.
    #[must_use]
    pub const fn is_context(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// Returns true if the failure was reported by a store.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// A failed save leaves the change set untouched, so a transient store
    /// failure can simply be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => matches!(e, StorageError::Io(_) | StorageError::BackendError(_)),
            _ => false,
        }
    }
}

/// Result type alias for objgraph operations.
pub type GraphResult<T> = Result<T, GraphError>;
