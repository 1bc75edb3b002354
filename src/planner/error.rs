use thiserror::Error;
use uuid::Uuid;

use super::plan::Blocked;
use super::EntityKind;

pub type PlannerResult<T> = Result<T, PlannerError>;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },

    #[error("{0}")]
    Blocked(Box<Blocked>),

    /// The resolver produced a plan that would break a storage invariant.
    /// Always a programming error; the transaction is rolled back.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid reassignment target: {0}")]
    InvalidTarget(String),

    #[error("revision {revision_id} does not belong to document {document_id}")]
    VersionMismatch { revision_id: Uuid, document_id: Uuid },

    #[error("concurrent modification detected: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl PlannerError {
    pub fn not_found(kind: EntityKind, id: Uuid) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<Blocked> for PlannerError {
    fn from(value: Blocked) -> Self {
        Self::Blocked(Box::new(value))
    }
}

impl From<diesel::result::Error> for PlannerError {
    fn from(value: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match value {
            Error::DatabaseError(DatabaseErrorKind::SerializationFailure, info) => {
                Self::Conflict(info.message().to_string())
            }
            Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                Self::InvariantViolation(format!(
                    "foreign key violation: {}",
                    info.message()
                ))
            }
            other => Self::Storage(other.to_string()),
        }
    }
}
