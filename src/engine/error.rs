use ulid::Ulid;

use crate::model::AppointmentStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input — rejected before any state change.
    Validation(&'static str),
    /// Overlapping slot or appointment; carries the conflicting entity id.
    Conflict(Ulid),
    /// An identical request is already in flight under the same claim key.
    DuplicateRequest,
    AlreadyExists(Ulid),
    NotFound(Ulid),
    /// Caller does not own the required side of the relationship.
    Forbidden(&'static str),
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::Conflict(id) => write!(f, "slot unavailable: conflicts with {id}"),
            EngineError::DuplicateRequest => write!(f, "duplicate request already in flight"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {} -> {}", from.as_str(), to.as_str())
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
