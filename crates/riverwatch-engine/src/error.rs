use riverwatch_storage::error::StorageError;

/// Engine error taxonomy.
///
/// `NotFound`, `Conflict`, and `InvalidArgument` are terminal and are
/// surfaced to the caller immediately. `Transient` covers store and
/// database unavailability; during a scheduled tick it is logged and
/// the tick skipped, the next tick being the retry.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transient: {0}")]
    Transient(#[from] StorageError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        EngineError::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidArgument(msg.into())
    }
}

/// Convenience `Result` alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
