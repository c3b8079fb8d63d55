use process_storage::StorageError;
use process_types::ConditionError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Infrastructure failures of the engine.
///
/// Validation failures (task not pending, template not found, blocked
/// gates) are not errors: they come back as structured results the
/// caller branches on. Anything surfacing as `Err` means storage or
/// definition data misbehaved and the operation was aborted.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("condition evaluation error: {0}")]
    Condition(#[from] ConditionError),
}
