use thiserror::Error;

/// Errors raised while evaluating a condition expression tree.
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("operator {op} cannot compare '{field}' against the configured value")]
    InvalidOperand { field: String, op: String },

    #[error("operator {op} on '{field}' requires an array value")]
    ExpectedArray { field: String, op: String },
}
