//! Escalation/reminder timer cancellation contract.
//!
//! Timer scheduling lives outside the engine. When a task decides, any
//! pending timers for it must be canceled; absence of timers is not an
//! error, and cancellation failures never fail the decision.

use async_trait::async_trait;
use process_types::TaskId;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("timer backend error: {0}")]
pub struct TimerError(pub String);

/// Cancellation seam for the external timer scheduler.
#[async_trait]
pub trait EscalationTimers: Send + Sync {
    /// Cancel all pending timers for a task, returning how many were
    /// canceled. Idempotent.
    async fn cancel_for_task(&self, task_id: &TaskId) -> Result<usize, TimerError>;
}

/// Default wiring when no scheduler is attached.
pub struct NoopTimers;

#[async_trait]
impl EscalationTimers for NoopTimers {
    async fn cancel_for_task(&self, _task_id: &TaskId) -> Result<usize, TimerError> {
        Ok(0)
    }
}
