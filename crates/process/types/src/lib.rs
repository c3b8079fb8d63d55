//! Process domain types for Trellis
//!
//! This crate defines the shared vocabulary of the lifecycle and approval
//! engine: tenant-scoped request contexts, lifecycle definition data
//! (states, transitions, gates), approval definition data (templates,
//! stages, routing rules), and the runtime records those definitions
//! materialize into (lifecycle instances, approval instances, stages,
//! tasks, assignment snapshots, events).
//!
//! Two pure components also live here:
//!
//! - [`Condition`] — a tagged expression tree evaluated by a recursive
//!   interpreter over a read-only JSON context. Used by routing rules and
//!   transition gates.
//! - the external status mapper ([`ApprovalInstance::external_status`]) —
//!   translates stored instance state into the externally visible status,
//!   collapsing "canceled because rejected" into `rejected`.

#![deny(unsafe_code)]

pub mod approval;
pub mod condition;
pub mod context;
pub mod errors;
pub mod lifecycle;
pub mod template;

pub use approval::{
    ApprovalEvent, ApprovalEventDraft, ApprovalEventKind, ApprovalInstance, ApprovalInstanceId,
    ApprovalStage, ApprovalTask, Assignee, AssignmentSnapshot, Decision, ExternalStatus,
    InstanceOutcome, InstanceStatus, StageAssignment, StageDisposition, StageId, StageOutcome,
    StageStatus, TaskId, TaskKind, TaskStatus, CONTEXT_REASON_KEY,
};
pub use condition::{Condition, ConditionOp};
pub use context::{
    EntityRef, GroupId, PrincipalId, RequestContext, TenantId, APPROVAL_BYPASS_KEY,
};
pub use errors::ConditionError;
pub use lifecycle::{
    GateId, LifecycleId, LifecycleInstance, LifecycleState, LifecycleTransition, StateId,
    TransitionGate, TransitionId,
};
pub use template::{
    ApprovalTemplate, ApprovalTemplateId, RoutingRule, StageMode, TemplateStage,
};
