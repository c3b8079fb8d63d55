//! Approval runtime records: instances, stages, tasks, snapshots, events
//!
//! An approval instance is materialized from a template when a gated
//! transition first runs. The instance owns its stages; each stage owns
//! its tasks. Tasks decide exactly once (pending → approved|rejected);
//! stages and instances complete through guarded conditional writes.
//!
//! The external status mapper lives here too: a stored `Canceled`
//! instance whose outcome is `Rejected` is reported as `rejected`, not
//! `canceled`.

use crate::context::{EntityRef, GroupId, PrincipalId, TenantId};
use crate::lifecycle::TransitionId;
use crate::template::{ApprovalTemplateId, StageMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for an approval instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalInstanceId(pub String);

impl ApprovalInstanceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ApprovalInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an approval stage
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageId(pub String);

impl StageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an approval task
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Statuses and outcomes ────────────────────────────────────────────

/// Stored status of an approval instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Open,
    Completed,
    Canceled,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        };
        write!(f, "{}", name)
    }
}

/// Why an instance left the `Open` status.
///
/// Written once at the terminal transition. Older records may lack it,
/// in which case the external status mapper falls back to the
/// `context.reason` convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceOutcome {
    Approved,
    Rejected,
    Canceled,
}

/// Externally visible instance status, derived by
/// [`ApprovalInstance::external_status`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalStatus {
    Open,
    Completed,
    Rejected,
    Canceled,
}

impl std::fmt::Display for ExternalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Canceled => "canceled",
        };
        write!(f, "{}", name)
    }
}

/// Stored status of an approval stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Created but not yet collecting decisions
    Pending,
    /// Currently collecting decisions
    Active,
    Completed,
    /// Terminal without approval (stage rejected, or instance canceled)
    Canceled,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        };
        write!(f, "{}", name)
    }
}

/// Result of a stage completion check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    Approved,
    Rejected,
}

/// How a finished stage is reported to callers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageDisposition {
    Completed,
    Rejected,
}

impl std::fmt::Display for StageDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        };
        write!(f, "{}", name)
    }
}

/// Stored status of an approval task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Approved,
    Rejected,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        write!(f, "{}", name)
    }
}

/// Whether a task counts toward stage completion
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Approver,
    /// Informational only, never counted for completion
    Observer,
}

/// A decision submitted against a pending task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn task_status(&self) -> TaskStatus {
        match self {
            Self::Approve => TaskStatus::Approved,
            Self::Reject => TaskStatus::Rejected,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        };
        write!(f, "{}", name)
    }
}

// ── Runtime records ──────────────────────────────────────────────────

/// Context key carrying the cancellation reason for legacy records
pub const CONTEXT_REASON_KEY: &str = "reason";

/// One materialized approval workflow for one entity.
///
/// At most one `Open` instance exists per (tenant, entity) at any time;
/// the store's insert path enforces this under its write lock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalInstance {
    pub id: ApprovalInstanceId,
    pub tenant_id: TenantId,
    pub entity: EntityRef,
    /// The transition this instance blocks, resumed on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_id: Option<TransitionId>,
    pub approval_template_id: ApprovalTemplateId,
    pub status: InstanceStatus,
    /// Why the instance left `Open`; absent while open and on legacy rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<InstanceOutcome>,
    /// Free-form context; carries the cancellation reason
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub created_by: PrincipalId,
}

impl ApprovalInstance {
    pub fn new(
        tenant_id: TenantId,
        entity: EntityRef,
        approval_template_id: ApprovalTemplateId,
        created_by: PrincipalId,
    ) -> Self {
        Self {
            id: ApprovalInstanceId::generate(),
            tenant_id,
            entity,
            transition_id: None,
            approval_template_id,
            status: InstanceStatus::Open,
            outcome: None,
            context: Map::new(),
            created_at: Utc::now(),
            created_by,
        }
    }

    pub fn with_transition(mut self, transition_id: TransitionId) -> Self {
        self.transition_id = Some(transition_id);
        self
    }

    /// The externally visible status of this instance.
    ///
    /// Prefers the explicit `outcome` written at terminal transitions.
    /// For `Canceled` rows without one (legacy writers) the mapper falls
    /// back to `context.reason == "rejected"`.
    pub fn external_status(&self) -> ExternalStatus {
        match (self.status, self.outcome) {
            (InstanceStatus::Open, _) => ExternalStatus::Open,
            (InstanceStatus::Completed, _) => ExternalStatus::Completed,
            (InstanceStatus::Canceled, Some(InstanceOutcome::Rejected)) => ExternalStatus::Rejected,
            (InstanceStatus::Canceled, Some(_)) => ExternalStatus::Canceled,
            (InstanceStatus::Canceled, None) => {
                let rejected = self
                    .context
                    .get(CONTEXT_REASON_KEY)
                    .and_then(|v| v.as_str())
                    .is_some_and(|reason| reason == "rejected");
                if rejected {
                    ExternalStatus::Rejected
                } else {
                    ExternalStatus::Canceled
                }
            }
        }
    }
}

/// One stage of a live instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalStage {
    pub id: StageId,
    pub approval_instance_id: ApprovalInstanceId,
    pub stage_no: u32,
    pub name: String,
    pub mode: StageMode,
    pub status: StageStatus,
}

impl ApprovalStage {
    pub fn new(
        approval_instance_id: ApprovalInstanceId,
        stage_no: u32,
        name: impl Into<String>,
        mode: StageMode,
        status: StageStatus,
    ) -> Self {
        Self {
            id: StageId::generate(),
            approval_instance_id,
            stage_no,
            name: name.into(),
            mode,
            status,
        }
    }
}

/// Who a task is assigned to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignee {
    Principal(PrincipalId),
    Group(GroupId),
}

impl std::fmt::Display for Assignee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Principal(p) => write!(f, "{}", p),
            Self::Group(g) => write!(f, "group:{}", g),
        }
    }
}

/// One unit of work for one assignee within a stage.
///
/// Decided exactly once; a second decision attempt is an error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalTask {
    pub id: TaskId,
    pub approval_instance_id: ApprovalInstanceId,
    pub approval_stage_id: StageId,
    pub assignee: Assignee,
    pub kind: TaskKind,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<PrincipalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalTask {
    pub fn new(
        approval_instance_id: ApprovalInstanceId,
        approval_stage_id: StageId,
        assignee: Assignee,
        kind: TaskKind,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            approval_instance_id,
            approval_stage_id,
            assignee,
            kind,
            status: TaskStatus::Pending,
            decided_by: None,
            decision_note: None,
            due_at: None,
            decided_at: None,
        }
    }

    pub fn with_due_at(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }
}

// ── Assignment snapshot ──────────────────────────────────────────────

/// The approvers and observers resolved for one stage at creation time
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageAssignment {
    pub stage_no: u32,
    pub approvers: Vec<Assignee>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observers: Vec<PrincipalId>,
}

/// Immutable record of the routing resolution performed at instance
/// creation, kept for audit fidelity and for activating later stages
/// without re-running routing rules.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssignmentSnapshot {
    pub approval_instance_id: ApprovalInstanceId,
    pub stages: Vec<StageAssignment>,
    pub captured_at: DateTime<Utc>,
}

impl AssignmentSnapshot {
    pub fn new(approval_instance_id: ApprovalInstanceId, stages: Vec<StageAssignment>) -> Self {
        Self {
            approval_instance_id,
            stages,
            captured_at: Utc::now(),
        }
    }

    pub fn for_stage(&self, stage_no: u32) -> Option<&StageAssignment> {
        self.stages.iter().find(|s| s.stage_no == stage_no)
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// What happened to an instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalEventKind {
    InstanceCreated,
    DecisionMade,
    TimersCanceled,
    StageCompleted,
    StageRejected,
    InstanceCompleted,
    InstanceRejected,
    InstanceCanceled,
}

impl std::fmt::Display for ApprovalEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InstanceCreated => "instance_created",
            Self::DecisionMade => "decision_made",
            Self::TimersCanceled => "timers_canceled",
            Self::StageCompleted => "stage_completed",
            Self::StageRejected => "stage_rejected",
            Self::InstanceCompleted => "instance_completed",
            Self::InstanceRejected => "instance_rejected",
            Self::InstanceCanceled => "instance_canceled",
        };
        write!(f, "{}", name)
    }
}

/// An event prepared by the engine; the store assigns the sequence number
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalEventDraft {
    pub approval_instance_id: ApprovalInstanceId,
    pub kind: ApprovalEventKind,
    pub actor: PrincipalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ApprovalEventDraft {
    pub fn new(
        approval_instance_id: ApprovalInstanceId,
        kind: ApprovalEventKind,
        actor: PrincipalId,
    ) -> Self {
        Self {
            approval_instance_id,
            kind,
            actor,
            comment: None,
            payload: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// An append-only log row, ordered per instance by `sequence`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub approval_instance_id: ApprovalInstanceId,
    pub sequence: u64,
    pub kind: ApprovalEventKind,
    pub actor: PrincipalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalEvent {
    pub fn from_draft(draft: ApprovalEventDraft, sequence: u64) -> Self {
        Self {
            approval_instance_id: draft.approval_instance_id,
            sequence,
            kind: draft.kind,
            actor: draft.actor,
            comment: draft.comment,
            payload: draft.payload,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance() -> ApprovalInstance {
        ApprovalInstance::new(
            TenantId::new("tenant-1"),
            EntityRef::new("travel_request", "tr-1"),
            ApprovalTemplateId::new("tmpl-1"),
            PrincipalId::new("user-1"),
        )
    }

    #[test]
    fn test_open_and_completed_map_directly() {
        let mut inst = instance();
        assert_eq!(inst.external_status(), ExternalStatus::Open);

        inst.status = InstanceStatus::Completed;
        inst.outcome = Some(InstanceOutcome::Approved);
        assert_eq!(inst.external_status(), ExternalStatus::Completed);
    }

    #[test]
    fn test_canceled_with_rejected_outcome_reports_rejected() {
        let mut inst = instance();
        inst.status = InstanceStatus::Canceled;
        inst.outcome = Some(InstanceOutcome::Rejected);
        assert_eq!(inst.external_status(), ExternalStatus::Rejected);
    }

    #[test]
    fn test_canceled_with_canceled_outcome_reports_canceled() {
        let mut inst = instance();
        inst.status = InstanceStatus::Canceled;
        inst.outcome = Some(InstanceOutcome::Canceled);
        assert_eq!(inst.external_status(), ExternalStatus::Canceled);
    }

    #[test]
    fn test_legacy_canceled_rows_fall_back_to_context_reason() {
        let mut inst = instance();
        inst.status = InstanceStatus::Canceled;
        inst.context
            .insert(CONTEXT_REASON_KEY.into(), json!("rejected"));
        assert_eq!(inst.external_status(), ExternalStatus::Rejected);

        inst.context
            .insert(CONTEXT_REASON_KEY.into(), json!("timeout"));
        assert_eq!(inst.external_status(), ExternalStatus::Canceled);

        inst.context.remove(CONTEXT_REASON_KEY);
        assert_eq!(inst.external_status(), ExternalStatus::Canceled);
    }

    #[test]
    fn test_explicit_outcome_wins_over_context_reason() {
        let mut inst = instance();
        inst.status = InstanceStatus::Canceled;
        inst.outcome = Some(InstanceOutcome::Canceled);
        inst.context
            .insert(CONTEXT_REASON_KEY.into(), json!("rejected"));
        assert_eq!(inst.external_status(), ExternalStatus::Canceled);
    }

    #[test]
    fn test_decision_to_task_status() {
        assert_eq!(Decision::Approve.task_status(), TaskStatus::Approved);
        assert_eq!(Decision::Reject.task_status(), TaskStatus::Rejected);
    }

    #[test]
    fn test_task_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(TaskStatus::Approved.is_terminal());
        assert!(TaskStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_snapshot_stage_lookup() {
        let snapshot = AssignmentSnapshot::new(
            ApprovalInstanceId::new("inst-1"),
            vec![
                StageAssignment {
                    stage_no: 1,
                    approvers: vec![Assignee::Principal(PrincipalId::new("a"))],
                    observers: vec![],
                },
                StageAssignment {
                    stage_no: 2,
                    approvers: vec![Assignee::Principal(PrincipalId::new("b"))],
                    observers: vec![PrincipalId::new("watcher")],
                },
            ],
        );

        assert_eq!(snapshot.for_stage(2).unwrap().approvers.len(), 1);
        assert!(snapshot.for_stage(3).is_none());
    }

    #[test]
    fn test_event_from_draft() {
        let draft = ApprovalEventDraft::new(
            ApprovalInstanceId::new("inst-1"),
            ApprovalEventKind::DecisionMade,
            PrincipalId::new("user-1"),
        )
        .with_comment("looks good");

        let event = ApprovalEvent::from_draft(draft, 3);
        assert_eq!(event.sequence, 3);
        assert_eq!(event.kind, ApprovalEventKind::DecisionMade);
        assert_eq!(event.comment.as_deref(), Some("looks good"));
    }
}
