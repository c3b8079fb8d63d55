use crate::StorageResult;
use async_trait::async_trait;
use process_types::{
    ApprovalEvent, ApprovalEventDraft, ApprovalInstance, ApprovalInstanceId, ApprovalStage,
    ApprovalTask, ApprovalTemplate, ApprovalTemplateId, AssignmentSnapshot, EntityRef,
    InstanceOutcome, InstanceStatus, LifecycleInstance, LifecycleState, LifecycleTransition,
    PrincipalId, StageId, StageStatus, StateId, TaskId, TaskStatus, TenantId, TransitionGate,
    TransitionId,
};
use serde_json::{Map, Value};

/// Read surface over immutable definition data: lifecycle states,
/// transitions, gates, and approval templates. Writes exist only to seed
/// definitions; the engine never mutates them.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn put_state(&self, tenant: &TenantId, state: LifecycleState) -> StorageResult<()>;
    async fn put_transition(
        &self,
        tenant: &TenantId,
        transition: LifecycleTransition,
    ) -> StorageResult<()>;
    async fn put_gate(&self, tenant: &TenantId, gate: TransitionGate) -> StorageResult<()>;
    async fn put_template(&self, tenant: &TenantId, template: ApprovalTemplate)
        -> StorageResult<()>;

    async fn get_state(&self, tenant: &TenantId, id: &StateId)
        -> StorageResult<Option<LifecycleState>>;

    async fn get_transition(
        &self,
        tenant: &TenantId,
        id: &TransitionId,
    ) -> StorageResult<Option<LifecycleTransition>>;

    /// The active transition leaving `from` under the given operation code.
    async fn find_transition(
        &self,
        tenant: &TenantId,
        from: &StateId,
        operation_code: &str,
    ) -> StorageResult<Option<LifecycleTransition>>;

    /// Gates for a transition, in storage order. Evaluation order matters:
    /// the first blocking gate short-circuits the rest.
    async fn gates_for_transition(
        &self,
        tenant: &TenantId,
        transition_id: &TransitionId,
    ) -> StorageResult<Vec<TransitionGate>>;

    async fn get_template(
        &self,
        tenant: &TenantId,
        id: &ApprovalTemplateId,
    ) -> StorageResult<Option<ApprovalTemplate>>;
}

/// Storage interface for the per-entity lifecycle position.
#[async_trait]
pub trait LifecycleStore: Send + Sync {
    async fn put_lifecycle_instance(&self, instance: LifecycleInstance) -> StorageResult<()>;

    async fn get_lifecycle_instance(
        &self,
        tenant: &TenantId,
        entity: &EntityRef,
    ) -> StorageResult<Option<LifecycleInstance>>;

    /// Conditionally advance the entity to a new state.
    ///
    /// Returns `Conflict` when the stored state is not `expected_from`,
    /// so a stale or concurrent caller cannot double-apply a transition.
    async fn advance_lifecycle_instance(
        &self,
        tenant: &TenantId,
        entity: &EntityRef,
        expected_from: &StateId,
        to: &StateId,
        updated_by: &PrincipalId,
    ) -> StorageResult<LifecycleInstance>;
}

/// Storage interface for approval instances, stages, tasks, and snapshots.
///
/// All terminal mutations are guarded conditional writes: the caller
/// states the status it expects, and a mismatch returns `Conflict`
/// instead of overwriting. That is what lets two concurrent decision
/// evaluations agree on a single completion.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Insert an instance with its stages, tasks, and assignment snapshot
    /// as one logical unit. Enforces the at-most-one-open-instance
    /// invariant per (tenant, entity) under the same write lock as the
    /// existence check; a partial graph is never observable.
    async fn insert_instance_graph(
        &self,
        instance: ApprovalInstance,
        stages: Vec<ApprovalStage>,
        tasks: Vec<ApprovalTask>,
        snapshot: AssignmentSnapshot,
    ) -> StorageResult<()>;

    async fn get_instance(
        &self,
        tenant: &TenantId,
        id: &ApprovalInstanceId,
    ) -> StorageResult<Option<ApprovalInstance>>;

    /// The single `Open` instance for an entity, if any.
    async fn find_open_for_entity(
        &self,
        tenant: &TenantId,
        entity: &EntityRef,
    ) -> StorageResult<Option<ApprovalInstance>>;

    /// The newest instance for an entity regardless of status. Gate
    /// evaluation needs terminal instances visible to distinguish
    /// "completed" from "never requested".
    async fn find_latest_for_entity(
        &self,
        tenant: &TenantId,
        entity: &EntityRef,
    ) -> StorageResult<Option<ApprovalInstance>>;

    async fn get_snapshot(
        &self,
        tenant: &TenantId,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Option<AssignmentSnapshot>>;

    async fn get_stage(&self, tenant: &TenantId, id: &StageId)
        -> StorageResult<Option<ApprovalStage>>;

    /// Stages of an instance ordered by `stage_no`.
    async fn stages_for_instance(
        &self,
        tenant: &TenantId,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Vec<ApprovalStage>>;

    async fn get_task(&self, tenant: &TenantId, id: &TaskId)
        -> StorageResult<Option<ApprovalTask>>;

    async fn tasks_for_instance(
        &self,
        tenant: &TenantId,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Vec<ApprovalTask>>;

    async fn tasks_for_stage(
        &self,
        tenant: &TenantId,
        stage_id: &StageId,
    ) -> StorageResult<Vec<ApprovalTask>>;

    /// Pending inbox for one principal across all instances of a tenant.
    async fn tasks_for_assignee(
        &self,
        tenant: &TenantId,
        assignee: &PrincipalId,
    ) -> StorageResult<Vec<ApprovalTask>>;

    /// Add tasks to an existing instance, used when a later stage
    /// activates from the assignment snapshot.
    async fn insert_tasks(&self, tenant: &TenantId, tasks: Vec<ApprovalTask>) -> StorageResult<()>;

    /// Record a decision on a pending task. Returns `Conflict` when the
    /// task already left `Pending`; a task decides exactly once.
    async fn decide_task(
        &self,
        tenant: &TenantId,
        task_id: &TaskId,
        status: TaskStatus,
        decided_by: PrincipalId,
        note: Option<String>,
    ) -> StorageResult<ApprovalTask>;

    /// Conditionally move a stage from `expected_from` to `to`.
    async fn transition_stage(
        &self,
        tenant: &TenantId,
        stage_id: &StageId,
        expected_from: StageStatus,
        to: StageStatus,
    ) -> StorageResult<ApprovalStage>;

    /// Conditionally move an instance out of `expected_from`, stamping
    /// the terminal outcome and merging any context entries.
    async fn transition_instance(
        &self,
        tenant: &TenantId,
        instance_id: &ApprovalInstanceId,
        expected_from: InstanceStatus,
        to: InstanceStatus,
        outcome: Option<InstanceOutcome>,
        context: Option<Map<String, Value>>,
    ) -> StorageResult<ApprovalInstance>;
}

/// Append-only event log, instance-scoped.
#[async_trait]
pub trait ApprovalEventStore: Send + Sync {
    /// Append an event and return it with its assigned per-instance
    /// sequence number.
    async fn append_event(
        &self,
        tenant: &TenantId,
        draft: ApprovalEventDraft,
    ) -> StorageResult<ApprovalEvent>;

    /// Events for an instance ordered by sequence.
    async fn events_for_instance(
        &self,
        tenant: &TenantId,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Vec<ApprovalEvent>>;
}

/// Unified storage bundle consumed by the engine.
pub trait ProcessStore:
    DefinitionStore + LifecycleStore + ApprovalStore + ApprovalEventStore + Send + Sync
{
}

impl<T> ProcessStore for T where
    T: DefinitionStore + LifecycleStore + ApprovalStore + ApprovalEventStore + Send + Sync
{
}
