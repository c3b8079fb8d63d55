//! In-memory reference implementation for the process storage traits.
//!
//! This adapter is deterministic and test-friendly. Production deployments
//! should use a transactional backend for source-of-truth data.
//!
//! Runtime tables live behind a single `RwLock` each: the approval write
//! lock serializes the existence check and insert of
//! `insert_instance_graph`, which is what upholds the one-open-instance
//! invariant, and makes every guarded conditional write atomic.

use crate::traits::{ApprovalEventStore, ApprovalStore, DefinitionStore, LifecycleStore};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use process_types::{
    ApprovalEvent, ApprovalEventDraft, ApprovalInstance, ApprovalInstanceId, ApprovalStage,
    ApprovalTask, ApprovalTemplate, ApprovalTemplateId, AssignmentSnapshot, EntityRef,
    InstanceOutcome, InstanceStatus, LifecycleInstance, LifecycleState, LifecycleTransition,
    PrincipalId, StageId, StageStatus, StateId, TaskId, TaskStatus, TenantId, TransitionGate,
    TransitionId,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Definitions {
    states: HashMap<(TenantId, StateId), LifecycleState>,
    // Vecs preserve registration order; gate evaluation order is storage order
    transitions: Vec<(TenantId, LifecycleTransition)>,
    gates: Vec<(TenantId, TransitionGate)>,
    templates: HashMap<(TenantId, ApprovalTemplateId), ApprovalTemplate>,
}

#[derive(Default)]
struct ApprovalTables {
    // Insertion order doubles as creation order for deterministic reads
    instances: Vec<ApprovalInstance>,
    stages: Vec<ApprovalStage>,
    tasks: Vec<ApprovalTask>,
    snapshots: Vec<AssignmentSnapshot>,
    events: HashMap<ApprovalInstanceId, Vec<ApprovalEvent>>,
}

impl ApprovalTables {
    fn instance(&self, tenant: &TenantId, id: &ApprovalInstanceId) -> Option<&ApprovalInstance> {
        self.instances
            .iter()
            .find(|i| &i.tenant_id == tenant && &i.id == id)
    }

    fn owns_instance(&self, tenant: &TenantId, id: &ApprovalInstanceId) -> bool {
        self.instance(tenant, id).is_some()
    }
}

/// In-memory process storage adapter.
#[derive(Default)]
pub struct InMemoryProcessStore {
    definitions: RwLock<Definitions>,
    lifecycles: RwLock<HashMap<(TenantId, EntityRef), LifecycleInstance>>,
    approvals: RwLock<ApprovalTables>,
}

impl InMemoryProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_definitions(&self) -> StorageResult<RwLockReadGuard<'_, Definitions>> {
        self.definitions
            .read()
            .map_err(|_| StorageError::Backend("definitions lock poisoned".to_string()))
    }

    fn write_definitions(&self) -> StorageResult<RwLockWriteGuard<'_, Definitions>> {
        self.definitions
            .write()
            .map_err(|_| StorageError::Backend("definitions lock poisoned".to_string()))
    }

    fn read_approvals(&self) -> StorageResult<RwLockReadGuard<'_, ApprovalTables>> {
        self.approvals
            .read()
            .map_err(|_| StorageError::Backend("approvals lock poisoned".to_string()))
    }

    fn write_approvals(&self) -> StorageResult<RwLockWriteGuard<'_, ApprovalTables>> {
        self.approvals
            .write()
            .map_err(|_| StorageError::Backend("approvals lock poisoned".to_string()))
    }
}

#[async_trait]
impl DefinitionStore for InMemoryProcessStore {
    async fn put_state(&self, tenant: &TenantId, state: LifecycleState) -> StorageResult<()> {
        let mut guard = self.write_definitions()?;
        guard
            .states
            .insert((tenant.clone(), state.id.clone()), state);
        Ok(())
    }

    async fn put_transition(
        &self,
        tenant: &TenantId,
        transition: LifecycleTransition,
    ) -> StorageResult<()> {
        let mut guard = self.write_definitions()?;
        guard.transitions.push((tenant.clone(), transition));
        Ok(())
    }

    async fn put_gate(&self, tenant: &TenantId, gate: TransitionGate) -> StorageResult<()> {
        let mut guard = self.write_definitions()?;
        guard.gates.push((tenant.clone(), gate));
        Ok(())
    }

    async fn put_template(
        &self,
        tenant: &TenantId,
        template: ApprovalTemplate,
    ) -> StorageResult<()> {
        let mut guard = self.write_definitions()?;
        guard
            .templates
            .insert((tenant.clone(), template.id.clone()), template);
        Ok(())
    }

    async fn get_state(
        &self,
        tenant: &TenantId,
        id: &StateId,
    ) -> StorageResult<Option<LifecycleState>> {
        let guard = self.read_definitions()?;
        Ok(guard.states.get(&(tenant.clone(), id.clone())).cloned())
    }

    async fn get_transition(
        &self,
        tenant: &TenantId,
        id: &TransitionId,
    ) -> StorageResult<Option<LifecycleTransition>> {
        let guard = self.read_definitions()?;
        Ok(guard
            .transitions
            .iter()
            .find(|(t, transition)| t == tenant && &transition.id == id)
            .map(|(_, transition)| transition.clone()))
    }

    async fn find_transition(
        &self,
        tenant: &TenantId,
        from: &StateId,
        operation_code: &str,
    ) -> StorageResult<Option<LifecycleTransition>> {
        let guard = self.read_definitions()?;
        Ok(guard
            .transitions
            .iter()
            .find(|(t, transition)| {
                t == tenant
                    && transition.is_active
                    && &transition.from_state_id == from
                    && transition.operation_code == operation_code
            })
            .map(|(_, transition)| transition.clone()))
    }

    async fn gates_for_transition(
        &self,
        tenant: &TenantId,
        transition_id: &TransitionId,
    ) -> StorageResult<Vec<TransitionGate>> {
        let guard = self.read_definitions()?;
        Ok(guard
            .gates
            .iter()
            .filter(|(t, gate)| t == tenant && &gate.transition_id == transition_id)
            .map(|(_, gate)| gate.clone())
            .collect())
    }

    async fn get_template(
        &self,
        tenant: &TenantId,
        id: &ApprovalTemplateId,
    ) -> StorageResult<Option<ApprovalTemplate>> {
        let guard = self.read_definitions()?;
        Ok(guard.templates.get(&(tenant.clone(), id.clone())).cloned())
    }
}

#[async_trait]
impl LifecycleStore for InMemoryProcessStore {
    async fn put_lifecycle_instance(&self, instance: LifecycleInstance) -> StorageResult<()> {
        let mut guard = self
            .lifecycles
            .write()
            .map_err(|_| StorageError::Backend("lifecycles lock poisoned".to_string()))?;
        guard.insert(
            (instance.tenant_id.clone(), instance.entity.clone()),
            instance,
        );
        Ok(())
    }

    async fn get_lifecycle_instance(
        &self,
        tenant: &TenantId,
        entity: &EntityRef,
    ) -> StorageResult<Option<LifecycleInstance>> {
        let guard = self
            .lifecycles
            .read()
            .map_err(|_| StorageError::Backend("lifecycles lock poisoned".to_string()))?;
        Ok(guard.get(&(tenant.clone(), entity.clone())).cloned())
    }

    async fn advance_lifecycle_instance(
        &self,
        tenant: &TenantId,
        entity: &EntityRef,
        expected_from: &StateId,
        to: &StateId,
        updated_by: &PrincipalId,
    ) -> StorageResult<LifecycleInstance> {
        let mut guard = self
            .lifecycles
            .write()
            .map_err(|_| StorageError::Backend("lifecycles lock poisoned".to_string()))?;
        let instance = guard
            .get_mut(&(tenant.clone(), entity.clone()))
            .ok_or_else(|| {
                StorageError::NotFound(format!("lifecycle instance for {} not found", entity))
            })?;

        if &instance.state_id != expected_from {
            return Err(StorageError::Conflict(format!(
                "lifecycle instance for {} is in state {}, expected {}",
                entity, instance.state_id, expected_from
            )));
        }

        instance.state_id = to.clone();
        instance.updated_at = Utc::now();
        instance.updated_by = updated_by.clone();
        Ok(instance.clone())
    }
}

#[async_trait]
impl ApprovalStore for InMemoryProcessStore {
    async fn insert_instance_graph(
        &self,
        instance: ApprovalInstance,
        stages: Vec<ApprovalStage>,
        tasks: Vec<ApprovalTask>,
        snapshot: AssignmentSnapshot,
    ) -> StorageResult<()> {
        // Ownership must be consistent before anything becomes visible
        if stages.iter().any(|s| s.approval_instance_id != instance.id)
            || tasks.iter().any(|t| t.approval_instance_id != instance.id)
            || snapshot.approval_instance_id != instance.id
        {
            return Err(StorageError::InvalidInput(
                "instance graph rows must reference the inserted instance".to_string(),
            ));
        }
        if tasks
            .iter()
            .any(|t| !stages.iter().any(|s| s.id == t.approval_stage_id))
        {
            return Err(StorageError::InvalidInput(
                "every task must belong to one of the inserted stages".to_string(),
            ));
        }

        let mut guard = self.write_approvals()?;

        // Check-then-insert under the write lock: at most one open
        // instance per (tenant, entity)
        let open_exists = guard.instances.iter().any(|existing| {
            existing.tenant_id == instance.tenant_id
                && existing.entity == instance.entity
                && existing.status == InstanceStatus::Open
        });
        if open_exists {
            return Err(StorageError::InvariantViolation(format!(
                "an open approval instance already exists for {}",
                instance.entity
            )));
        }

        guard.events.insert(instance.id.clone(), Vec::new());
        guard.instances.push(instance);
        guard.stages.extend(stages);
        guard.tasks.extend(tasks);
        guard.snapshots.push(snapshot);
        Ok(())
    }

    async fn get_instance(
        &self,
        tenant: &TenantId,
        id: &ApprovalInstanceId,
    ) -> StorageResult<Option<ApprovalInstance>> {
        let guard = self.read_approvals()?;
        Ok(guard.instance(tenant, id).cloned())
    }

    async fn find_open_for_entity(
        &self,
        tenant: &TenantId,
        entity: &EntityRef,
    ) -> StorageResult<Option<ApprovalInstance>> {
        let guard = self.read_approvals()?;
        Ok(guard
            .instances
            .iter()
            .find(|i| {
                &i.tenant_id == tenant && &i.entity == entity && i.status == InstanceStatus::Open
            })
            .cloned())
    }

    async fn find_latest_for_entity(
        &self,
        tenant: &TenantId,
        entity: &EntityRef,
    ) -> StorageResult<Option<ApprovalInstance>> {
        let guard = self.read_approvals()?;
        Ok(guard
            .instances
            .iter()
            .filter(|i| &i.tenant_id == tenant && &i.entity == entity)
            .last()
            .cloned())
    }

    async fn get_snapshot(
        &self,
        tenant: &TenantId,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Option<AssignmentSnapshot>> {
        let guard = self.read_approvals()?;
        if !guard.owns_instance(tenant, instance_id) {
            return Ok(None);
        }
        Ok(guard
            .snapshots
            .iter()
            .find(|s| &s.approval_instance_id == instance_id)
            .cloned())
    }

    async fn get_stage(
        &self,
        tenant: &TenantId,
        id: &StageId,
    ) -> StorageResult<Option<ApprovalStage>> {
        let guard = self.read_approvals()?;
        Ok(guard
            .stages
            .iter()
            .find(|s| s.id == *id && guard.owns_instance(tenant, &s.approval_instance_id))
            .cloned())
    }

    async fn stages_for_instance(
        &self,
        tenant: &TenantId,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Vec<ApprovalStage>> {
        let guard = self.read_approvals()?;
        if !guard.owns_instance(tenant, instance_id) {
            return Ok(Vec::new());
        }
        let mut stages: Vec<ApprovalStage> = guard
            .stages
            .iter()
            .filter(|s| &s.approval_instance_id == instance_id)
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.stage_no);
        Ok(stages)
    }

    async fn get_task(
        &self,
        tenant: &TenantId,
        id: &TaskId,
    ) -> StorageResult<Option<ApprovalTask>> {
        let guard = self.read_approvals()?;
        Ok(guard
            .tasks
            .iter()
            .find(|t| t.id == *id && guard.owns_instance(tenant, &t.approval_instance_id))
            .cloned())
    }

    async fn tasks_for_instance(
        &self,
        tenant: &TenantId,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Vec<ApprovalTask>> {
        let guard = self.read_approvals()?;
        if !guard.owns_instance(tenant, instance_id) {
            return Ok(Vec::new());
        }
        Ok(guard
            .tasks
            .iter()
            .filter(|t| &t.approval_instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn tasks_for_stage(
        &self,
        tenant: &TenantId,
        stage_id: &StageId,
    ) -> StorageResult<Vec<ApprovalTask>> {
        let guard = self.read_approvals()?;
        Ok(guard
            .tasks
            .iter()
            .filter(|t| {
                &t.approval_stage_id == stage_id
                    && guard.owns_instance(tenant, &t.approval_instance_id)
            })
            .cloned()
            .collect())
    }

    async fn tasks_for_assignee(
        &self,
        tenant: &TenantId,
        assignee: &PrincipalId,
    ) -> StorageResult<Vec<ApprovalTask>> {
        let guard = self.read_approvals()?;
        Ok(guard
            .tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && matches!(&t.assignee, process_types::Assignee::Principal(p) if p == assignee)
                    && guard.owns_instance(tenant, &t.approval_instance_id)
            })
            .cloned()
            .collect())
    }

    async fn insert_tasks(&self, tenant: &TenantId, tasks: Vec<ApprovalTask>) -> StorageResult<()> {
        let mut guard = self.write_approvals()?;
        for task in &tasks {
            if !guard.owns_instance(tenant, &task.approval_instance_id) {
                return Err(StorageError::NotFound(format!(
                    "approval instance {} not found",
                    task.approval_instance_id
                )));
            }
        }
        guard.tasks.extend(tasks);
        Ok(())
    }

    async fn decide_task(
        &self,
        tenant: &TenantId,
        task_id: &TaskId,
        status: TaskStatus,
        decided_by: PrincipalId,
        note: Option<String>,
    ) -> StorageResult<ApprovalTask> {
        if status == TaskStatus::Pending {
            return Err(StorageError::InvalidInput(
                "a decision must move the task to a terminal status".to_string(),
            ));
        }

        let mut guard = self.write_approvals()?;
        let owned: Vec<ApprovalInstanceId> = guard
            .instances
            .iter()
            .filter(|i| &i.tenant_id == tenant)
            .map(|i| i.id.clone())
            .collect();
        let task = guard
            .tasks
            .iter_mut()
            .find(|t| &t.id == task_id && owned.contains(&t.approval_instance_id))
            .ok_or_else(|| StorageError::NotFound(format!("task {} not found", task_id)))?;

        if task.status != TaskStatus::Pending {
            return Err(StorageError::Conflict(format!(
                "task {} is {}, expected pending",
                task_id, task.status
            )));
        }

        task.status = status;
        task.decided_by = Some(decided_by);
        task.decision_note = note;
        task.decided_at = Some(Utc::now());
        Ok(task.clone())
    }

    async fn transition_stage(
        &self,
        tenant: &TenantId,
        stage_id: &StageId,
        expected_from: StageStatus,
        to: StageStatus,
    ) -> StorageResult<ApprovalStage> {
        let mut guard = self.write_approvals()?;
        let owned: Vec<ApprovalInstanceId> = guard
            .instances
            .iter()
            .filter(|i| &i.tenant_id == tenant)
            .map(|i| i.id.clone())
            .collect();
        let stage = guard
            .stages
            .iter_mut()
            .find(|s| &s.id == stage_id && owned.contains(&s.approval_instance_id))
            .ok_or_else(|| StorageError::NotFound(format!("stage {} not found", stage_id)))?;

        if stage.status != expected_from {
            return Err(StorageError::Conflict(format!(
                "stage {} is {}, expected {}",
                stage_id, stage.status, expected_from
            )));
        }

        stage.status = to;
        Ok(stage.clone())
    }

    async fn transition_instance(
        &self,
        tenant: &TenantId,
        instance_id: &ApprovalInstanceId,
        expected_from: InstanceStatus,
        to: InstanceStatus,
        outcome: Option<InstanceOutcome>,
        context: Option<Map<String, Value>>,
    ) -> StorageResult<ApprovalInstance> {
        let mut guard = self.write_approvals()?;
        let instance = guard
            .instances
            .iter_mut()
            .find(|i| &i.tenant_id == tenant && &i.id == instance_id)
            .ok_or_else(|| {
                StorageError::NotFound(format!("approval instance {} not found", instance_id))
            })?;

        if instance.status != expected_from {
            return Err(StorageError::Conflict(format!(
                "approval instance {} is {}, expected {}",
                instance_id, instance.status, expected_from
            )));
        }

        instance.status = to;
        if outcome.is_some() {
            instance.outcome = outcome;
        }
        if let Some(entries) = context {
            for (key, value) in entries {
                instance.context.insert(key, value);
            }
        }
        Ok(instance.clone())
    }
}

#[async_trait]
impl ApprovalEventStore for InMemoryProcessStore {
    async fn append_event(
        &self,
        tenant: &TenantId,
        draft: ApprovalEventDraft,
    ) -> StorageResult<ApprovalEvent> {
        let mut guard = self.write_approvals()?;
        if !guard.owns_instance(tenant, &draft.approval_instance_id) {
            return Err(StorageError::NotFound(format!(
                "approval instance {} not found",
                draft.approval_instance_id
            )));
        }

        let log = guard
            .events
            .entry(draft.approval_instance_id.clone())
            .or_default();
        let sequence = log.len() as u64 + 1;
        let event = ApprovalEvent::from_draft(draft, sequence);
        log.push(event.clone());
        Ok(event)
    }

    async fn events_for_instance(
        &self,
        tenant: &TenantId,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Vec<ApprovalEvent>> {
        let guard = self.read_approvals()?;
        if !guard.owns_instance(tenant, instance_id) {
            return Ok(Vec::new());
        }
        Ok(guard.events.get(instance_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use process_types::{
        ApprovalEventKind, Assignee, LifecycleId, StageAssignment, StageMode, TaskKind,
    };

    fn tenant() -> TenantId {
        TenantId::new("tenant-1")
    }

    fn entity() -> EntityRef {
        EntityRef::new("travel_request", "tr-1")
    }

    fn graph() -> (
        ApprovalInstance,
        Vec<ApprovalStage>,
        Vec<ApprovalTask>,
        AssignmentSnapshot,
    ) {
        let instance = ApprovalInstance::new(
            tenant(),
            entity(),
            ApprovalTemplateId::new("tmpl-1"),
            PrincipalId::new("creator"),
        );
        let stage = ApprovalStage::new(
            instance.id.clone(),
            1,
            "Manager",
            StageMode::All,
            StageStatus::Active,
        );
        let task = ApprovalTask::new(
            instance.id.clone(),
            stage.id.clone(),
            Assignee::Principal(PrincipalId::new("approver-1")),
            TaskKind::Approver,
        );
        let snapshot = AssignmentSnapshot::new(
            instance.id.clone(),
            vec![StageAssignment {
                stage_no: 1,
                approvers: vec![Assignee::Principal(PrincipalId::new("approver-1"))],
                observers: vec![],
            }],
        );
        (instance, vec![stage], vec![task], snapshot)
    }

    #[tokio::test]
    async fn test_graph_insert_and_lookups() {
        let store = InMemoryProcessStore::new();
        let (instance, stages, tasks, snapshot) = graph();
        let instance_id = instance.id.clone();
        let stage_id = stages[0].id.clone();

        store
            .insert_instance_graph(instance, stages, tasks, snapshot)
            .await
            .unwrap();

        let open = store
            .find_open_for_entity(&tenant(), &entity())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(open.id, instance_id);

        let stages = store
            .stages_for_instance(&tenant(), &instance_id)
            .await
            .unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].id, stage_id);

        let tasks = store
            .tasks_for_stage(&tenant(), &stage_id)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);

        assert!(store
            .get_snapshot(&tenant(), &instance_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_second_open_instance_violates_invariant() {
        let store = InMemoryProcessStore::new();
        let (instance, stages, tasks, snapshot) = graph();
        store
            .insert_instance_graph(instance, stages, tasks, snapshot)
            .await
            .unwrap();

        let (instance, stages, tasks, snapshot) = graph();
        let err = store
            .insert_instance_graph(instance, stages, tasks, snapshot)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_terminal_instance_allows_new_open_instance() {
        let store = InMemoryProcessStore::new();
        let (instance, stages, tasks, snapshot) = graph();
        let first_id = instance.id.clone();
        store
            .insert_instance_graph(instance, stages, tasks, snapshot)
            .await
            .unwrap();
        store
            .transition_instance(
                &tenant(),
                &first_id,
                InstanceStatus::Open,
                InstanceStatus::Canceled,
                Some(InstanceOutcome::Rejected),
                None,
            )
            .await
            .unwrap();

        let (instance, stages, tasks, snapshot) = graph();
        store
            .insert_instance_graph(instance, stages, tasks, snapshot)
            .await
            .unwrap();

        // latest wins for the history lookup
        let latest = store
            .find_latest_for_entity(&tenant(), &entity())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(latest.id, first_id);
        assert_eq!(latest.status, InstanceStatus::Open);
    }

    #[tokio::test]
    async fn test_decide_task_is_exactly_once() {
        let store = InMemoryProcessStore::new();
        let (instance, stages, tasks, snapshot) = graph();
        let task_id = tasks[0].id.clone();
        store
            .insert_instance_graph(instance, stages, tasks, snapshot)
            .await
            .unwrap();

        let decided = store
            .decide_task(
                &tenant(),
                &task_id,
                TaskStatus::Approved,
                PrincipalId::new("approver-1"),
                Some("ok".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(decided.status, TaskStatus::Approved);
        assert!(decided.decided_at.is_some());

        let err = store
            .decide_task(
                &tenant(),
                &task_id,
                TaskStatus::Rejected,
                PrincipalId::new("approver-1"),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_transition_stage_conflict_on_stale_expectation() {
        let store = InMemoryProcessStore::new();
        let (instance, stages, tasks, snapshot) = graph();
        let stage_id = stages[0].id.clone();
        store
            .insert_instance_graph(instance, stages, tasks, snapshot)
            .await
            .unwrap();

        store
            .transition_stage(
                &tenant(),
                &stage_id,
                StageStatus::Active,
                StageStatus::Completed,
            )
            .await
            .unwrap();

        let err = store
            .transition_stage(
                &tenant(),
                &stage_id,
                StageStatus::Active,
                StageStatus::Completed,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let stage = store.get_stage(&tenant(), &stage_id).await.unwrap().unwrap();
        assert_eq!(stage.status, StageStatus::Completed);
    }

    #[tokio::test]
    async fn test_advance_lifecycle_instance_is_conditional() {
        let store = InMemoryProcessStore::new();
        let draft = StateId::new("draft");
        let submitted = StateId::new("submitted");
        store
            .put_lifecycle_instance(LifecycleInstance::new(
                tenant(),
                entity(),
                LifecycleId::new("lc-1"),
                draft.clone(),
                PrincipalId::new("creator"),
            ))
            .await
            .unwrap();

        store
            .advance_lifecycle_instance(
                &tenant(),
                &entity(),
                &draft,
                &submitted,
                &PrincipalId::new("user-1"),
            )
            .await
            .unwrap();

        // stale expectation after the first advance
        let err = store
            .advance_lifecycle_instance(
                &tenant(),
                &entity(),
                &draft,
                &submitted,
                &PrincipalId::new("user-1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_events_sequence_per_instance() {
        let store = InMemoryProcessStore::new();
        let (instance, stages, tasks, snapshot) = graph();
        let instance_id = instance.id.clone();
        store
            .insert_instance_graph(instance, stages, tasks, snapshot)
            .await
            .unwrap();

        for kind in [ApprovalEventKind::InstanceCreated, ApprovalEventKind::DecisionMade] {
            store
                .append_event(
                    &tenant(),
                    ApprovalEventDraft::new(instance_id.clone(), kind, PrincipalId::new("u")),
                )
                .await
                .unwrap();
        }

        let events = store
            .events_for_instance(&tenant(), &instance_id)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[1].sequence, 2);
    }

    #[tokio::test]
    async fn test_tenant_isolation_on_reads() {
        let store = InMemoryProcessStore::new();
        let (instance, stages, tasks, snapshot) = graph();
        let instance_id = instance.id.clone();
        let task_id = tasks[0].id.clone();
        store
            .insert_instance_graph(instance, stages, tasks, snapshot)
            .await
            .unwrap();

        let other = TenantId::new("tenant-2");
        assert!(store
            .get_instance(&other, &instance_id)
            .await
            .unwrap()
            .is_none());
        assert!(store.get_task(&other, &task_id).await.unwrap().is_none());
        assert!(store
            .tasks_for_instance(&other, &instance_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_tasks_for_assignee_lists_pending_only() {
        let store = InMemoryProcessStore::new();
        let (instance, stages, tasks, snapshot) = graph();
        let task_id = tasks[0].id.clone();
        store
            .insert_instance_graph(instance, stages, tasks, snapshot)
            .await
            .unwrap();

        let approver = PrincipalId::new("approver-1");
        assert_eq!(
            store
                .tasks_for_assignee(&tenant(), &approver)
                .await
                .unwrap()
                .len(),
            1
        );

        store
            .decide_task(&tenant(), &task_id, TaskStatus::Approved, approver.clone(), None)
            .await
            .unwrap();
        assert!(store
            .tasks_for_assignee(&tenant(), &approver)
            .await
            .unwrap()
            .is_empty());
    }
}
