//! Decision Processor: task decision → stage completion → instance
//! completion → transition resumption
//!
//! Every `make_decision` call is a fresh, stateless invocation against
//! durable storage; approvers respond out of band and no caller owns the
//! workflow lifetime. Concurrency safety comes from the store's guarded
//! conditional writes: when two decisions race toward the same stage or
//! instance completion, the second writer observes `Conflict` and
//! no-ops instead of duplicating the completion or the resumption.

use crate::error::EngineResult;
use crate::manager::ApprovalInstanceManager;
use crate::timers::EscalationTimers;
use async_trait::async_trait;
use process_audit::{AuditEvent, AuditLogger};
use process_storage::{ProcessStore, StorageError};
use process_types::{
    ApprovalEventDraft, ApprovalEventKind, ApprovalStage, ApprovalTask, Decision, EntityRef,
    ExternalStatus, InstanceOutcome, InstanceStatus, RequestContext, StageDisposition, StageMode,
    StageOutcome, StageStatus, TaskId, TaskKind, TaskStatus, TransitionId, CONTEXT_REASON_KEY,
};
use std::sync::Arc;

/// Resumes a lifecycle transition once its blocking approval completes.
///
/// The orchestrator implements this; injecting the narrow trait instead
/// of the orchestrator itself keeps the two subsystems free of a
/// compile-time cycle.
#[async_trait]
pub trait TransitionResumer: Send + Sync {
    async fn resume_transition(
        &self,
        entity: &EntityRef,
        transition_id: &TransitionId,
        ctx: &RequestContext,
    ) -> EngineResult<ResumeOutcome>;
}

/// What happened when a completed instance replayed its transition.
#[derive(Clone, Debug)]
pub struct ResumeOutcome {
    pub success: bool,
    pub reason: Option<String>,
}

/// A decision submitted by an approver.
#[derive(Clone, Debug)]
pub struct DecisionRequest {
    pub task_id: TaskId,
    pub decision: Decision,
    pub note: Option<String>,
}

/// Result of one decision, reflecting whatever was actually mutated.
/// `stage_status`/`instance_status` stay `None` when the stage or
/// instance did not reach a verdict on this call.
#[derive(Clone, Debug)]
pub struct DecisionOutcome {
    pub success: bool,
    pub task_status: Option<TaskStatus>,
    pub stage_status: Option<StageDisposition>,
    pub instance_status: Option<ExternalStatus>,
    pub error: Option<String>,
}

impl DecisionOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            task_status: None,
            stage_status: None,
            instance_status: None,
            error: Some(error.into()),
        }
    }

    fn decided(task_status: TaskStatus) -> Self {
        Self {
            success: true,
            task_status: Some(task_status),
            stage_status: None,
            instance_status: None,
            error: None,
        }
    }
}

/// The task-decision state machine.
pub struct DecisionProcessor {
    store: Arc<dyn ProcessStore>,
    manager: Arc<ApprovalInstanceManager>,
    timers: Arc<dyn EscalationTimers>,
    audit: Arc<dyn AuditLogger>,
    resumer: Arc<dyn TransitionResumer>,
}

impl DecisionProcessor {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        manager: Arc<ApprovalInstanceManager>,
        timers: Arc<dyn EscalationTimers>,
        audit: Arc<dyn AuditLogger>,
        resumer: Arc<dyn TransitionResumer>,
    ) -> Self {
        Self {
            store,
            manager,
            timers,
            audit,
            resumer,
        }
    }

    /// Apply one decision: mutate the task, re-evaluate its stage, and
    /// if the stage settles, re-evaluate the instance.
    ///
    /// Validation failures (`Task not found`, `Task not pending`) come
    /// back as structured results; storage failures abort the whole
    /// operation.
    pub async fn make_decision(
        &self,
        request: DecisionRequest,
        ctx: &RequestContext,
    ) -> EngineResult<DecisionOutcome> {
        let tenant = &ctx.tenant_id;

        let Some(task) = self.store.get_task(tenant, &request.task_id).await? else {
            return Ok(DecisionOutcome::failed("Task not found"));
        };
        if task.status != TaskStatus::Pending {
            return Ok(DecisionOutcome::failed("Task not pending"));
        }

        let new_status = request.decision.task_status();
        let task = match self
            .store
            .decide_task(
                tenant,
                &request.task_id,
                new_status,
                ctx.user_id.clone(),
                request.note.clone(),
            )
            .await
        {
            Ok(task) => task,
            // Raced with another decision on the same task
            Err(StorageError::Conflict(_)) => {
                return Ok(DecisionOutcome::failed("Task not pending"));
            }
            Err(err) => return Err(err.into()),
        };

        self.cancel_timers(&task, ctx).await?;

        let mut decided_event = ApprovalEventDraft::new(
            task.approval_instance_id.clone(),
            ApprovalEventKind::DecisionMade,
            ctx.user_id.clone(),
        )
        .with_comment(
            request
                .note
                .clone()
                .unwrap_or_else(|| format!("{}", request.decision)),
        );
        if self.manager.record_event_payloads() {
            decided_event = decided_event.with_payload(serde_json::json!({
                "task_id": task.id.0,
                "decision": request.decision,
            }));
        }
        self.store.append_event(tenant, decided_event).await?;

        let mut outcome = DecisionOutcome::decided(new_status);

        let Some(stage) = self.store.get_stage(tenant, &task.approval_stage_id).await? else {
            return Err(StorageError::NotFound(format!(
                "stage {} not found for decided task",
                task.approval_stage_id
            ))
            .into());
        };

        let stage_tasks = self
            .store
            .tasks_for_stage(tenant, &task.approval_stage_id)
            .await?;
        let Some(stage_outcome) = evaluate_stage(stage.mode, &stage_tasks) else {
            return Ok(outcome);
        };

        // Conditional write: the loser of a completion race no-ops here
        let target = match stage_outcome {
            StageOutcome::Approved => StageStatus::Completed,
            StageOutcome::Rejected => StageStatus::Canceled,
        };
        match self
            .store
            .transition_stage(tenant, &stage.id, StageStatus::Active, target)
            .await
        {
            Ok(_) => {}
            Err(StorageError::Conflict(_)) => return Ok(outcome),
            Err(err) => return Err(err.into()),
        }

        let stage_event = match stage_outcome {
            StageOutcome::Approved => ApprovalEventKind::StageCompleted,
            StageOutcome::Rejected => ApprovalEventKind::StageRejected,
        };
        let mut stage_draft = ApprovalEventDraft::new(
            task.approval_instance_id.clone(),
            stage_event,
            ctx.user_id.clone(),
        );
        if self.manager.record_event_payloads() {
            stage_draft =
                stage_draft.with_payload(serde_json::json!({ "stage_no": stage.stage_no }));
        }
        self.store.append_event(tenant, stage_draft).await?;

        outcome.stage_status = Some(match stage_outcome {
            StageOutcome::Approved => StageDisposition::Completed,
            StageOutcome::Rejected => StageDisposition::Rejected,
        });

        match stage_outcome {
            StageOutcome::Rejected => {
                self.reject_instance(&task, ctx, &mut outcome).await?;
            }
            StageOutcome::Approved => {
                self.advance_or_complete(&task, &stage, ctx, &mut outcome)
                    .await?;
            }
        }

        Ok(outcome)
    }

    /// A rejected stage rejects the whole instance. The blocked lifecycle
    /// transition is never resumed; the entity stays where it was.
    async fn reject_instance(
        &self,
        task: &ApprovalTask,
        ctx: &RequestContext,
        outcome: &mut DecisionOutcome,
    ) -> EngineResult<()> {
        let tenant = &ctx.tenant_id;
        let mut context = serde_json::Map::new();
        context.insert(
            CONTEXT_REASON_KEY.to_string(),
            serde_json::json!("rejected"),
        );

        let instance = match self
            .store
            .transition_instance(
                tenant,
                &task.approval_instance_id,
                InstanceStatus::Open,
                InstanceStatus::Canceled,
                Some(InstanceOutcome::Rejected),
                Some(context),
            )
            .await
        {
            Ok(instance) => instance,
            Err(StorageError::Conflict(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        self.store
            .append_event(
                tenant,
                ApprovalEventDraft::new(
                    task.approval_instance_id.clone(),
                    ApprovalEventKind::InstanceRejected,
                    ctx.user_id.clone(),
                ),
            )
            .await?;

        self.record_audit(
            AuditEvent::new(
                tenant.clone(),
                ctx.user_id.clone(),
                "approval_instance_rejected",
                format!("approval instance {} rejected", instance.id),
            )
            .with_entity(instance.entity.clone()),
        )
        .await;

        tracing::info!(
            instance_id = %instance.id,
            entity = %instance.entity,
            "Approval instance rejected"
        );
        outcome.instance_status = Some(ExternalStatus::Rejected);
        Ok(())
    }

    /// After an approved stage: activate the next pending stage from the
    /// assignment snapshot, or complete the instance and resume the
    /// blocked transition when no stages remain.
    async fn advance_or_complete(
        &self,
        task: &ApprovalTask,
        completed_stage: &ApprovalStage,
        ctx: &RequestContext,
        outcome: &mut DecisionOutcome,
    ) -> EngineResult<()> {
        let tenant = &ctx.tenant_id;
        let stages = self
            .store
            .stages_for_instance(tenant, &task.approval_instance_id)
            .await?;

        let next = stages.iter().find(|s| {
            s.stage_no > completed_stage.stage_no && s.status == StageStatus::Pending
        });

        if let Some(next) = next {
            match self
                .store
                .transition_stage(tenant, &next.id, StageStatus::Pending, StageStatus::Active)
                .await
            {
                Ok(_) => {}
                Err(StorageError::Conflict(_)) => return Ok(()),
                Err(err) => return Err(err.into()),
            }

            // Later stages use the creation-time resolution; routing
            // rule changes after creation do not apply
            let snapshot = self
                .store
                .get_snapshot(tenant, &task.approval_instance_id)
                .await?;
            let assignment = snapshot
                .as_ref()
                .and_then(|s| s.for_stage(next.stage_no));
            if let Some(assignment) = assignment {
                let tasks = self
                    .manager
                    .tasks_for_assignment(&task.approval_instance_id, &next.id, assignment);
                if !tasks.is_empty() {
                    self.store.insert_tasks(tenant, tasks).await?;
                }
            }
            tracing::info!(
                instance_id = %task.approval_instance_id,
                stage_no = next.stage_no,
                "Approval stage activated"
            );
            return Ok(());
        }

        let all_completed = stages.iter().all(|s| s.status == StageStatus::Completed);
        if !all_completed {
            return Ok(());
        }

        let instance = match self
            .store
            .transition_instance(
                tenant,
                &task.approval_instance_id,
                InstanceStatus::Open,
                InstanceStatus::Completed,
                Some(InstanceOutcome::Approved),
                None,
            )
            .await
        {
            Ok(instance) => instance,
            Err(StorageError::Conflict(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        self.store
            .append_event(
                tenant,
                ApprovalEventDraft::new(
                    task.approval_instance_id.clone(),
                    ApprovalEventKind::InstanceCompleted,
                    ctx.user_id.clone(),
                ),
            )
            .await?;

        self.record_audit(
            AuditEvent::new(
                tenant.clone(),
                ctx.user_id.clone(),
                "approval_instance_completed",
                format!("approval instance {} completed", instance.id),
            )
            .with_entity(instance.entity.clone()),
        )
        .await;

        outcome.instance_status = Some(ExternalStatus::Completed);

        // Replay the blocked transition with the bypass flag so the
        // approval gate that created this instance passes
        if let Some(transition_id) = &instance.transition_id {
            let bypass_ctx = ctx.clone().with_approval_bypass();
            let resumed = self
                .resumer
                .resume_transition(&instance.entity, transition_id, &bypass_ctx)
                .await?;
            if !resumed.success {
                tracing::warn!(
                    instance_id = %instance.id,
                    entity = %instance.entity,
                    reason = resumed.reason.as_deref().unwrap_or(""),
                    "transition resumption was blocked"
                );
            } else {
                tracing::info!(
                    instance_id = %instance.id,
                    entity = %instance.entity,
                    "Lifecycle transition resumed after approval"
                );
            }
        }
        Ok(())
    }

    async fn record_audit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.log(event).await {
            tracing::warn!(error = %err, "audit recording failed");
        }
    }

    /// Fire-and-forget timer cancellation: failures are logged and
    /// swallowed, successful cancellations append an event.
    async fn cancel_timers(&self, task: &ApprovalTask, ctx: &RequestContext) -> EngineResult<()> {
        match self.timers.cancel_for_task(&task.id).await {
            Ok(0) => {}
            Ok(count) => {
                let mut draft = ApprovalEventDraft::new(
                    task.approval_instance_id.clone(),
                    ApprovalEventKind::TimersCanceled,
                    ctx.user_id.clone(),
                );
                if self.manager.record_event_payloads() {
                    draft = draft.with_payload(serde_json::json!({
                        "task_id": task.id.0,
                        "count": count,
                    }));
                }
                self.store.append_event(&ctx.tenant_id, draft).await?;
            }
            Err(err) => {
                tracing::warn!(task_id = %task.id, error = %err, "timer cancellation failed");
            }
        }
        Ok(())
    }
}

/// Decide whether a stage has settled, and how.
///
/// Observer tasks never count. Returns `None` while the stage is still
/// collecting decisions.
fn evaluate_stage(mode: StageMode, tasks: &[ApprovalTask]) -> Option<StageOutcome> {
    let approver_tasks: Vec<&ApprovalTask> = tasks
        .iter()
        .filter(|t| t.kind == TaskKind::Approver)
        .collect();
    if approver_tasks.is_empty() {
        return None;
    }

    let total = approver_tasks.len();
    let approved = approver_tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Approved)
        .count();
    let rejected = approver_tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Rejected)
        .count();
    let terminal = approved + rejected;

    match mode {
        StageMode::All => {
            // One rejection settles the stage without waiting
            if rejected > 0 {
                Some(StageOutcome::Rejected)
            } else if terminal == total {
                Some(StageOutcome::Approved)
            } else {
                None
            }
        }
        StageMode::Any => match approver_tasks
            .iter()
            .filter(|t| t.status.is_terminal())
            .min_by_key(|t| t.decided_at)
        {
            Some(first) if first.status == TaskStatus::Approved => Some(StageOutcome::Approved),
            Some(_) => Some(StageOutcome::Rejected),
            None => None,
        },
        StageMode::Majority => {
            // Strict majority; once a side is unreachable the stage
            // settles, ties settle as rejection
            let needed = total / 2 + 1;
            if approved >= needed {
                Some(StageOutcome::Approved)
            } else if rejected > total - needed {
                Some(StageOutcome::Rejected)
            } else {
                None
            }
        }
        StageMode::Quorum { count } => {
            let quorum = (count as usize).max(1).min(total);
            if terminal < quorum {
                None
            } else if approved > rejected {
                Some(StageOutcome::Approved)
            } else {
                Some(StageOutcome::Rejected)
            }
        }
    }
}
