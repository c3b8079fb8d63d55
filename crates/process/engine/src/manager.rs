//! Approval Instance Manager: materializes templates into live instances
//!
//! Given a template, the manager resolves approvers per stage from the
//! routing rules, then inserts the whole instance graph (instance,
//! stages, tasks, assignment snapshot) as one logical unit. The first
//! stage starts `Active` with its tasks created; later stages wait as
//! `Pending` and are activated from the snapshot when their turn comes.
//!
//! Routing is a rule search, not an aggregation: rules are tried in
//! priority order and the first matching non-fallback rule wins; a
//! fallback rule applies only when no primary rule matched.

use crate::config::EngineConfig;
use crate::error::EngineResult;
use chrono::{Duration, Utc};
use process_audit::{AuditEvent, AuditLogger};
use process_storage::{ProcessStore, StorageError};
use process_types::{
    ApprovalEvent, ApprovalEventDraft, ApprovalEventKind, ApprovalInstance, ApprovalInstanceId,
    ApprovalStage, ApprovalTask, ApprovalTemplate, ApprovalTemplateId, Assignee,
    AssignmentSnapshot, EntityRef, InstanceOutcome, InstanceStatus, PrincipalId, RequestContext,
    StageAssignment, StageStatus, TaskId, TaskKind, TransitionId,
};
use std::sync::Arc;

/// Result of an instance creation attempt. Validation failures come back
/// as `success = false` with an error message, never as `Err`.
#[derive(Clone, Debug)]
pub struct CreateInstanceResult {
    pub success: bool,
    pub instance_id: Option<ApprovalInstanceId>,
    pub stage_count: Option<usize>,
    pub task_count: Option<usize>,
    pub error: Option<String>,
}

impl CreateInstanceResult {
    fn created(instance_id: ApprovalInstanceId, stage_count: usize, task_count: usize) -> Self {
        Self {
            success: true,
            instance_id: Some(instance_id),
            stage_count: Some(stage_count),
            task_count: Some(task_count),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            instance_id: None,
            stage_count: None,
            task_count: None,
            error: Some(error.into()),
        }
    }
}

/// Result of an administrative cancellation.
#[derive(Clone, Debug)]
pub struct CancelInstanceResult {
    pub success: bool,
    pub error: Option<String>,
}

/// Creates and reads approval instances. All mutations of instance rows
/// after creation belong to the decision processor.
pub struct ApprovalInstanceManager {
    store: Arc<dyn ProcessStore>,
    audit: Arc<dyn AuditLogger>,
    config: EngineConfig,
}

impl ApprovalInstanceManager {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        audit: Arc<dyn AuditLogger>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// Materialize an approval instance from a template.
    ///
    /// The inserted graph is all-or-nothing: a failure partway never
    /// leaves a half-created instance visible to entity lookups.
    pub async fn create_approval_instance(
        &self,
        entity: EntityRef,
        transition_id: Option<TransitionId>,
        template_id: &ApprovalTemplateId,
        ctx: &RequestContext,
    ) -> EngineResult<CreateInstanceResult> {
        let Some(template) = self.store.get_template(&ctx.tenant_id, template_id).await? else {
            return Ok(CreateInstanceResult::failed("Template not found"));
        };

        let ordered_stages = template.ordered_stages();
        if ordered_stages.is_empty() {
            return Ok(CreateInstanceResult::failed("Template has no stages"));
        }

        // Resolve every stage up front; the snapshot freezes this
        // resolution so later stage activation ignores rule changes
        let condition_ctx = ctx.condition_context();
        let mut assignments = Vec::with_capacity(ordered_stages.len());
        for stage in &ordered_stages {
            let assignment = resolve_stage_assignment(&template, stage.stage_no, &condition_ctx)?;
            assignments.push(assignment);
        }

        let first = &assignments[0];
        if first.approvers.is_empty() {
            return Ok(CreateInstanceResult::failed("No approvers resolved"));
        }

        let mut instance = ApprovalInstance::new(
            ctx.tenant_id.clone(),
            entity.clone(),
            template.id.clone(),
            ctx.user_id.clone(),
        );
        if let Some(transition_id) = transition_id {
            instance = instance.with_transition(transition_id);
        }
        let instance_id = instance.id.clone();

        let mut stages = Vec::with_capacity(ordered_stages.len());
        for (index, template_stage) in ordered_stages.iter().enumerate() {
            let status = if index == 0 {
                StageStatus::Active
            } else {
                StageStatus::Pending
            };
            stages.push(ApprovalStage::new(
                instance_id.clone(),
                template_stage.stage_no,
                template_stage.name.clone(),
                template_stage.mode,
                status,
            ));
        }

        let tasks = self.tasks_for_assignment(&instance_id, &stages[0].id, first);
        let task_count = tasks.len();

        let snapshot = AssignmentSnapshot::new(instance_id.clone(), assignments);

        match self
            .store
            .insert_instance_graph(instance, stages, tasks, snapshot)
            .await
        {
            Ok(()) => {}
            // A concurrent creator won the race; surface it as a
            // validation failure, not an infrastructure error
            Err(StorageError::InvariantViolation(msg)) => {
                return Ok(CreateInstanceResult::failed(msg));
            }
            Err(err) => return Err(err.into()),
        }

        let mut created_event = ApprovalEventDraft::new(
            instance_id.clone(),
            ApprovalEventKind::InstanceCreated,
            ctx.user_id.clone(),
        );
        if self.config.record_event_payloads {
            created_event = created_event.with_payload(serde_json::json!({
                "template": template.code,
                "stages": ordered_stages.len(),
                "tasks": task_count,
            }));
        }
        self.store.append_event(&ctx.tenant_id, created_event).await?;

        self.record_audit(
            AuditEvent::new(
                ctx.tenant_id.clone(),
                ctx.user_id.clone(),
                "approval_instance_created",
                format!("approval instance {} created", instance_id),
            )
            .with_entity(entity),
        )
        .await;

        tracing::info!(
            instance_id = %instance_id,
            template = %template.code,
            stages = ordered_stages.len(),
            tasks = task_count,
            "Approval instance created"
        );

        Ok(CreateInstanceResult::created(
            instance_id,
            ordered_stages.len(),
            task_count,
        ))
    }

    /// Build the task rows for one stage from its resolved assignment.
    pub(crate) fn tasks_for_assignment(
        &self,
        instance_id: &ApprovalInstanceId,
        stage_id: &process_types::StageId,
        assignment: &StageAssignment,
    ) -> Vec<ApprovalTask> {
        let due_at = self
            .config
            .default_task_due_secs
            .map(|secs| Utc::now() + Duration::seconds(secs as i64));

        let mut tasks = Vec::new();
        for approver in &assignment.approvers {
            let mut task = ApprovalTask::new(
                instance_id.clone(),
                stage_id.clone(),
                approver.clone(),
                TaskKind::Approver,
            );
            if let Some(due_at) = due_at {
                task = task.with_due_at(due_at);
            }
            tasks.push(task);
        }
        for observer in &assignment.observers {
            tasks.push(ApprovalTask::new(
                instance_id.clone(),
                stage_id.clone(),
                Assignee::Principal(observer.clone()),
                TaskKind::Observer,
            ));
        }
        tasks
    }

    /// Administratively cancel an open instance. Maps to the external
    /// status `canceled`, unlike a rejection.
    pub async fn cancel_instance(
        &self,
        instance_id: &ApprovalInstanceId,
        reason: &str,
        ctx: &RequestContext,
    ) -> EngineResult<CancelInstanceResult> {
        let mut context = serde_json::Map::new();
        context.insert("reason".to_string(), serde_json::json!(reason));

        let instance = match self
            .store
            .transition_instance(
                &ctx.tenant_id,
                instance_id,
                InstanceStatus::Open,
                InstanceStatus::Canceled,
                Some(InstanceOutcome::Canceled),
                Some(context),
            )
            .await
        {
            Ok(instance) => instance,
            Err(StorageError::NotFound(_)) => {
                return Ok(CancelInstanceResult {
                    success: false,
                    error: Some("Instance not found".to_string()),
                });
            }
            Err(StorageError::Conflict(_)) => {
                return Ok(CancelInstanceResult {
                    success: false,
                    error: Some("Instance not open".to_string()),
                });
            }
            Err(err) => return Err(err.into()),
        };

        self.store
            .append_event(
                &ctx.tenant_id,
                ApprovalEventDraft::new(
                    instance_id.clone(),
                    ApprovalEventKind::InstanceCanceled,
                    ctx.user_id.clone(),
                )
                .with_comment(reason),
            )
            .await?;

        self.record_audit(
            AuditEvent::new(
                ctx.tenant_id.clone(),
                ctx.user_id.clone(),
                "approval_instance_canceled",
                format!("approval instance {} canceled: {}", instance_id, reason),
            )
            .with_entity(instance.entity),
        )
        .await;

        Ok(CancelInstanceResult {
            success: true,
            error: None,
        })
    }

    // ── Read surface ─────────────────────────────────────────────────

    pub async fn get_instance(
        &self,
        id: &ApprovalInstanceId,
        ctx: &RequestContext,
    ) -> EngineResult<Option<ApprovalInstance>> {
        Ok(self.store.get_instance(&ctx.tenant_id, id).await?)
    }

    /// The open instance for an entity, if any.
    pub async fn get_instance_for_entity(
        &self,
        entity: &EntityRef,
        ctx: &RequestContext,
    ) -> EngineResult<Option<ApprovalInstance>> {
        Ok(self
            .store
            .find_open_for_entity(&ctx.tenant_id, entity)
            .await?)
    }

    pub async fn get_task(
        &self,
        id: &TaskId,
        ctx: &RequestContext,
    ) -> EngineResult<Option<ApprovalTask>> {
        Ok(self.store.get_task(&ctx.tenant_id, id).await?)
    }

    pub async fn get_tasks_for_instance(
        &self,
        instance_id: &ApprovalInstanceId,
        ctx: &RequestContext,
    ) -> EngineResult<Vec<ApprovalTask>> {
        Ok(self
            .store
            .tasks_for_instance(&ctx.tenant_id, instance_id)
            .await?)
    }

    /// Pending approval inbox for one principal.
    pub async fn get_tasks_for_assignee(
        &self,
        assignee: &PrincipalId,
        ctx: &RequestContext,
    ) -> EngineResult<Vec<ApprovalTask>> {
        Ok(self
            .store
            .tasks_for_assignee(&ctx.tenant_id, assignee)
            .await?)
    }

    pub async fn get_events_for_instance(
        &self,
        instance_id: &ApprovalInstanceId,
        ctx: &RequestContext,
    ) -> EngineResult<Vec<ApprovalEvent>> {
        Ok(self
            .store
            .events_for_instance(&ctx.tenant_id, instance_id)
            .await?)
    }

    pub(crate) fn record_event_payloads(&self) -> bool {
        self.config.record_event_payloads
    }

    pub(crate) async fn record_audit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.log(event).await {
            tracing::warn!(error = %err, "audit recording failed");
        }
    }
}

/// Resolve the approver/observer set for one stage of a template.
fn resolve_stage_assignment(
    template: &ApprovalTemplate,
    stage_no: u32,
    condition_ctx: &serde_json::Value,
) -> EngineResult<StageAssignment> {
    let applicable = template
        .ordered_rules()
        .into_iter()
        .filter(|rule| rule.stage_no.is_none() || rule.stage_no == Some(stage_no));

    let mut fallbacks = Vec::new();
    for rule in applicable {
        if rule.fallback {
            fallbacks.push(rule);
            continue;
        }
        let matches = match &rule.condition {
            Some(condition) => condition.evaluate(condition_ctx)?,
            None => true,
        };
        if matches {
            return Ok(assignment_from_rule(stage_no, rule));
        }
    }

    for rule in fallbacks {
        let matches = match &rule.condition {
            Some(condition) => condition.evaluate(condition_ctx)?,
            None => true,
        };
        if matches {
            return Ok(assignment_from_rule(stage_no, rule));
        }
    }

    Ok(StageAssignment {
        stage_no,
        approvers: Vec::new(),
        observers: Vec::new(),
    })
}

fn assignment_from_rule(stage_no: u32, rule: &process_types::RoutingRule) -> StageAssignment {
    let mut approvers: Vec<Assignee> = rule
        .assignees
        .iter()
        .cloned()
        .map(Assignee::Principal)
        .collect();
    approvers.extend(rule.groups.iter().cloned().map(Assignee::Group));
    StageAssignment {
        stage_no,
        approvers,
        observers: rule.observers.clone(),
    }
}
