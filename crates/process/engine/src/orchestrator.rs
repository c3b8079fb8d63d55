//! Lifecycle Transition Orchestrator: the operation-code entry point.
//!
//! Resolves the entity's current state, finds the active transition for
//! the requested operation, runs gate evaluation, and conditionally
//! advances the lifecycle instance. A blocked transition never mutates
//! the instance.
//!
//! The orchestrator is also the [`TransitionResumer`]: when an approval
//! workflow completes, the decision processor replays the original
//! transition through it under an approval bypass so the satisfied gate
//! does not re-trigger.

use crate::decision::{ResumeOutcome, TransitionResumer};
use crate::error::EngineResult;
use crate::gate::TransitionGateEvaluator;
use async_trait::async_trait;
use process_audit::{AuditEvent, AuditLogger};
use process_storage::ProcessStore;
use process_types::{EntityRef, RequestContext, TransitionId};
use serde_json::{json, Value};
use std::sync::Arc;

/// Result of a transition attempt. Failure reasons are caller-facing;
/// "Approval workflow initiated" and "Approval pending" signal that the
/// entity is parked behind an approval rather than denied outright.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub success: bool,
    pub reason: Option<String>,
}

impl TransitionOutcome {
    fn applied() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    fn blocked(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
        }
    }
}

pub struct LifecycleOrchestrator {
    store: Arc<dyn ProcessStore>,
    gates: Arc<TransitionGateEvaluator>,
    audit: Arc<dyn AuditLogger>,
}

impl LifecycleOrchestrator {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        gates: Arc<TransitionGateEvaluator>,
        audit: Arc<dyn AuditLogger>,
    ) -> Self {
        Self {
            store,
            gates,
            audit,
        }
    }

    /// Attempt the transition named by `operation_code` on an entity.
    ///
    /// `record` is the entity's current content, used for gate condition
    /// matching; when absent, conditions match against the request
    /// context instead.
    ///
    /// The state advance is conditional on the state observed here; a
    /// concurrent advance surfaces as a storage conflict error rather
    /// than a blocked outcome.
    pub async fn transition(
        &self,
        entity: &EntityRef,
        operation_code: &str,
        ctx: &RequestContext,
        record: Option<&Value>,
    ) -> EngineResult<TransitionOutcome> {
        let tenant = &ctx.tenant_id;

        let Some(instance) = self.store.get_lifecycle_instance(tenant, entity).await? else {
            return Ok(TransitionOutcome::blocked("Lifecycle instance not found"));
        };
        let Some(state) = self.store.get_state(tenant, &instance.state_id).await? else {
            return Ok(TransitionOutcome::blocked("Current state not found"));
        };
        if state.is_terminal {
            return Ok(TransitionOutcome::blocked(format!(
                "State '{}' is terminal",
                state.code
            )));
        }

        let Some(transition) = self
            .store
            .find_transition(tenant, &instance.state_id, operation_code)
            .await?
        else {
            return Ok(TransitionOutcome::blocked("Transition not found"));
        };

        let decision = self
            .gates
            .validate_gates(&transition.id, ctx, record, Some(entity))
            .await?;
        if !decision.allowed {
            return Ok(TransitionOutcome::blocked(
                decision
                    .reason
                    .unwrap_or_else(|| "Transition blocked".to_string()),
            ));
        }

        let advanced = self
            .store
            .advance_lifecycle_instance(
                tenant,
                entity,
                &transition.from_state_id,
                &transition.to_state_id,
                &ctx.user_id,
            )
            .await?;

        tracing::info!(
            entity = %entity,
            operation = operation_code,
            to_state = %advanced.state_id,
            "lifecycle transition applied"
        );
        self.record_audit(
            AuditEvent::new(
                tenant.clone(),
                ctx.user_id.clone(),
                "transition_applied",
                format!("Transition '{}' applied", operation_code),
            )
            .with_entity(entity.clone())
            .with_payload(json!({
                "transition_id": transition.id,
                "from_state_id": transition.from_state_id,
                "to_state_id": transition.to_state_id,
            })),
        )
        .await;

        Ok(TransitionOutcome::applied())
    }

    async fn record_audit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.log(event).await {
            tracing::warn!(error = %err, "audit write failed");
        }
    }
}

#[async_trait]
impl TransitionResumer for LifecycleOrchestrator {
    async fn resume_transition(
        &self,
        entity: &EntityRef,
        transition_id: &TransitionId,
        ctx: &RequestContext,
    ) -> EngineResult<ResumeOutcome> {
        let Some(transition) = self
            .store
            .get_transition(&ctx.tenant_id, transition_id)
            .await?
        else {
            tracing::warn!(
                entity = %entity,
                transition_id = %transition_id,
                "resumption target transition no longer exists"
            );
            return Ok(ResumeOutcome {
                success: false,
                reason: Some("Transition not found".to_string()),
            });
        };

        let outcome = self
            .transition(entity, &transition.operation_code, ctx, None)
            .await?;
        Ok(ResumeOutcome {
            success: outcome.success,
            reason: outcome.reason,
        })
    }
}
