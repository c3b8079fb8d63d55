//! Transition Gate Evaluator: decides whether a transition may proceed
//!
//! Gates evaluate in storage order and the first blocking gate
//! short-circuits the rest. Within a gate, the permission check always
//! runs before the approval check; a permission denial means the
//! approval branch is never touched.
//!
//! The approval branch bridges to the instance manager: no instance yet
//! means create one and block with "Approval workflow initiated"; an
//! open one blocks with "Approval pending"; a completed one satisfies
//! the gate; a rejected or canceled one blocks with "Approval was
//! canceled". Downstream callers branch on these exact reason strings.

use crate::error::EngineResult;
use crate::manager::ApprovalInstanceManager;
use crate::policy::PolicyGate;
use process_storage::ProcessStore;
use process_types::{
    ApprovalTemplateId, EntityRef, ExternalStatus, RequestContext, TransitionGate, TransitionId,
};
use serde_json::Value;
use std::sync::Arc;

/// Outcome of gate evaluation. A blocked transition carries a
/// human-readable reason that doubles as a control signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl GateDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

pub struct TransitionGateEvaluator {
    store: Arc<dyn ProcessStore>,
    policy: Arc<dyn PolicyGate>,
    manager: Arc<ApprovalInstanceManager>,
}

impl TransitionGateEvaluator {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        policy: Arc<dyn PolicyGate>,
        manager: Arc<ApprovalInstanceManager>,
    ) -> Self {
        Self {
            store,
            policy,
            manager,
        }
    }

    /// Evaluate every gate attached to a transition. All gates must
    /// pass; the first blocker wins.
    ///
    /// `record` is the entity's current content for condition matching;
    /// `entity` enables the approval branch. Without an entity reference
    /// an approval gate is treated as satisfied.
    pub async fn validate_gates(
        &self,
        transition_id: &TransitionId,
        ctx: &RequestContext,
        record: Option<&Value>,
        entity: Option<&EntityRef>,
    ) -> EngineResult<GateDecision> {
        let gates = self
            .store
            .gates_for_transition(&ctx.tenant_id, transition_id)
            .await?;
        if gates.is_empty() {
            return Ok(GateDecision::allowed());
        }

        let condition_ctx = match record {
            Some(record) => record.clone(),
            None => ctx.condition_context(),
        };

        for gate in &gates {
            if !gate_applies(gate, &condition_ctx)? {
                continue;
            }

            if let Some(operations) = &gate.required_operations {
                let entity_name = entity.map(|e| e.entity_name.as_str()).unwrap_or("");
                for operation in operations {
                    let decision = self
                        .policy
                        .authorize(operation, entity_name, ctx, record)
                        .await;
                    if !decision.allowed {
                        let reason = match decision.reason {
                            Some(detail) => {
                                format!("Missing required operation: {}: {}", operation, detail)
                            }
                            None => format!("Missing required operation: {}", operation),
                        };
                        return Ok(GateDecision::blocked(reason));
                    }
                }
            }

            if let Some(template_id) = &gate.approval_template_id {
                let Some(entity) = entity else {
                    // No entity context: nothing to attach an instance
                    // to, treat the approval gate as satisfied
                    continue;
                };
                if ctx.approval_bypass() {
                    continue;
                }
                let decision = self
                    .bridge_approval(transition_id, template_id, entity, ctx)
                    .await?;
                if !decision.allowed {
                    return Ok(decision);
                }
            }
        }

        Ok(GateDecision::allowed())
    }

    /// The approval template a transition would require, if any. A
    /// lightweight pre-flight read, no permission or instance checks.
    pub async fn requires_approval(
        &self,
        transition_id: &TransitionId,
        ctx: &RequestContext,
    ) -> EngineResult<Option<ApprovalTemplateId>> {
        let gates = self
            .store
            .gates_for_transition(&ctx.tenant_id, transition_id)
            .await?;
        Ok(gates
            .into_iter()
            .find_map(|gate| gate.approval_template_id))
    }

    async fn bridge_approval(
        &self,
        transition_id: &TransitionId,
        template_id: &ApprovalTemplateId,
        entity: &EntityRef,
        ctx: &RequestContext,
    ) -> EngineResult<GateDecision> {
        // Terminal instances must be visible here: a completed workflow
        // satisfies the gate, a rejected one keeps blocking
        let latest = self
            .store
            .find_latest_for_entity(&ctx.tenant_id, entity)
            .await?;

        let Some(instance) = latest else {
            let created = self
                .manager
                .create_approval_instance(
                    entity.clone(),
                    Some(transition_id.clone()),
                    template_id,
                    ctx,
                )
                .await?;
            return if created.success {
                Ok(GateDecision::blocked("Approval workflow initiated"))
            } else {
                Ok(GateDecision::blocked(format!(
                    "Failed to create approval: {}",
                    created.error.unwrap_or_else(|| "unknown error".to_string())
                )))
            };
        };

        match instance.external_status() {
            ExternalStatus::Open => Ok(GateDecision::blocked("Approval pending")),
            ExternalStatus::Completed => Ok(GateDecision::allowed()),
            ExternalStatus::Rejected | ExternalStatus::Canceled => {
                Ok(GateDecision::blocked("Approval was canceled"))
            }
        }
    }
}

/// Whether a gate applies to this evaluation at all. A gate whose
/// condition or threshold rules do not match the entity context is
/// skipped, not blocked.
fn gate_applies(gate: &TransitionGate, condition_ctx: &Value) -> EngineResult<bool> {
    if let Some(condition) = &gate.condition {
        if !condition.evaluate(condition_ctx)? {
            return Ok(false);
        }
    }
    for rule in &gate.threshold_rules {
        if !rule.evaluate(condition_ctx)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::policy::{AllowAllGate, PolicyDecision};
    use async_trait::async_trait;
    use process_audit::InMemoryAuditLedger;
    use process_storage::{ApprovalStore, DefinitionStore, InMemoryProcessStore};
    use process_types::{
        ApprovalTemplate, Condition, ConditionOp, PrincipalId, RoutingRule, StageMode,
        TemplateStage, TenantId,
    };
    use serde_json::json;
    use std::sync::Mutex;

    fn ctx() -> RequestContext {
        RequestContext::new("user-1", "tenant-1", "realm-1")
    }

    fn entity() -> EntityRef {
        EntityRef::new("travel_request", "tr-1")
    }

    fn tenant() -> TenantId {
        TenantId::new("tenant-1")
    }

    fn template() -> ApprovalTemplate {
        ApprovalTemplate::new(tenant(), "travel", "Travel Approval")
            .with_id(ApprovalTemplateId::new("approval-template-1"))
            .with_stage(TemplateStage::new(1, "Manager", StageMode::All))
            .with_stage(TemplateStage::new(2, "Finance", StageMode::All))
            .with_routing_rule(
                RoutingRule::new(10)
                    .for_stage(1)
                    .assign(PrincipalId::new("manager-1"))
                    .assign(PrincipalId::new("manager-2")),
            )
            .with_routing_rule(
                RoutingRule::new(20)
                    .for_stage(2)
                    .assign(PrincipalId::new("finance-1")),
            )
    }

    struct CountingPolicy {
        denied: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl CountingPolicy {
        fn allowing() -> Self {
            Self {
                denied: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn denying(operation: &str) -> Self {
            Self {
                denied: vec![operation.to_string()],
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PolicyGate for CountingPolicy {
        async fn authorize(
            &self,
            operation_code: &str,
            _entity_name: &str,
            _ctx: &RequestContext,
            _record: Option<&Value>,
        ) -> PolicyDecision {
            self.calls.lock().unwrap().push(operation_code.to_string());
            if self.denied.iter().any(|d| d == operation_code) {
                PolicyDecision::deny("policy denied")
            } else {
                PolicyDecision::allow()
            }
        }
    }

    async fn evaluator_with(
        policy: Arc<dyn PolicyGate>,
        gates: Vec<TransitionGate>,
    ) -> (TransitionGateEvaluator, Arc<InMemoryProcessStore>) {
        let store = Arc::new(InMemoryProcessStore::new());
        store.put_template(&tenant(), template()).await.unwrap();
        for gate in gates {
            store.put_gate(&tenant(), gate).await.unwrap();
        }
        let manager = Arc::new(ApprovalInstanceManager::new(
            store.clone(),
            Arc::new(InMemoryAuditLedger::new()),
            EngineConfig::default(),
        ));
        (
            TransitionGateEvaluator::new(store.clone(), policy, manager),
            store,
        )
    }

    fn approval_gate() -> TransitionGate {
        TransitionGate::new(TransitionId::new("trans-123"))
            .with_approval_template(ApprovalTemplateId::new("approval-template-1"))
    }

    #[tokio::test]
    async fn test_no_gates_allows() {
        let (evaluator, _store) =
            evaluator_with(Arc::new(AllowAllGate), Vec::new()).await;
        let decision = evaluator
            .validate_gates(&TransitionId::new("trans-123"), &ctx(), None, Some(&entity()))
            .await
            .unwrap();
        assert!(decision.allowed);
        assert!(decision.reason.is_none());
    }

    #[tokio::test]
    async fn test_no_instance_creates_and_blocks() {
        // Scenario: approval gate, no existing instance
        let (evaluator, store) =
            evaluator_with(Arc::new(AllowAllGate), vec![approval_gate()]).await;

        let decision = evaluator
            .validate_gates(&TransitionId::new("trans-123"), &ctx(), None, Some(&entity()))
            .await
            .unwrap();
        assert_eq!(
            decision,
            GateDecision::blocked("Approval workflow initiated")
        );

        let instance = store
            .find_open_for_entity(&tenant(), &entity())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.transition_id, Some(TransitionId::new("trans-123")));
    }

    #[tokio::test]
    async fn test_open_instance_blocks_without_creating_another() {
        // Scenario: open instance already exists
        let (evaluator, store) =
            evaluator_with(Arc::new(AllowAllGate), vec![approval_gate()]).await;
        let transition = TransitionId::new("trans-123");

        evaluator
            .validate_gates(&transition, &ctx(), None, Some(&entity()))
            .await
            .unwrap();

        let decision = evaluator
            .validate_gates(&transition, &ctx(), None, Some(&entity()))
            .await
            .unwrap();
        assert_eq!(decision, GateDecision::blocked("Approval pending"));

        // still exactly one instance
        let first = store
            .find_latest_for_entity(&tenant(), &entity())
            .await
            .unwrap()
            .unwrap();
        let open = store
            .find_open_for_entity(&tenant(), &entity())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, open.id);
    }

    #[tokio::test]
    async fn test_completed_instance_satisfies_gate() {
        let (evaluator, store) =
            evaluator_with(Arc::new(AllowAllGate), vec![approval_gate()]).await;
        let transition = TransitionId::new("trans-123");

        evaluator
            .validate_gates(&transition, &ctx(), None, Some(&entity()))
            .await
            .unwrap();
        let instance = store
            .find_open_for_entity(&tenant(), &entity())
            .await
            .unwrap()
            .unwrap();
        store
            .transition_instance(
                &tenant(),
                &instance.id,
                process_types::InstanceStatus::Open,
                process_types::InstanceStatus::Completed,
                Some(process_types::InstanceOutcome::Approved),
                None,
            )
            .await
            .unwrap();

        let decision = evaluator
            .validate_gates(&transition, &ctx(), None, Some(&entity()))
            .await
            .unwrap();
        assert!(decision.allowed);
        assert!(decision.reason.is_none());
    }

    #[tokio::test]
    async fn test_rejected_instance_blocks_as_canceled() {
        let (evaluator, store) =
            evaluator_with(Arc::new(AllowAllGate), vec![approval_gate()]).await;
        let transition = TransitionId::new("trans-123");

        evaluator
            .validate_gates(&transition, &ctx(), None, Some(&entity()))
            .await
            .unwrap();
        let instance = store
            .find_open_for_entity(&tenant(), &entity())
            .await
            .unwrap()
            .unwrap();
        store
            .transition_instance(
                &tenant(),
                &instance.id,
                process_types::InstanceStatus::Open,
                process_types::InstanceStatus::Canceled,
                Some(process_types::InstanceOutcome::Rejected),
                None,
            )
            .await
            .unwrap();

        let decision = evaluator
            .validate_gates(&transition, &ctx(), None, Some(&entity()))
            .await
            .unwrap();
        assert_eq!(decision, GateDecision::blocked("Approval was canceled"));
    }

    #[tokio::test]
    async fn test_permission_denial_short_circuits_approval_branch() {
        let policy = Arc::new(CountingPolicy::denying("travel.approve"));
        let gate = approval_gate().with_required_operations(vec!["travel.approve".to_string()]);
        let (evaluator, store) = evaluator_with(policy.clone(), vec![gate]).await;

        let decision = evaluator
            .validate_gates(&TransitionId::new("trans-123"), &ctx(), None, Some(&entity()))
            .await
            .unwrap();
        // the policy's own denial reason rides along after the operation
        assert_eq!(
            decision,
            GateDecision::blocked("Missing required operation: travel.approve: policy denied")
        );

        // the approval lookup/creation path never ran
        assert!(store
            .find_latest_for_entity(&tenant(), &entity())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_permission_checks_run_in_order_and_stop_at_first_denial() {
        let policy = Arc::new(CountingPolicy::denying("travel.approve"));
        let gate = TransitionGate::new(TransitionId::new("trans-123")).with_required_operations(
            vec!["travel.read".to_string(), "travel.approve".to_string(), "travel.admin".to_string()],
        );
        let (evaluator, _store) = evaluator_with(policy.clone(), vec![gate]).await;

        evaluator
            .validate_gates(&TransitionId::new("trans-123"), &ctx(), None, Some(&entity()))
            .await
            .unwrap();

        let calls = policy.calls.lock().unwrap();
        assert_eq!(*calls, vec!["travel.read".to_string(), "travel.approve".to_string()]);
    }

    #[tokio::test]
    async fn test_bypass_skips_approval_entirely() {
        let (evaluator, store) =
            evaluator_with(Arc::new(AllowAllGate), vec![approval_gate()]).await;

        let bypass_ctx = ctx().with_approval_bypass();
        let decision = evaluator
            .validate_gates(
                &TransitionId::new("trans-123"),
                &bypass_ctx,
                None,
                Some(&entity()),
            )
            .await
            .unwrap();
        assert!(decision.allowed);

        // no lookup, no creation
        assert!(store
            .find_latest_for_entity(&tenant(), &entity())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_gate_without_entity_context_is_satisfied() {
        let (evaluator, store) =
            evaluator_with(Arc::new(AllowAllGate), vec![approval_gate()]).await;

        let decision = evaluator
            .validate_gates(&TransitionId::new("trans-123"), &ctx(), None, None)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert!(store
            .find_latest_for_entity(&tenant(), &entity())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_non_matching_gate_condition_skips_gate() {
        let gate = approval_gate().with_condition(Condition::field(
            "amount",
            ConditionOp::Gt,
            10_000,
        ));
        let (evaluator, store) = evaluator_with(Arc::new(AllowAllGate), vec![gate]).await;
        let transition = TransitionId::new("trans-123");

        // below the threshold: the gate does not apply
        let record = json!({"amount": 500});
        let decision = evaluator
            .validate_gates(&transition, &ctx(), Some(&record), Some(&entity()))
            .await
            .unwrap();
        assert!(decision.allowed);
        assert!(store
            .find_latest_for_entity(&tenant(), &entity())
            .await
            .unwrap()
            .is_none());

        // above the threshold: approval kicks in
        let record = json!({"amount": 50_000});
        let decision = evaluator
            .validate_gates(&transition, &ctx(), Some(&record), Some(&entity()))
            .await
            .unwrap();
        assert_eq!(
            decision,
            GateDecision::blocked("Approval workflow initiated")
        );
    }

    #[tokio::test]
    async fn test_first_blocking_gate_short_circuits_later_gates() {
        let policy = Arc::new(CountingPolicy::allowing());
        let first = approval_gate();
        let second = TransitionGate::new(TransitionId::new("trans-123"))
            .with_required_operations(vec!["travel.finalize".to_string()]);
        let (evaluator, _store) = evaluator_with(policy.clone(), vec![first, second]).await;

        let decision = evaluator
            .validate_gates(&TransitionId::new("trans-123"), &ctx(), None, Some(&entity()))
            .await
            .unwrap();
        assert!(!decision.allowed);

        // the second gate's permission check never ran
        assert!(policy.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requires_approval_preflight() {
        let (evaluator, _store) =
            evaluator_with(Arc::new(AllowAllGate), vec![approval_gate()]).await;

        let template_id = evaluator
            .requires_approval(&TransitionId::new("trans-123"), &ctx())
            .await
            .unwrap();
        assert_eq!(template_id, Some(ApprovalTemplateId::new("approval-template-1")));

        let none = evaluator
            .requires_approval(&TransitionId::new("trans-other"), &ctx())
            .await
            .unwrap();
        assert!(none.is_none());
    }
}
