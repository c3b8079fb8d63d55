//! Lifecycle definition data and runtime lifecycle instances
//!
//! A lifecycle is a directed graph of named states. Transitions carry the
//! caller-facing operation code, and zero or more gates attach to each
//! transition. Definition data is immutable at runtime; the only mutable
//! record here is [`LifecycleInstance`], advanced exclusively by the
//! orchestrator through a guarded conditional write.

use crate::condition::Condition;
use crate::context::{EntityRef, PrincipalId, TenantId};
use crate::template::ApprovalTemplateId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a lifecycle definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LifecycleId(pub String);

impl LifecycleId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for LifecycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a lifecycle state
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId(pub String);

impl StateId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a lifecycle transition
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionId(pub String);

impl TransitionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a transition gate
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GateId(pub String);

impl GateId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for GateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Definition data ──────────────────────────────────────────────────

/// One named state of a lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleState {
    pub id: StateId,
    pub lifecycle_id: LifecycleId,
    pub code: String,
    pub name: String,
    /// No transitions leave a terminal state
    pub is_terminal: bool,
    pub sort_order: i32,
}

impl LifecycleState {
    pub fn new(
        lifecycle_id: LifecycleId,
        code: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: StateId::generate(),
            lifecycle_id,
            code: code.into(),
            name: name.into(),
            is_terminal: false,
            sort_order: 0,
        }
    }

    pub fn terminal(mut self) -> Self {
        self.is_terminal = true;
        self
    }

    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }
}

/// One legal state change, addressed by the caller-facing operation code
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleTransition {
    pub id: TransitionId,
    pub lifecycle_id: LifecycleId,
    pub from_state_id: StateId,
    pub to_state_id: StateId,
    /// Caller-facing verb, e.g. `APPROVE`
    pub operation_code: String,
    pub is_active: bool,
}

impl LifecycleTransition {
    pub fn new(
        lifecycle_id: LifecycleId,
        from_state_id: StateId,
        to_state_id: StateId,
        operation_code: impl Into<String>,
    ) -> Self {
        Self {
            id: TransitionId::generate(),
            lifecycle_id,
            from_state_id,
            to_state_id,
            operation_code: operation_code.into(),
            is_active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// A guard attached to a transition. All gates on a transition must pass.
///
/// Each gate may require permissions, require an approval workflow, or
/// both; the permission check always runs first. A gate with a
/// `condition` that does not match the entity context is skipped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionGate {
    pub id: GateId,
    pub transition_id: TransitionId,
    /// Permission codes the caller must hold, checked in order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_operations: Option<Vec<String>>,
    /// Approval workflow this gate bridges to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_template_id: Option<ApprovalTemplateId>,
    /// Pre-filter: the gate applies only when this matches the entity context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Additional rules that must all hold against the entity context
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threshold_rules: Vec<Condition>,
}

impl TransitionGate {
    pub fn new(transition_id: TransitionId) -> Self {
        Self {
            id: GateId::generate(),
            transition_id,
            required_operations: None,
            approval_template_id: None,
            condition: None,
            threshold_rules: Vec::new(),
        }
    }

    pub fn with_required_operations(mut self, operations: Vec<String>) -> Self {
        self.required_operations = Some(operations);
        self
    }

    pub fn with_approval_template(mut self, template_id: ApprovalTemplateId) -> Self {
        self.approval_template_id = Some(template_id);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_threshold_rule(mut self, rule: Condition) -> Self {
        self.threshold_rules.push(rule);
        self
    }
}

// ── Runtime record ───────────────────────────────────────────────────

/// The current lifecycle position of one business entity.
///
/// One row per (tenant, entity). Advanced only by the orchestrator via a
/// conditional write on the expected current state; never deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleInstance {
    pub tenant_id: TenantId,
    pub entity: EntityRef,
    pub lifecycle_id: LifecycleId,
    pub state_id: StateId,
    pub created_at: DateTime<Utc>,
    pub created_by: PrincipalId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: PrincipalId,
}

impl LifecycleInstance {
    pub fn new(
        tenant_id: TenantId,
        entity: EntityRef,
        lifecycle_id: LifecycleId,
        state_id: StateId,
        created_by: PrincipalId,
    ) -> Self {
        let now = Utc::now();
        Self {
            tenant_id,
            entity,
            lifecycle_id,
            state_id,
            created_at: now,
            created_by: created_by.clone(),
            updated_at: now,
            updated_by: created_by,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_builder() {
        let lifecycle = LifecycleId::generate();
        let state = LifecycleState::new(lifecycle, "closed", "Closed")
            .terminal()
            .with_sort_order(9);
        assert!(state.is_terminal);
        assert_eq!(state.sort_order, 9);
    }

    #[test]
    fn test_gate_builder() {
        let gate = TransitionGate::new(TransitionId::generate())
            .with_required_operations(vec!["travel.approve".into()])
            .with_approval_template(ApprovalTemplateId::new("tmpl-1"));
        assert_eq!(
            gate.required_operations.as_deref(),
            Some(&["travel.approve".to_string()][..])
        );
        assert!(gate.approval_template_id.is_some());
        assert!(gate.condition.is_none());
    }

    #[test]
    fn test_gate_serde_omits_empty_fields() {
        let gate = TransitionGate::new(TransitionId::new("t-1"));
        let json = serde_json::to_value(&gate).unwrap();
        assert!(json.get("required_operations").is_none());
        assert!(json.get("threshold_rules").is_none());
    }
}
