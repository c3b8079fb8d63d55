//! Approval templates: the definition side of an approval workflow
//!
//! A template declares an ordered list of stages and a set of routing
//! rules. Stages run sequentially; each stage's mode decides how many of
//! its tasks must approve. Routing rules resolve, per stage, which
//! principals get tasks — a rule search in priority order, not an
//! aggregation.

use crate::condition::Condition;
use crate::context::{GroupId, PrincipalId, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an approval template
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalTemplateId(pub String);

impl ApprovalTemplateId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ApprovalTemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How many of a stage's approver tasks must approve for the stage to pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StageMode {
    /// Every approver must decide; any rejection rejects the stage
    All,
    /// The first terminal decision settles the stage
    Any,
    /// More than half of the approvers must agree; ties reject
    Majority,
    /// A fixed number of matching decisions settles the stage; ties reject
    Quorum { count: u32 },
}

/// One stage of a template, ordered by `stage_no`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateStage {
    pub stage_no: u32,
    pub name: String,
    pub mode: StageMode,
}

impl TemplateStage {
    pub fn new(stage_no: u32, name: impl Into<String>, mode: StageMode) -> Self {
        Self {
            stage_no,
            name: name.into(),
            mode,
        }
    }
}

/// A routing rule resolving approvers (or observers) for a stage.
///
/// Rules are evaluated in ascending `priority` order. The first matching
/// non-fallback rule wins; fallback rules apply only when no primary rule
/// matched. A rule without a `stage_no` applies to every stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingRule {
    pub priority: u32,
    /// Restrict the rule to one stage; `None` applies to all stages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_no: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Used only when no primary rule matched
    #[serde(default)]
    pub fallback: bool,
    /// Pre-resolved principals who receive approver tasks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<PrincipalId>,
    /// Groups recorded on tasks for audit; identity resolution is external
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupId>,
    /// Principals who receive observer tasks, never counted for completion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observers: Vec<PrincipalId>,
}

impl RoutingRule {
    pub fn new(priority: u32) -> Self {
        Self {
            priority,
            stage_no: None,
            condition: None,
            fallback: false,
            assignees: Vec::new(),
            groups: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn for_stage(mut self, stage_no: u32) -> Self {
        self.stage_no = Some(stage_no);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    pub fn assign(mut self, principal: PrincipalId) -> Self {
        self.assignees.push(principal);
        self
    }

    pub fn assign_group(mut self, group: GroupId) -> Self {
        self.groups.push(group);
        self
    }

    pub fn observe(mut self, principal: PrincipalId) -> Self {
        self.observers.push(principal);
        self
    }
}

/// An approval workflow definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalTemplate {
    pub id: ApprovalTemplateId,
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
    pub stages: Vec<TemplateStage>,
    pub routing_rules: Vec<RoutingRule>,
}

impl ApprovalTemplate {
    pub fn new(tenant_id: TenantId, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ApprovalTemplateId::generate(),
            tenant_id,
            code: code.into(),
            name: name.into(),
            stages: Vec::new(),
            routing_rules: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: ApprovalTemplateId) -> Self {
        self.id = id;
        self
    }

    pub fn with_stage(mut self, stage: TemplateStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_routing_rule(mut self, rule: RoutingRule) -> Self {
        self.routing_rules.push(rule);
        self
    }

    /// Stages in execution order.
    pub fn ordered_stages(&self) -> Vec<&TemplateStage> {
        let mut stages: Vec<&TemplateStage> = self.stages.iter().collect();
        stages.sort_by_key(|s| s.stage_no);
        stages
    }

    /// Routing rules in evaluation order.
    pub fn ordered_rules(&self) -> Vec<&RoutingRule> {
        let mut rules: Vec<&RoutingRule> = self.routing_rules.iter().collect();
        rules.sort_by_key(|r| r.priority);
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering() {
        let template = ApprovalTemplate::new(TenantId::new("t"), "expense", "Expense Approval")
            .with_stage(TemplateStage::new(2, "Finance", StageMode::Any))
            .with_stage(TemplateStage::new(1, "Manager", StageMode::All));

        let ordered = template.ordered_stages();
        assert_eq!(ordered[0].stage_no, 1);
        assert_eq!(ordered[1].stage_no, 2);
    }

    #[test]
    fn test_rule_ordering() {
        let template = ApprovalTemplate::new(TenantId::new("t"), "expense", "Expense Approval")
            .with_routing_rule(RoutingRule::new(20).fallback())
            .with_routing_rule(RoutingRule::new(10));

        let ordered = template.ordered_rules();
        assert_eq!(ordered[0].priority, 10);
        assert!(!ordered[0].fallback);
    }

    #[test]
    fn test_stage_mode_serde() {
        let mode = StageMode::Quorum { count: 2 };
        let json = serde_json::to_value(mode).unwrap();
        assert_eq!(json["mode"], "quorum");
        assert_eq!(json["count"], 2);

        let decoded: StageMode = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, mode);
    }
}
