//! Request contexts and tenant-scoped identifiers
//!
//! Every read and write in the engine carries a [`RequestContext`]: who is
//! acting, in which tenant and realm, with which roles. Tenant scoping is
//! mandatory — stores key all records by [`TenantId`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key the engine reads to skip approval gates when a completed
/// workflow replays its original transition.
pub const APPROVAL_BYPASS_KEY: &str = "_approval_bypass";

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a tenant
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a principal (human or service account)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a group of principals
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to a business entity: its schema name plus its record id.
///
/// The entity/schema layer owns the records themselves; this engine only
/// ever addresses them by reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_name: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_name: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_name, self.entity_id)
    }
}

// ── Request Context ──────────────────────────────────────────────────

/// The caller context carried on every engine operation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestContext {
    /// The acting principal
    pub user_id: PrincipalId,
    /// The tenant the request is scoped to
    pub tenant_id: TenantId,
    /// The authentication realm
    pub realm_id: String,
    /// Roles held by the acting principal
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Free-form metadata (control flags, correlation ids)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl RequestContext {
    pub fn new(
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
        realm_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: PrincipalId::new(user_id),
            tenant_id: TenantId::new(tenant_id),
            realm_id: realm_id.into(),
            roles: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mark this context so approval gates are skipped on replay.
    pub fn with_approval_bypass(mut self) -> Self {
        self.metadata
            .insert(APPROVAL_BYPASS_KEY.to_string(), Value::Bool(true));
        self
    }

    /// Whether the approval-bypass flag is set (strictly boolean `true`).
    pub fn approval_bypass(&self) -> bool {
        matches!(self.metadata.get(APPROVAL_BYPASS_KEY), Some(Value::Bool(true)))
    }

    /// Project this context into a JSON object for condition evaluation.
    ///
    /// Routing-rule conditions address fields as `user_id`, `realm_id`,
    /// `roles`, and `metadata.<key>`.
    pub fn condition_context(&self) -> Value {
        serde_json::json!({
            "user_id": self.user_id.0,
            "tenant_id": self.tenant_id.0,
            "realm_id": self.realm_id,
            "roles": self.roles,
            "metadata": Value::Object(self.metadata.clone()),
        })
    }
}
