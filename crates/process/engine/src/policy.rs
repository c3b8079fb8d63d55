//! The permission seam consumed by gate evaluation.
//!
//! Permission evaluation itself lives outside this engine; gates only
//! need a yes/no (with an optional reason) per operation code.

use async_trait::async_trait;
use process_types::RequestContext;
use serde_json::Value;

/// Outcome of one permission check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// External policy gate; checked before any approval bridging.
#[async_trait]
pub trait PolicyGate: Send + Sync {
    async fn authorize(
        &self,
        operation_code: &str,
        entity_name: &str,
        ctx: &RequestContext,
        record: Option<&Value>,
    ) -> PolicyDecision;
}

/// Permissive gate for wiring and tests.
pub struct AllowAllGate;

#[async_trait]
impl PolicyGate for AllowAllGate {
    async fn authorize(
        &self,
        _operation_code: &str,
        _entity_name: &str,
        _ctx: &RequestContext,
        _record: Option<&Value>,
    ) -> PolicyDecision {
        PolicyDecision::allow()
    }
}
