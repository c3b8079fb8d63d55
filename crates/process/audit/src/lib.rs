//! Append-only audit ledger for the process engine.
//!
//! Business events (transition applied, instance created/completed/
//! rejected, decision made) are recorded here as hash-chained records:
//! each record's blake3 hash covers its content plus the previous
//! record's hash, so any rewrite of history breaks the chain.
//!
//! Audit recording is fire-and-forget from the engine's perspective:
//! callers log failures and continue, they never fail the primary
//! operation over a missing audit row.

#![deny(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use process_types::{EntityRef, PrincipalId, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;

/// Audit-layer errors.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// A business event submitted for recording.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub actor: PrincipalId,
    /// Machine-readable action code, e.g. `transition_applied`
    pub action: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRef>,
    #[serde(default)]
    pub payload: Value,
}

impl AuditEvent {
    pub fn new(
        tenant_id: TenantId,
        actor: PrincipalId,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            tenant_id,
            actor,
            action: action.into(),
            message: message.into(),
            entity: None,
            payload: Value::Null,
        }
    }

    pub fn with_entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A stored, hash-linked audit record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: String,
    pub sequence: u64,
    pub event: AuditEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    pub hash: String,
}

/// Fire-and-forget audit recording seam consumed by the engine.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log(&self, event: AuditEvent) -> AuditResult<AuditRecord>;
}

/// In-memory hash-chained ledger.
///
/// Deterministic and test-friendly; production deployments back the same
/// trait with durable storage.
#[derive(Default)]
pub struct InMemoryAuditLedger {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, newest-first.
    pub fn records(&self) -> AuditResult<Vec<AuditRecord>> {
        let guard = self.read()?;
        let mut records = guard.clone();
        records.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(records)
    }

    /// Records touching one entity, newest-first.
    pub fn records_for_entity(
        &self,
        tenant: &TenantId,
        entity: &EntityRef,
    ) -> AuditResult<Vec<AuditRecord>> {
        let guard = self.read()?;
        let mut records: Vec<AuditRecord> = guard
            .iter()
            .filter(|r| {
                &r.event.tenant_id == tenant && r.event.entity.as_ref() == Some(entity)
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(records)
    }

    /// The hash anchor of the newest record.
    pub fn latest_hash(&self) -> AuditResult<Option<String>> {
        let guard = self.read()?;
        Ok(guard.last().map(|r| r.hash.clone()))
    }

    /// Recompute every hash and check the chain links. Returns `false`
    /// when any record's content or linkage has been altered.
    pub fn verify_chain(&self) -> AuditResult<bool> {
        let guard = self.read()?;
        let mut previous: Option<&str> = None;
        for (index, record) in guard.iter().enumerate() {
            if record.sequence != index as u64 + 1 {
                return Ok(false);
            }
            if record.previous_hash.as_deref() != previous {
                return Ok(false);
            }
            let expected = compute_hash(&record.event, previous, record.sequence)?;
            if record.hash != expected {
                return Ok(false);
            }
            previous = Some(record.hash.as_str());
        }
        Ok(true)
    }

    fn read(&self) -> AuditResult<std::sync::RwLockReadGuard<'_, Vec<AuditRecord>>> {
        self.records
            .read()
            .map_err(|_| AuditError::Backend("audit lock poisoned".to_string()))
    }
}

#[async_trait]
impl AuditLogger for InMemoryAuditLedger {
    async fn log(&self, event: AuditEvent) -> AuditResult<AuditRecord> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| AuditError::Backend("audit lock poisoned".to_string()))?;

        let previous_hash = guard.last().map(|r| r.hash.clone());
        let sequence = guard.len() as u64 + 1;
        let hash = compute_hash(&event, previous_hash.as_deref(), sequence)?;

        let record = AuditRecord {
            record_id: format!("audit-{}", Uuid::new_v4()),
            sequence,
            event,
            previous_hash,
            hash,
        };
        guard.push(record.clone());
        Ok(record)
    }
}

fn compute_hash(
    event: &AuditEvent,
    previous_hash: Option<&str>,
    sequence: u64,
) -> AuditResult<String> {
    let serializable = serde_json::json!({
        "previous_hash": previous_hash,
        "sequence": sequence,
        "event": event,
    });
    let serialized = serde_json::to_vec(&serializable)
        .map_err(|e| AuditError::Serialization(e.to_string()))?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}
