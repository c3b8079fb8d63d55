//! Lifecycle transition and approval decision engine
//!
//! Entities move through tenant-defined lifecycles via named operations.
//! Each transition may carry gates that require permissions, an approval
//! workflow, or both; a blocked transition parks the entity until its
//! approval workflow settles, after which the engine replays the
//! transition automatically.
//!
//! # Architecture
//!
//! [`ProcessEngine`] composes the specialized components:
//!
//! - [`LifecycleOrchestrator`] — resolves operations to transitions and
//!   conditionally advances lifecycle state
//! - [`TransitionGateEvaluator`] — runs permission and approval gates in
//!   storage order, first blocker wins
//! - [`ApprovalInstanceManager`] — instantiates approval workflows from
//!   templates and routing rules
//! - [`DecisionProcessor`] — applies approver decisions, settles stages
//!   and instances, and triggers resumption
//!
//! The external seams ([`PolicyGate`], [`EscalationTimers`],
//! `AuditLogger`) are injected at construction.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use process_audit::InMemoryAuditLedger;
//! use process_engine::{AllowAllGate, EngineConfig, NoopTimers, ProcessEngine};
//! use process_storage::InMemoryProcessStore;
//!
//! let engine = ProcessEngine::new(
//!     Arc::new(InMemoryProcessStore::new()),
//!     Arc::new(InMemoryAuditLedger::new()),
//!     Arc::new(AllowAllGate),
//!     Arc::new(NoopTimers),
//!     EngineConfig::default(),
//! );
//! # let _ = engine.orchestrator();
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod decision;
pub mod error;
pub mod gate;
pub mod manager;
pub mod orchestrator;
pub mod policy;
pub mod timers;

pub use config::EngineConfig;
pub use decision::{
    DecisionOutcome, DecisionProcessor, DecisionRequest, ResumeOutcome, TransitionResumer,
};
pub use error::{EngineError, EngineResult};
pub use gate::{GateDecision, TransitionGateEvaluator};
pub use manager::{ApprovalInstanceManager, CancelInstanceResult, CreateInstanceResult};
pub use orchestrator::{LifecycleOrchestrator, TransitionOutcome};
pub use policy::{AllowAllGate, PolicyDecision, PolicyGate};
pub use timers::{EscalationTimers, NoopTimers, TimerError};

use process_audit::AuditLogger;
use process_storage::ProcessStore;
use std::sync::Arc;

/// Fully wired engine. Construction fixes the wiring: the orchestrator
/// consumes the gate evaluator, the evaluator bridges to the manager,
/// and the decision processor resumes transitions through the
/// orchestrator.
pub struct ProcessEngine {
    manager: Arc<ApprovalInstanceManager>,
    gates: Arc<TransitionGateEvaluator>,
    orchestrator: Arc<LifecycleOrchestrator>,
    processor: Arc<DecisionProcessor>,
}

impl ProcessEngine {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        audit: Arc<dyn AuditLogger>,
        policy: Arc<dyn PolicyGate>,
        timers: Arc<dyn EscalationTimers>,
        config: EngineConfig,
    ) -> Self {
        let manager = Arc::new(ApprovalInstanceManager::new(
            store.clone(),
            audit.clone(),
            config,
        ));
        let gates = Arc::new(TransitionGateEvaluator::new(
            store.clone(),
            policy,
            manager.clone(),
        ));
        let orchestrator = Arc::new(LifecycleOrchestrator::new(
            store.clone(),
            gates.clone(),
            audit.clone(),
        ));
        let processor = Arc::new(DecisionProcessor::new(
            store,
            manager.clone(),
            timers,
            audit,
            orchestrator.clone(),
        ));
        Self {
            manager,
            gates,
            orchestrator,
            processor,
        }
    }

    pub fn manager(&self) -> &Arc<ApprovalInstanceManager> {
        &self.manager
    }

    pub fn gates(&self) -> &Arc<TransitionGateEvaluator> {
        &self.gates
    }

    pub fn orchestrator(&self) -> &Arc<LifecycleOrchestrator> {
        &self.orchestrator
    }

    pub fn processor(&self) -> &Arc<DecisionProcessor> {
        &self.processor
    }
}
