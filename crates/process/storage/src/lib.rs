//! Storage contracts for the Trellis process engine.
//!
//! This crate defines the persistence seams the engine writes through:
//! - definition data (lifecycle states/transitions/gates, approval templates)
//! - the per-entity lifecycle position
//! - approval instances, stages, tasks, and assignment snapshots
//! - instance-scoped approval event logs
//!
//! Design stance:
//! - Every mutation to a contended row is a guarded conditional write:
//!   callers state the status they expect and get `Conflict` on mismatch.
//! - The in-memory adapter is the reference implementation; a
//!   transactional backend supplies the same contract in production.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryProcessStore;
pub use traits::{
    ApprovalEventStore, ApprovalStore, DefinitionStore, LifecycleStore, ProcessStore,
};
