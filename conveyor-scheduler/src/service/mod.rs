//! Service Module
//!
//! Scheduling logic on top of the repositories: input resolution, the tick
//! loop and the handoff of builds to the executor.

pub mod dispatch;
pub mod input_mapper;
pub mod scheduler;

// Re-export for convenience
pub use dispatch::{BuildDispatcher, DispatchError, HttpBuildDispatcher};
pub use input_mapper::{InputMapper, MappingOutcome};
pub use scheduler::{Repositories, Scheduler, TickOutcome};
