//! Input version resolution
//!
//! Pure functions over an immutable [`VersionsDB`] snapshot:
//! - Candidate generation per input (pins, disabled versions)
//! - Joint resolution of `passed` constraints across a job's inputs

pub mod candidates;
pub mod resolver;
pub mod versions_db;

pub use candidates::{InputCandidates, candidates};
pub use resolver::{DEFAULT_MAX_ITERATIONS, ResolvedVersion, Resolver, ResolverInput};
pub use versions_db::{VersionsDB, VersionsDBBuilder};
