//! Data Transfer Objects
//!
//! DTOs exchanged between the scheduler, its HTTP API and the build executor.

pub mod build;
pub mod job;
