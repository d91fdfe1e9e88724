//! Core domain types
//!
//! This module contains the core domain structures used across Conveyor services.
//! Persistence lives in the scheduler's repositories; these types only describe
//! the shape of pipelines, resource versions, builds and resolved input mappings.

pub mod build;
pub mod job;
pub mod mapping;
pub mod pipeline;
pub mod resource;
