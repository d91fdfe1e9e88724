//! Conveyor Core
//!
//! Core types and abstractions for the Conveyor CI scheduler.
//!
//! This crate contains:
//! - Domain types: resources, versions, builds, job configuration and input mappings
//! - DTOs: Data transfer objects for the scheduler API and the execution boundary

pub mod domain;
pub mod dto;
