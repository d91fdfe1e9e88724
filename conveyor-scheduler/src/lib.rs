//! Conveyor Scheduler
//!
//! Decides, for every job of every pipeline, which resource versions its next
//! build runs against, and hands builds to an external executor.
//!
//! Layout:
//! - `algorithm`: versions snapshot, candidate generation, passed-constraint search
//! - `service`: input mapping, the scheduling tick and build dispatch
//! - `repository`: storage traits with Postgres and in-memory backends
//! - `api`: HTTP endpoints over the Postgres store

pub mod algorithm;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod repository;
pub mod service;
