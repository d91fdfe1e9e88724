//! Job scheduling DTOs

use serde::{Deserialize, Serialize};

use crate::domain::job::JobId;
use crate::domain::mapping::{InputMapping, PendingInputs};

/// Scheduling state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingState {
    /// No satisfying input mapping yet
    Idle,
    /// A resolved mapping is waiting for a trigger
    Pending,
}

/// What the scheduler currently knows about a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSchedulingStatus {
    pub job_id: JobId,
    pub state: SchedulingState,
    pub pending: Vec<InputMapping>,
    pub config_error: Option<String>,
    pub manual_trigger_requested: bool,
}

impl JobSchedulingStatus {
    pub fn new(
        job_id: JobId,
        pending: Option<PendingInputs>,
        config_error: Option<String>,
        manual_trigger_requested: bool,
    ) -> Self {
        let pending = pending.map(|p| p.mappings).unwrap_or_default();
        let state = if pending.is_empty() {
            SchedulingState::Idle
        } else {
            SchedulingState::Pending
        };

        Self {
            job_id,
            state,
            pending,
            config_error,
            manual_trigger_requested,
        }
    }
}
