use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::state::{JobPhase, JobState};
use crate::client::ProcessStatus;
use crate::flows::FlowKind;
use crate::poller::RetryLimit;
use crate::token::ChallengeToken;

/// Everything the orchestrator knows about one running job.
///
/// Owned by the job's driver task; callers only ever see snapshots of its state
/// and the final [`JobReport`].
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub(crate) id: String,
    pub(crate) flow: FlowKind,
    pub(crate) process_id: Option<String>,
    pub(crate) challenge_token: Option<ChallengeToken>,
    pub(crate) status: ProcessStatus,
    pub(crate) retry_count: u32,
    pub(crate) retry_limit: RetryLimit,
    pub(crate) pending_probe: bool,
    pub(crate) state: JobState,
    pub(crate) state_history: Vec<JobPhase>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn new(
        flow: FlowKind,
        retry_limit: RetryLimit,
        challenge_token: Option<ChallengeToken>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            flow,
            process_id: None,
            challenge_token,
            status: ProcessStatus::Unreported,
            retry_count: 0,
            retry_limit,
            pending_probe: false,
            state: JobState::Idle,
            state_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn flow(&self) -> FlowKind {
        self.flow
    }

    pub fn process_id(&self) -> Option<&str> {
        self.process_id.as_deref()
    }

    pub fn challenge_token(&self) -> Option<&ChallengeToken> {
        self.challenge_token.as_ref()
    }

    pub fn status(&self) -> &ProcessStatus {
        &self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn pending_probe(&self) -> bool {
        self.pending_probe
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }
}

/// Audit record produced when a job reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub flow: FlowKind,
    pub process_id: Option<String>,
    pub final_phase: JobPhase,
    pub last_status: String,
    pub state_transitions: Vec<JobPhase>,
    pub retry_count: u32,
    pub retry_limit: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl JobReport {
    pub fn from_job(job: &JobDescriptor) -> Self {
        let now = Utc::now();
        let duration = now - job.created_at;
        let mut transitions = job.state_history.clone();
        transitions.push(job.state.phase());

        Self {
            job_id: job.id.clone(),
            flow: job.flow,
            process_id: job.process_id.clone(),
            final_phase: job.state.phase(),
            last_status: job.status.to_string(),
            state_transitions: transitions,
            retry_count: job.retry_count,
            retry_limit: job.retry_limit.to_string(),
            started_at: job.created_at,
            completed_at: now,
            duration_ms: duration.num_milliseconds(),
        }
    }
}
