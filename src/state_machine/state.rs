use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::job::JobDescriptor;
use crate::client::{ProcessSnapshot, ProcessStatus};
use crate::error::FlowError;

/// Coarse lifecycle phase of a job, without payloads.
///
/// Idle → Starting → Polling ⇄ AwaitingResume → (Done | Failed | Stopped)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    Idle,
    Starting,
    Polling,
    AwaitingResume,
    Done,
    Failed,
    Stopped,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Done | JobPhase::Failed | JobPhase::Stopped)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::Idle => write!(f, "IDLE"),
            JobPhase::Starting => write!(f, "STARTING"),
            JobPhase::Polling => write!(f, "POLLING"),
            JobPhase::AwaitingResume => write!(f, "AWAITING_RESUME"),
            JobPhase::Done => write!(f, "DONE"),
            JobPhase::Failed => write!(f, "FAILED"),
            JobPhase::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Why a job ended in [`JobState::Failed`].
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// The backend reported `error` or `partial`.
    Reported {
        status: ProcessStatus,
        snapshot: Value,
    },
    /// The orchestrator gave up (start failure, rejected check, retries exhausted).
    Error(FlowError),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Reported { status, .. } => write!(f, "backend reported status {status}"),
            Failure::Error(err) => write!(f, "{err}"),
        }
    }
}

/// Current state of a job as published to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Idle,
    Starting,
    Polling {
        process_id: String,
        status: ProcessStatus,
        retries: u32,
    },
    AwaitingResume {
        process_id: String,
        snapshot: Value,
    },
    Done {
        snapshot: Value,
    },
    Failed {
        failure: Failure,
    },
    Stopped,
}

impl JobState {
    pub fn phase(&self) -> JobPhase {
        match self {
            JobState::Idle => JobPhase::Idle,
            JobState::Starting => JobPhase::Starting,
            JobState::Polling { .. } => JobPhase::Polling,
            JobState::AwaitingResume { .. } => JobPhase::AwaitingResume,
            JobState::Done { .. } => JobPhase::Done,
            JobState::Failed { .. } => JobPhase::Failed,
            JobState::Stopped => JobPhase::Stopped,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn process_id(&self) -> Option<&str> {
        match self {
            JobState::Polling { process_id, .. } | JobState::AwaitingResume { process_id, .. } => {
                Some(process_id)
            }
            _ => None,
        }
    }

    /// The final result, once the state is terminal.
    pub fn outcome(&self) -> Option<JobOutcome> {
        match self {
            JobState::Done { snapshot } => Some(JobOutcome::Done(snapshot.clone())),
            JobState::Failed { failure } => Some(JobOutcome::Failed(failure.clone())),
            JobState::Stopped => Some(JobOutcome::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.phase())
    }
}

/// Eventual result of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done(Value),
    Failed(Failure),
    Stopped,
}

/// Inputs that move a job between states.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Launch,
    Started(ProcessSnapshot),
    Checked(ProcessSnapshot),
    CheckFailed,
    Resumed,
    Stop,
    Fail(Failure),
}

impl JobEvent {
    fn name(&self) -> &'static str {
        match self {
            JobEvent::Launch => "launch",
            JobEvent::Started(_) => "start",
            JobEvent::Checked(_) => "check",
            JobEvent::CheckFailed => "retry",
            JobEvent::Resumed => "resume",
            JobEvent::Stop => "stop",
            JobEvent::Fail(_) => "fail",
        }
    }
}

/// Drives a [`JobDescriptor`] through its lifecycle.
pub struct StateMachine;

impl StateMachine {
    /// Applies `event` to the job and returns the resulting state.
    ///
    /// - A start or check snapshot is classified by its status: terminal
    ///   statuses end the job, `challenge` suspends it awaiting input, anything
    ///   else keeps it polling.
    /// - A successful check resets the retry counter; a failed one increments it.
    ///   A resume out of `AwaitingResume` resets it too; a resume while polling
    ///   does not.
    /// - `Stop` on a terminal job is a no-op and returns the terminal state.
    /// - Any other event on a terminal job, or an event that does not apply to
    ///   the current state, is rejected with [`FlowError::InvalidState`].
    pub fn next(job: &mut JobDescriptor, event: JobEvent) -> Result<JobState, FlowError> {
        let current = job.state.clone();

        let next = match (current, event) {
            (JobState::Idle, JobEvent::Launch) => JobState::Starting,
            (JobState::Starting, JobEvent::Started(snapshot)) => {
                let process_id = snapshot
                    .process_id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        FlowError::MalformedResponse("start response carries no processId".into())
                    })?;
                job.process_id = Some(process_id);
                Self::classify(job, snapshot)
            }
            (JobState::Polling { .. }, JobEvent::Checked(snapshot)) => {
                job.retry_count = 0;
                Self::classify(job, snapshot)
            }
            (
                JobState::Polling {
                    process_id, status, ..
                },
                JobEvent::CheckFailed,
            ) => {
                job.retry_count = job.retry_count.saturating_add(1);
                JobState::Polling {
                    process_id,
                    status,
                    retries: job.retry_count,
                }
            }
            (JobState::AwaitingResume { process_id, .. }, JobEvent::Resumed) => {
                job.pending_probe = false;
                job.retry_count = 0;
                JobState::Polling {
                    process_id,
                    status: job.status.clone(),
                    retries: 0,
                }
            }
            // Pass-through resume: the retry budget carries over.
            (
                JobState::Polling {
                    process_id,
                    status,
                    retries,
                },
                JobEvent::Resumed,
            ) => JobState::Polling {
                process_id,
                status,
                retries,
            },
            (state, JobEvent::Stop) if state.is_terminal() => state,
            (_, JobEvent::Stop) => JobState::Stopped,
            (state, JobEvent::Fail(failure)) if !state.is_terminal() => {
                JobState::Failed { failure }
            }
            (state, event) => {
                return Err(FlowError::InvalidState {
                    operation: event.name(),
                    state: state.to_string(),
                });
            }
        };

        if next.phase() != job.state.phase() {
            job.state_history.push(job.state.phase());
        }
        job.state = next.clone();
        job.updated_at = Utc::now();
        Ok(next)
    }

    fn classify(job: &mut JobDescriptor, snapshot: ProcessSnapshot) -> JobState {
        job.status = snapshot.status.clone();
        let process_id = job.process_id.clone().unwrap_or_default();

        match snapshot.status {
            status if status.needs_input() => {
                job.pending_probe = true;
                JobState::AwaitingResume {
                    process_id,
                    snapshot: snapshot.body,
                }
            }
            ProcessStatus::Done => JobState::Done {
                snapshot: snapshot.body,
            },
            ProcessStatus::Stopped => JobState::Stopped,
            status @ (ProcessStatus::Error | ProcessStatus::Partial) => JobState::Failed {
                failure: Failure::Reported {
                    status,
                    snapshot: snapshot.body,
                },
            },
            status => JobState::Polling {
                process_id,
                status,
                retries: job.retry_count,
            },
        }
    }
}
