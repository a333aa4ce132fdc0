mod job;
mod state;

pub use job::{JobDescriptor, JobReport};
pub use state::{Failure, JobEvent, JobOutcome, JobPhase, JobState, StateMachine};
