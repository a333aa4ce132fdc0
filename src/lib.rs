//! Client-side orchestration of long-running backend processes.
//!
//! A flow starts a process on the backend, polls its status on an interval,
//! suspends when the backend asks for caller input, resumes with that input and
//! ends in exactly one of done, failed or stopped. [`flows::FlowClient`] is the
//! entry point; every call goes through a [`client::RequestExecutor`].

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod flows;
pub mod logging;
pub mod orchestrator;
pub mod poller;
pub mod state_machine;
pub mod token;

pub use error::FlowError;
pub use flows::{FlowClient, FlowKind, FlowPlan};
pub use orchestrator::{JobHandle, JobOrchestrator};
