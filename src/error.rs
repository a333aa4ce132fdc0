use thiserror::Error;

use crate::client::RequestError;
use crate::poller::Transient;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("transport error: {0}")]
    Transport(RequestError),

    #[error("backend rejected request (status {status}): {message}")]
    BackendRejected { status: u16, message: String },

    #[error("retry budget exhausted after {retries} retries, last failure: {last}")]
    RetryExhausted { retries: u32, last: RequestError },

    #[error("cannot {operation} while job is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
}

impl FlowError {
    pub fn configuration(message: impl Into<String>) -> Self {
        FlowError::Configuration(message.into())
    }
}

impl From<RequestError> for FlowError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Rejected { status, message } => {
                FlowError::BackendRejected { status, message }
            }
            RequestError::Malformed(message) => FlowError::MalformedResponse(message),
            transport => FlowError::Transport(transport),
        }
    }
}

impl Transient for FlowError {
    fn is_transient(&self) -> bool {
        matches!(self, FlowError::Transport(_))
    }
}
