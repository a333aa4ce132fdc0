pub mod error;
pub mod http;
#[cfg(test)]
pub(crate) mod mock;
pub mod types;

use std::future::Future;

use serde_json::Value;

pub use error::RequestError;
pub use http::HttpExecutor;
pub use types::{ApiRequest, ProcessSnapshot, ProcessStatus, Verb};

/// Performs one network call against the backend.
///
/// Implementations must be safe to share between concurrently running jobs.
pub trait RequestExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<Value, RequestError>> + Send;
}
