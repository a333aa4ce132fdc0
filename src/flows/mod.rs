//! Entry points: orchestrated flows, one-shot catalog calls and service waits.

mod plan;

pub use plan::{FlowKind, FlowPlan};

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::catalog::{ListFilter, Operation};
use crate::client::{RequestError, RequestExecutor};
use crate::config::OrchestrationOptions;
use crate::error::FlowError;
use crate::orchestrator::{JobHandle, JobOrchestrator, send};
use crate::poller::{
    IntervalPoller, PollError, RetryLimit, continue_until_truthy, continue_while_present,
};

/// Backend client bound to one executor and one set of options.
pub struct FlowClient<E> {
    executor: Arc<E>,
    options: OrchestrationOptions,
}

impl<E: RequestExecutor> FlowClient<E> {
    pub fn new(executor: Arc<E>, options: OrchestrationOptions) -> Self {
        Self { executor, options }
    }

    /// Same executor, different options (e.g. another credential).
    pub fn with_options(&self, options: OrchestrationOptions) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            options,
        }
    }

    pub fn options(&self) -> &OrchestrationOptions {
        &self.options
    }

    /// Onboards a data source through the OTA process of `institution`.
    pub fn onboard(&self, institution: &str, prompts: Value) -> Result<JobHandle, FlowError> {
        self.launch(FlowPlan::onboard(institution, prompts))
    }

    pub fn add_profile(&self, institution: &str, prompts: Value) -> Result<JobHandle, FlowError> {
        self.launch(FlowPlan::add_profile(institution, prompts))
    }

    pub fn login(&self, profile_id: &str) -> Result<JobHandle, FlowError> {
        self.launch(FlowPlan::login(profile_id))
    }

    pub fn update_profile(&self, profile_id: &str, prompts: Value) -> Result<JobHandle, FlowError> {
        self.launch(FlowPlan::update_profile(profile_id, prompts))
    }

    fn launch(&self, plan: FlowPlan) -> Result<JobHandle, FlowError> {
        info!(flow = %plan.kind(), "launching flow");
        JobOrchestrator::new(Arc::clone(&self.executor)).launch(plan, self.options.clone())
    }

    pub async fn details(&self) -> Result<Value, FlowError> {
        self.fetch(Operation::GetDetails).await
    }

    pub async fn run_browser(&self) -> Result<Value, FlowError> {
        self.fetch(Operation::RunBrowser).await
    }

    /// All institutions, or the one identified by `code`.
    pub async fn institutions(&self, code: Option<&str>) -> Result<Value, FlowError> {
        self.fetch(Operation::GetInstitutions { code }).await
    }

    /// All profiles, one profile, or (with `credential`) that profile's credential.
    pub async fn profiles(
        &self,
        profile_id: Option<&str>,
        credential: bool,
    ) -> Result<Value, FlowError> {
        self.fetch(Operation::GetProfiles {
            profile_id,
            credential,
        })
        .await
    }

    pub async fn accounts(&self, filter: &ListFilter) -> Result<Value, FlowError> {
        self.fetch(Operation::GetAccounts { filter }).await
    }

    pub async fn transactions(&self, filter: &ListFilter) -> Result<Value, FlowError> {
        self.fetch(Operation::GetTransactions { filter }).await
    }

    /// Polls the details endpoint until the service answers with something truthy.
    ///
    /// Connection failures are retried without limit; a rejection ends the wait.
    pub async fn wait_until_available(&self) -> Result<Value, FlowError> {
        let mut settings = self.options.poll_settings();
        settings.retry_limit = RetryLimit::Unbounded;
        let route = Operation::GetDetails.route()?;

        let details = IntervalPoller::new(settings)
            .run(continue_until_truthy, || {
                let route = route.clone();
                async move { send(self.executor.as_ref(), &self.options, route, None).await }
            })
            .await
            .map_err(poll_failure)?;
        info!("service is available");
        Ok(details)
    }

    /// Polls the details endpoint until the service stops answering.
    pub async fn wait_until_unavailable(&self) -> Result<(), FlowError> {
        let route = Operation::GetDetails.route()?;

        IntervalPoller::new(self.options.poll_settings())
            .run(continue_while_present, || {
                let route = route.clone();
                async move {
                    match send(self.executor.as_ref(), &self.options, route, None).await {
                        Ok(Value::Null) => Ok(Value::Bool(true)),
                        Ok(details) => Ok(details),
                        Err(RequestError::Timeout | RequestError::Network(_)) => Ok(Value::Null),
                        Err(err) => Err(err),
                    }
                }
            })
            .await
            .map_err(poll_failure)?;
        info!("service is down");
        Ok(())
    }

    async fn fetch(&self, operation: Operation<'_>) -> Result<Value, FlowError> {
        let route = operation.route()?;
        debug!(operation = operation.name(), path = %route.path, "calling backend");
        Ok(send(self.executor.as_ref(), &self.options, route, None).await?)
    }
}

fn poll_failure(err: PollError<RequestError>) -> FlowError {
    match err {
        PollError::RetryExhausted { retries, last } => FlowError::RetryExhausted { retries, last },
        PollError::Fatal(err) => err.into(),
        PollError::Cancelled | PollError::Interrupted => FlowError::InvalidState {
            operation: "poll",
            state: "CANCELLED".into(),
        },
    }
}
