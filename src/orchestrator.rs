//! Drives one backend process from start to a terminal outcome.
//!
//! Each launched job gets its own driver task. The driver owns the
//! [`JobDescriptor`], publishes every state change on a `watch` channel and
//! receives resume/stop commands from the [`JobHandle`] over an `mpsc`
//! channel, so checks, resumes and stops for one job never overlap.

use std::ops::ControlFlow;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::catalog::Route;
use crate::client::{ProcessSnapshot, RequestError, RequestExecutor};
use crate::config::OrchestrationOptions;
use crate::error::FlowError;
use crate::flows::{FlowKind, FlowPlan};
use crate::poller::{IntervalPoller, PollError, PollEvent, Transient};
use crate::state_machine::{
    Failure, JobDescriptor, JobEvent, JobOutcome, JobPhase, JobReport, JobState, StateMachine,
};
use crate::token::ChallengeToken;

/// Resume/stop requests are rare; a handful of slots is plenty.
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// Launches jobs against a shared request executor.
pub struct JobOrchestrator<E> {
    executor: Arc<E>,
}

impl<E> Clone for JobOrchestrator<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<E: RequestExecutor> JobOrchestrator<E> {
    pub fn new(executor: Arc<E>) -> Self {
        Self { executor }
    }

    /// Spawns a driver for `plan` and returns its handle.
    ///
    /// The start route is resolved before anything is spawned, so missing
    /// parameters fail here instead of as a malformed network call. Must be
    /// called from within a Tokio runtime.
    pub fn launch(
        &self,
        plan: FlowPlan,
        options: OrchestrationOptions,
    ) -> Result<JobHandle, FlowError> {
        let challenge = plan
            .kind()
            .uses_challenge()
            .then(ChallengeToken::generate);
        plan.start(challenge.as_ref())?;

        let job = JobDescriptor::new(plan.kind(), options.retry_limit, challenge.clone());
        let id = job.id().to_string();
        let flow = plan.kind();

        let (state_tx, state_rx) = watch::channel(JobState::Idle);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let driver = Driver {
            ctx: JobContext {
                executor: Arc::clone(&self.executor),
                options,
                plan,
            },
            job,
            state: state_tx,
            commands: command_rx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run());

        Ok(JobHandle {
            id,
            flow,
            challenge,
            state: state_rx,
            commands: command_tx,
            cancel,
            task: Some(task),
        })
    }
}

enum Command {
    Resume {
        data: Value,
        reply: oneshot::Sender<Result<Value, FlowError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), FlowError>>,
    },
}

/// Caller-side view of a running job.
///
/// Dropping the handle abandons the job: its driver stops polling and exits
/// without notifying the backend.
pub struct JobHandle {
    id: String,
    flow: FlowKind,
    challenge: Option<ChallengeToken>,
    state: watch::Receiver<JobState>,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: Option<JoinHandle<JobReport>>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn flow(&self) -> FlowKind {
        self.flow
    }

    pub fn challenge(&self) -> Option<&ChallengeToken> {
        self.challenge.as_ref()
    }

    /// Latest published state.
    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// A receiver that always observes the latest state, even if subscribed late.
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    /// Waits for the job to reach a terminal state.
    pub async fn outcome(&self) -> JobOutcome {
        let mut rx = self.state.clone();
        let outcome = match rx.wait_for(JobState::is_terminal).await {
            Ok(state) => state.outcome(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            JobOutcome::Failed(Failure::Error(FlowError::InvalidState {
                operation: "await outcome",
                state: self.state().to_string(),
            }))
        })
    }

    /// Submits caller data (e.g. a one-time code) to the suspended process.
    ///
    /// Returns the backend's response to the resume call. A failed resume
    /// leaves the job where it was so the caller can try again.
    pub async fn resume(&self, data: Value) -> Result<Value, FlowError> {
        let current = self.state();
        if current.is_terminal() || current.process_id().is_none() {
            return Err(FlowError::InvalidState {
                operation: "resume",
                state: current.to_string(),
            });
        }

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Resume { data, reply })
            .await
            .map_err(|_| self.closed("resume"))?;
        rx.await.map_err(|_| self.closed("resume"))?
    }

    /// Stops the job. Calling it again, or after the job finished, is a no-op.
    ///
    /// Local polling is torn down before this returns; an error means the
    /// backend did not acknowledge the stop request.
    pub async fn stop(&self) -> Result<(), FlowError> {
        if self.state().is_terminal() {
            return Ok(());
        }

        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).await.is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Waits for the driver to exit and returns its audit record.
    ///
    /// Nobody can resume the job once the handle is consumed, so a job that
    /// is or becomes `AwaitingResume` is abandoned and its report returned.
    /// Returns `None` if the driver task panicked.
    pub async fn join(mut self) -> Option<JobReport> {
        let mut task = self.task.take()?;
        let mut states = self.state.clone();
        let suspended = async move {
            let _ = states
                .wait_for(|s| s.phase() == JobPhase::AwaitingResume)
                .await;
        };

        tokio::select! {
            report = &mut task => return report.ok(),
            _ = suspended => debug!("joined a suspended job, abandoning it"),
        }
        self.cancel.cancel();
        task.await.ok()
    }

    fn closed(&self, operation: &'static str) -> FlowError {
        FlowError::InvalidState {
            operation,
            state: self.state().to_string(),
        }
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Immutable per-job wiring: executor, resolved options and routes.
struct JobContext<E> {
    executor: Arc<E>,
    options: OrchestrationOptions,
    plan: FlowPlan,
}

impl<E: RequestExecutor> JobContext<E> {
    async fn call(&self, route: Route, body: Option<Value>) -> Result<Value, RequestError> {
        send(self.executor.as_ref(), &self.options, route, body).await
    }

    async fn start(&self, challenge: Option<&ChallengeToken>) -> Result<ProcessSnapshot, FlowError> {
        let mut attempt = 0u32;
        loop {
            let (route, body) = self.plan.start(challenge)?;
            match self
                .call(route, body)
                .await
                .and_then(ProcessSnapshot::from_value)
            {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) if err.is_transient() && attempt < self.options.start_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "start failed, retrying");
                    tokio::time::sleep(self.options.retry_delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn resume(
        &self,
        process_id: &str,
        challenge: Option<&ChallengeToken>,
        data: Value,
    ) -> Result<Value, FlowError> {
        let (route, body) = self.plan.resume(process_id, challenge, data)?;
        Ok(self.call(route, Some(body)).await?)
    }

    async fn stop(
        &self,
        process_id: &str,
        challenge: Option<&ChallengeToken>,
    ) -> Result<(), FlowError> {
        if let Some(route) = self.plan.stop(process_id, challenge)? {
            self.call(route, None).await?;
        }
        Ok(())
    }
}

/// Issues one request, bounding it by the per-call timeout.
pub(crate) async fn send<E: RequestExecutor>(
    executor: &E,
    options: &OrchestrationOptions,
    route: Route,
    body: Option<Value>,
) -> Result<Value, RequestError> {
    let request = route.into_request(body, options.credential.as_deref(), options.timeout);
    tokio::time::timeout(options.timeout, executor.execute(request))
        .await
        .unwrap_or(Err(RequestError::Timeout))
}

struct Driver<E> {
    ctx: JobContext<E>,
    job: JobDescriptor,
    state: watch::Sender<JobState>,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
}

impl<E: RequestExecutor> Driver<E> {
    async fn run(self) -> JobReport {
        let Driver {
            ctx,
            mut job,
            state,
            mut commands,
            cancel,
        } = self;
        let span = info_span!("job", job_id = %job.id(), flow = %job.flow());

        async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => debug!("handle dropped, abandoning job"),
                _ = drive(&ctx, &mut job, &state, &mut commands) => {}
            }
            JobReport::from_job(&job)
        }
        .instrument(span)
        .await
    }
}

async fn drive<E: RequestExecutor>(
    ctx: &JobContext<E>,
    job: &mut JobDescriptor,
    state: &watch::Sender<JobState>,
    commands: &mut mpsc::Receiver<Command>,
) {
    publish(job, state, JobEvent::Launch);
    info!("starting job");

    let challenge = job.challenge_token().cloned();
    let started = {
        let start = ctx.start(challenge.as_ref());
        tokio::pin!(start);
        loop {
            tokio::select! {
                result = &mut start => break Some(result),
                command = commands.recv() => match command {
                    None => return,
                    Some(Command::Stop { reply }) => {
                        publish(job, state, JobEvent::Stop);
                        info!("job stopped before the backend assigned a process id");
                        let _ = reply.send(Ok(()));
                        break None;
                    }
                    Some(Command::Resume { reply, .. }) => {
                        let _ = reply.send(Err(FlowError::InvalidState {
                            operation: "resume",
                            state: job.state().to_string(),
                        }));
                    }
                },
            }
        }
    };

    let snapshot = match started {
        None => return,
        Some(Ok(snapshot)) => snapshot,
        Some(Err(err)) => {
            warn!(error = %err, "start failed");
            publish(job, state, JobEvent::Fail(Failure::Error(err)));
            return;
        }
    };

    if let Err(err) = apply(job, state, JobEvent::Started(snapshot)) {
        warn!(error = %err, "unusable start response");
        publish(job, state, JobEvent::Fail(Failure::Error(err)));
        return;
    }
    info!(process_id = job.process_id().unwrap_or_default(), "process started");

    loop {
        let step = match job.state().phase() {
            JobPhase::Polling => poll_phase(ctx, job, state, commands).await,
            JobPhase::AwaitingResume => {
                info!("process awaiting caller input");
                match commands.recv().await {
                    Some(command) => handle_command(ctx, job, state, command).await,
                    None => ControlFlow::Break(()),
                }
            }
            _ => ControlFlow::Break(()),
        };
        if step.is_break() {
            break;
        }
    }

    info!(state = %job.state(), "job finished");
}

enum PollStep {
    Finished(Result<ProcessSnapshot, PollError<RequestError>>),
    Stop(Command),
    Closed,
}

async fn poll_phase<E: RequestExecutor>(
    ctx: &JobContext<E>,
    job: &mut JobDescriptor,
    state: &watch::Sender<JobState>,
    commands: &mut mpsc::Receiver<Command>,
) -> ControlFlow<()> {
    let process_id = job.process_id().unwrap_or_default().to_string();
    let challenge = job.challenge_token().cloned();
    let route = match ctx.plan.check(&process_id, challenge.as_ref()) {
        Ok(route) => route,
        Err(err) => {
            publish(job, state, JobEvent::Fail(Failure::Error(err)));
            return ControlFlow::Break(());
        }
    };

    // A resume waits for the in-flight check; the poller yields between checks.
    let interrupt = CancellationToken::new();
    let poller = IntervalPoller::new(ctx.options.poll_settings())
        .with_interrupt(interrupt.clone())
        .with_retries_spent(job.retry_count());
    let retry_limit = ctx.options.retry_limit;
    let mut deferred: Option<Command> = None;

    let step = {
        let job = &mut *job;
        let run = poller.run_observed(
            |snapshot: &ProcessSnapshot| {
                !(snapshot.status.is_terminal() || snapshot.status.needs_input())
            },
            || {
                let route = route.clone();
                async move {
                    ctx.call(route, None)
                        .await
                        .and_then(ProcessSnapshot::from_value)
                }
            },
            |event| match event {
                PollEvent::Tick(snapshot) => {
                    debug!(status = %snapshot.status, "checked process");
                    publish(job, state, JobEvent::Checked(snapshot.clone()));
                }
                PollEvent::Retry { attempt, error } => {
                    warn!(attempt, limit = %retry_limit, error = %error, "check failed, retrying");
                    publish(job, state, JobEvent::CheckFailed);
                }
            },
        );

        tokio::pin!(run);

        loop {
            tokio::select! {
                result = &mut run => break PollStep::Finished(result),
                command = commands.recv() => match command {
                    None => break PollStep::Closed,
                    Some(stop @ Command::Stop { .. }) => break PollStep::Stop(stop),
                    Some(Command::Resume { reply, .. }) if deferred.is_some() => {
                        let _ = reply.send(Err(FlowError::InvalidState {
                            operation: "resume",
                            state: JobPhase::Polling.to_string(),
                        }));
                    }
                    Some(resume) => {
                        deferred = Some(resume);
                        interrupt.cancel();
                    }
                },
            }
        }
    };

    let flow = match step {
        // The final tick has already moved the job on.
        PollStep::Finished(Ok(_)) => ControlFlow::Continue(()),
        PollStep::Finished(Err(PollError::RetryExhausted { retries, last })) => {
            warn!(retries, error = %last, "retry budget exhausted, stopping process");
            if let Err(err) = ctx.stop(&process_id, challenge.as_ref()).await {
                warn!(error = %err, "stop after exhausted retries failed");
            }
            publish(
                job,
                state,
                JobEvent::Fail(Failure::Error(FlowError::RetryExhausted { retries, last })),
            );
            ControlFlow::Break(())
        }
        PollStep::Finished(Err(PollError::Fatal(err))) => {
            warn!(error = %err, "check failed");
            publish(job, state, JobEvent::Fail(Failure::Error(err.into())));
            ControlFlow::Break(())
        }
        // The queued resume is handled below.
        PollStep::Finished(Err(PollError::Interrupted)) => ControlFlow::Continue(()),
        PollStep::Finished(Err(PollError::Cancelled)) | PollStep::Closed => ControlFlow::Break(()),
        PollStep::Stop(command) => handle_command(ctx, job, state, command).await,
    };

    match deferred {
        Some(command) => {
            let next = handle_command(ctx, job, state, command).await;
            if flow.is_break() {
                flow
            } else {
                next
            }
        }
        None => flow,
    }
}

async fn handle_command<E: RequestExecutor>(
    ctx: &JobContext<E>,
    job: &mut JobDescriptor,
    state: &watch::Sender<JobState>,
    command: Command,
) -> ControlFlow<()> {
    match command {
        Command::Stop { reply } => {
            publish(job, state, JobEvent::Stop);
            info!("job stopped by caller");
            let result = match job.process_id().map(str::to_string) {
                Some(process_id) => ctx.stop(&process_id, job.challenge_token()).await,
                None => Ok(()),
            };
            if let Err(err) = &result {
                warn!(error = %err, "stop request failed");
            }
            let _ = reply.send(result);
            ControlFlow::Break(())
        }
        Command::Resume { data, reply } => {
            let result = resume(ctx, job, state, data).await;
            if let Err(err) = &result {
                warn!(error = %err, "resume failed");
            }
            let _ = reply.send(result);
            ControlFlow::Continue(())
        }
    }
}

async fn resume<E: RequestExecutor>(
    ctx: &JobContext<E>,
    job: &mut JobDescriptor,
    state: &watch::Sender<JobState>,
    data: Value,
) -> Result<Value, FlowError> {
    let invalid = |job: &JobDescriptor| FlowError::InvalidState {
        operation: "resume",
        state: job.state().to_string(),
    };
    if job.state().is_terminal() {
        return Err(invalid(&*job));
    }
    let Some(process_id) = job.process_id().map(str::to_string) else {
        return Err(invalid(&*job));
    };
    if job.state().phase() == JobPhase::Polling {
        debug!("resume received while polling, passing it through");
    }

    let response = ctx
        .resume(&process_id, job.challenge_token(), data)
        .await?;
    apply(job, state, JobEvent::Resumed)?;
    info!("process resumed");
    Ok(response)
}

fn apply(
    job: &mut JobDescriptor,
    state: &watch::Sender<JobState>,
    event: JobEvent,
) -> Result<(), FlowError> {
    let next = StateMachine::next(job, event)?;
    state.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
    Ok(())
}

fn publish(job: &mut JobDescriptor, state: &watch::Sender<JobState>, event: JobEvent) {
    if let Err(err) = apply(job, state, event) {
        warn!(error = %err, "ignored state transition");
    }
}
