mod cli;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::{Map, Value};
use tracing::{info, warn};

use cli::{Cli, Command};
use procpilot::client::HttpExecutor;
use procpilot::config::{OrchestrationOptions, Settings};
use procpilot::state_machine::{JobOutcome, JobState};
use procpilot::{FlowClient, JobHandle, logging};
use ui::JobProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    let mut settings = Settings::load()?;
    cli.apply(&mut settings);

    let executor = HttpExecutor::new(&settings.base_url)
        .with_context(|| format!("invalid base url {}", settings.base_url))?;
    let client = FlowClient::new(Arc::new(executor), OrchestrationOptions::from(&settings));

    match cli.command {
        Command::Details => print_json(&client.details().await?),
        Command::Browser => print_json(&client.run_browser().await?),
        Command::Institutions { code } => {
            print_json(&client.institutions(code.as_deref()).await?)
        }
        Command::Profiles { id, credential } => {
            print_json(&client.profiles(id.as_deref(), credential).await?)
        }
        Command::Accounts(filter) => print_json(&client.accounts(&filter.into()).await?),
        Command::Transactions(filter) => {
            print_json(&client.transactions(&filter.into()).await?)
        }
        Command::Wait { down: false } => print_json(&client.wait_until_available().await?),
        Command::Wait { down: true } => {
            client.wait_until_unavailable().await?;
            Ok(())
        }
        Command::Onboard { code, input } => {
            let handle = client.onboard(&code, input.prompts()?)?;
            follow(handle, &format!("onboard {code}"), &input.resume_field).await
        }
        Command::AddProfile { code, input } => {
            let handle = client.add_profile(&code, input.prompts()?)?;
            follow(handle, &format!("add profile for {code}"), &input.resume_field).await
        }
        Command::Login { id, resume_field } => {
            let handle = client.login(&id)?;
            follow(handle, &format!("login {id}"), &resume_field).await
        }
        Command::UpdateProfile { id, input } => {
            let handle = client.update_profile(&id, input.prompts()?)?;
            follow(handle, &format!("update profile {id}"), &input.resume_field).await
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Shows progress for `handle`, prompting for input and stopping on Ctrl-C.
async fn follow(handle: JobHandle, description: &str, resume_field: &str) -> Result<()> {
    info!(job_id = handle.id(), flow = %handle.flow(), "job launched");
    let progress = JobProgress::start(description);
    let mut states = handle.subscribe();

    loop {
        let state = states.borrow_and_update().clone();
        progress.update_state(&state);
        if state.is_terminal() {
            break;
        }

        if let JobState::AwaitingResume { snapshot, .. } = &state {
            let answer = tokio::task::block_in_place(|| progress.prompt(resume_field, snapshot))
                .context("failed to read input")?;
            let mut data = Map::new();
            data.insert(resume_field.to_string(), Value::String(answer.trim().to_string()));
            if let Err(err) = handle.resume(Value::Object(data)).await {
                warn!(error = %err, "resume rejected");
            }
            continue;
        }

        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if let Err(err) = handle.stop().await {
                    warn!(error = %err, "backend did not acknowledge stop");
                }
            }
        }
    }

    let outcome = handle.outcome().await;
    progress.complete(&outcome);
    if let Some(report) = handle.join().await {
        progress.print_report(&report);
    }

    match outcome {
        JobOutcome::Done(snapshot) => print_json(&snapshot),
        JobOutcome::Failed(failure) => bail!("job failed: {failure}"),
        JobOutcome::Stopped => Ok(()),
    }
}
