use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::catalog::{Operation, Route};
use crate::error::FlowError;
use crate::token::ChallengeToken;

/// The long-running backend processes this crate knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Onboarding a data source (OTA). The only flow that uses a challenge token.
    Onboard,
    AddProfile,
    Login,
    UpdateProfile,
}

impl FlowKind {
    pub fn uses_challenge(&self) -> bool {
        matches!(self, FlowKind::Onboard)
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowKind::Onboard => write!(f, "onboard"),
            FlowKind::AddProfile => write!(f, "add-profile"),
            FlowKind::Login => write!(f, "login"),
            FlowKind::UpdateProfile => write!(f, "update-profile"),
        }
    }
}

/// Start/check/resume/stop wiring for one flow, bound to the operation catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowPlan {
    kind: FlowKind,
    institution: Option<String>,
    profile_id: Option<String>,
    prompts: Value,
}

impl FlowPlan {
    pub fn onboard(institution: impl Into<String>, prompts: Value) -> Self {
        Self {
            kind: FlowKind::Onboard,
            institution: Some(institution.into()),
            profile_id: None,
            prompts,
        }
    }

    pub fn add_profile(institution: impl Into<String>, prompts: Value) -> Self {
        Self {
            kind: FlowKind::AddProfile,
            institution: Some(institution.into()),
            profile_id: None,
            prompts,
        }
    }

    pub fn login(profile_id: impl Into<String>) -> Self {
        Self {
            kind: FlowKind::Login,
            institution: None,
            profile_id: Some(profile_id.into()),
            prompts: Value::Null,
        }
    }

    pub fn update_profile(profile_id: impl Into<String>, prompts: Value) -> Self {
        Self {
            kind: FlowKind::UpdateProfile,
            institution: None,
            profile_id: Some(profile_id.into()),
            prompts,
        }
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    /// Route and body of the request that creates the backend process.
    pub fn start(
        &self,
        challenge: Option<&ChallengeToken>,
    ) -> Result<(Route, Option<Value>), FlowError> {
        match self.kind {
            FlowKind::Onboard => {
                let code = self.institution()?;
                let challenge = self.challenge(challenge)?;
                let body = json!({
                    "code": code,
                    "prompts": self.prompts,
                    "challenge": challenge,
                });
                Ok((Operation::StartOta.route()?, Some(body)))
            }
            FlowKind::AddProfile => {
                let body = json!({ "code": self.institution()?, "prompts": self.prompts });
                Ok((Operation::AddProfile.route()?, Some(body)))
            }
            FlowKind::Login => {
                let route = Operation::LoginProfile {
                    profile_id: self.profile_id()?,
                }
                .route()?;
                Ok((route, None))
            }
            FlowKind::UpdateProfile => {
                let route = Operation::UpdateProfile {
                    profile_id: self.profile_id()?,
                }
                .route()?;
                Ok((route, Some(json!({ "prompts": self.prompts }))))
            }
        }
    }

    /// Route polled for the status of `process_id`.
    pub fn check(
        &self,
        process_id: &str,
        challenge: Option<&ChallengeToken>,
    ) -> Result<Route, FlowError> {
        match self.kind {
            FlowKind::Onboard => Operation::QueryOta {
                process_id,
                challenge: self.challenge(challenge)?,
            }
            .route(),
            _ => Operation::GetProcess { process_id }.route(),
        }
    }

    /// Route and body submitting caller data to a suspended process.
    ///
    /// `data` must be a JSON object (or null). OTA resumes carry the challenge
    /// token; add-profile resumes carry the institution code unless `data`
    /// overrides it.
    pub fn resume(
        &self,
        process_id: &str,
        challenge: Option<&ChallengeToken>,
        data: Value,
    ) -> Result<(Route, Value), FlowError> {
        let data = match data {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(FlowError::configuration(format!(
                    "resume data must be a JSON object, got {other}"
                )));
            }
        };

        match self.kind {
            FlowKind::Onboard => {
                let mut body = data;
                body.insert(
                    "challenge".into(),
                    Value::String(self.challenge(challenge)?.to_string()),
                );
                let route = Operation::ResumeOta { process_id }.route()?;
                Ok((route, Value::Object(body)))
            }
            FlowKind::AddProfile => {
                let mut body = Map::new();
                body.insert("code".into(), Value::String(self.institution()?.to_string()));
                body.extend(data);
                let route = Operation::ResumeProcess { process_id }.route()?;
                Ok((route, Value::Object(body)))
            }
            FlowKind::Login | FlowKind::UpdateProfile => {
                let route = Operation::ResumeProcess { process_id }.route()?;
                Ok((route, Value::Object(data)))
            }
        }
    }

    /// Route that cancels the backend process, if the flow has one.
    pub fn stop(
        &self,
        process_id: &str,
        challenge: Option<&ChallengeToken>,
    ) -> Result<Option<Route>, FlowError> {
        match self.kind {
            FlowKind::Onboard => Operation::StopOta {
                process_id,
                challenge: self.challenge(challenge)?,
            }
            .route()
            .map(Some),
            _ => Ok(None),
        }
    }

    fn institution(&self) -> Result<&str, FlowError> {
        self.institution
            .as_deref()
            .filter(|code| !code.trim().is_empty())
            .ok_or_else(|| FlowError::configuration(format!("{} requires an institution code", self.kind)))
    }

    fn profile_id(&self) -> Result<&str, FlowError> {
        self.profile_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| FlowError::configuration(format!("{} requires a profile id", self.kind)))
    }

    fn challenge<'t>(&self, challenge: Option<&'t ChallengeToken>) -> Result<&'t str, FlowError> {
        challenge
            .map(ChallengeToken::as_str)
            .ok_or_else(|| FlowError::configuration(format!("{} requires a challenge token", self.kind)))
    }
}
