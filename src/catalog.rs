//! Logical backend operations and the verb/path each one maps to.

use std::time::Duration;

use serde_json::Value;

use crate::client::{ApiRequest, Verb};
use crate::error::FlowError;

/// Optional query filters for the account and transaction listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub profile_id: Option<String>,
    pub account_id: Option<String>,
    pub transaction_id: Option<String>,
    /// Inclusive lower date bound, as understood by the backend (`YYYY-MM-DD`).
    pub from: Option<String>,
    pub to: Option<String>,
}

impl ListFilter {
    fn query(&self) -> Vec<(String, String)> {
        [
            ("profileId", &self.profile_id),
            ("accountId", &self.account_id),
            ("transactionId", &self.transaction_id),
            ("from", &self.from),
            ("to", &self.to),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_string(), v.to_string()))
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation<'a> {
    GetDetails,
    RunBrowser,
    GetInstitutions { code: Option<&'a str> },
    StartOta,
    QueryOta { process_id: &'a str, challenge: &'a str },
    ResumeOta { process_id: &'a str },
    StopOta { process_id: &'a str, challenge: &'a str },
    AddProfile,
    GetProfiles { profile_id: Option<&'a str>, credential: bool },
    LoginProfile { profile_id: &'a str },
    UpdateProfile { profile_id: &'a str },
    GetProcess { process_id: &'a str },
    ResumeProcess { process_id: &'a str },
    GetAccounts { filter: &'a ListFilter },
    GetTransactions { filter: &'a ListFilter },
}

/// A resolved verb, path and query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub verb: Verb,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Route {
    fn new(verb: Verb, path: impl Into<String>) -> Self {
        Self {
            verb,
            path: path.into(),
            query: Vec::new(),
        }
    }

    fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn into_request(
        self,
        body: Option<Value>,
        credential: Option<&str>,
        timeout: Duration,
    ) -> ApiRequest {
        ApiRequest {
            verb: self.verb,
            path: self.path,
            query: self.query,
            body,
            credential: credential.map(str::to_string),
            timeout,
        }
    }
}

impl Operation<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::GetDetails => "get_details",
            Operation::RunBrowser => "run_browser",
            Operation::GetInstitutions { .. } => "get_institutions",
            Operation::StartOta => "start_ota",
            Operation::QueryOta { .. } => "query_ota",
            Operation::ResumeOta { .. } => "resume_ota",
            Operation::StopOta { .. } => "stop_ota",
            Operation::AddProfile => "add_profile",
            Operation::GetProfiles { .. } => "get_profiles",
            Operation::LoginProfile { .. } => "login_profile",
            Operation::UpdateProfile { .. } => "update_profile",
            Operation::GetProcess { .. } => "get_process",
            Operation::ResumeProcess { .. } => "resume_process",
            Operation::GetAccounts { .. } => "get_accounts",
            Operation::GetTransactions { .. } => "get_transactions",
        }
    }

    /// Resolves the operation to a route, failing on empty required placeholders.
    pub fn route(&self) -> Result<Route, FlowError> {
        let route = match self {
            Operation::GetDetails => Route::new(Verb::Get, "/"),
            Operation::RunBrowser => Route::new(Verb::Get, "/public/browser"),
            Operation::GetInstitutions { code } => Route::new(
                Verb::Get,
                format!("/ota/institutions/{}", code.unwrap_or_default()),
            ),
            Operation::StartOta => Route::new(Verb::Post, "/ota/process"),
            Operation::QueryOta {
                process_id,
                challenge,
            } => Route::new(
                Verb::Get,
                format!("/ota/process/{}", self.required("processId", process_id)?),
            )
            .with_query("challenge", self.required("challenge", challenge)?),
            Operation::ResumeOta { process_id } => Route::new(
                Verb::Post,
                format!("/ota/process/{}", self.required("processId", process_id)?),
            ),
            Operation::StopOta {
                process_id,
                challenge,
            } => Route::new(
                Verb::Delete,
                format!("/ota/process/{}", self.required("processId", process_id)?),
            )
            .with_query("challenge", self.required("challenge", challenge)?),
            Operation::AddProfile => Route::new(Verb::Post, "/profiles"),
            Operation::GetProfiles {
                profile_id,
                credential,
            } => {
                let id = profile_id.unwrap_or_default();
                if *credential && id.is_empty() {
                    return Err(self.missing("profileId"));
                }
                let suffix = if *credential { "/credential" } else { "" };
                Route::new(Verb::Get, format!("/profiles/{id}{suffix}"))
            }
            Operation::LoginProfile { profile_id } => Route::new(
                Verb::Post,
                format!("/profiles/{}/login", self.required("profileId", profile_id)?),
            ),
            Operation::UpdateProfile { profile_id } => Route::new(
                Verb::Put,
                format!("/profiles/{}", self.required("profileId", profile_id)?),
            ),
            Operation::GetProcess { process_id } => Route::new(
                Verb::Get,
                format!("/processes/{}", self.required("processId", process_id)?),
            ),
            Operation::ResumeProcess { process_id } => Route::new(
                Verb::Post,
                format!("/processes/{}", self.required("processId", process_id)?),
            ),
            Operation::GetAccounts { filter } => Route {
                query: filter.query(),
                ..Route::new(Verb::Get, "/accounts")
            },
            Operation::GetTransactions { filter } => Route {
                query: filter.query(),
                ..Route::new(Verb::Get, "/transactions")
            },
        };
        Ok(route)
    }

    fn required<'v>(&self, placeholder: &str, value: &'v str) -> Result<&'v str, FlowError> {
        if value.trim().is_empty() {
            Err(self.missing(placeholder))
        } else {
            Ok(value)
        }
    }

    fn missing(&self, placeholder: &str) -> FlowError {
        FlowError::configuration(format!(
            "{} requires a non-empty {placeholder}",
            self.name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(op: Operation<'_>) -> Route {
        op.route().unwrap()
    }

    #[test]
    fn static_routes() {
        assert_eq!(route(Operation::GetDetails), Route::new(Verb::Get, "/"));
        assert_eq!(route(Operation::RunBrowser).path, "/public/browser");
        assert_eq!(route(Operation::StartOta), Route::new(Verb::Post, "/ota/process"));
        assert_eq!(route(Operation::AddProfile), Route::new(Verb::Post, "/profiles"));
    }

    #[test]
    fn institutions_code_is_optional() {
        assert_eq!(
            route(Operation::GetInstitutions { code: None }).path,
            "/ota/institutions/"
        );
        assert_eq!(
            route(Operation::GetInstitutions { code: Some("bank01") }).path,
            "/ota/institutions/bank01"
        );
    }

    #[test]
    fn ota_routes_carry_challenge_in_query() {
        let query = route(Operation::QueryOta {
            process_id: "p1",
            challenge: "tok",
        });
        assert_eq!(query.verb, Verb::Get);
        assert_eq!(query.path, "/ota/process/p1");
        assert_eq!(query.query, vec![("challenge".to_string(), "tok".to_string())]);

        let stop = route(Operation::StopOta {
            process_id: "p1",
            challenge: "tok",
        });
        assert_eq!(stop.verb, Verb::Delete);
        assert_eq!(stop.path, "/ota/process/p1");
        assert_eq!(stop.query.len(), 1);

        let resume = route(Operation::ResumeOta { process_id: "p1" });
        assert_eq!(resume, Route::new(Verb::Post, "/ota/process/p1"));
    }

    #[test]
    fn profile_routes() {
        assert_eq!(
            route(Operation::GetProfiles {
                profile_id: None,
                credential: false
            })
            .path,
            "/profiles/"
        );
        assert_eq!(
            route(Operation::GetProfiles {
                profile_id: Some("42"),
                credential: true
            })
            .path,
            "/profiles/42/credential"
        );
        assert_eq!(
            route(Operation::LoginProfile { profile_id: "42" }),
            Route::new(Verb::Post, "/profiles/42/login")
        );
        assert_eq!(
            route(Operation::UpdateProfile { profile_id: "42" }),
            Route::new(Verb::Put, "/profiles/42")
        );
        assert_eq!(
            route(Operation::GetProcess { process_id: "p9" }).path,
            "/processes/p9"
        );
        assert_eq!(
            route(Operation::ResumeProcess { process_id: "p9" }).verb,
            Verb::Post
        );
    }

    #[test]
    fn list_filters_become_query_parameters() {
        let filter = ListFilter {
            account_id: Some("acc-1".into()),
            from: Some("2024-01-01".into()),
            to: Some(String::new()),
            ..Default::default()
        };
        let r = route(Operation::GetTransactions { filter: &filter });
        assert_eq!(r.path, "/transactions");
        assert_eq!(
            r.query,
            vec![
                ("accountId".to_string(), "acc-1".to_string()),
                ("from".to_string(), "2024-01-01".to_string()),
            ]
        );
        let all = route(Operation::GetAccounts {
            filter: &ListFilter::default(),
        });
        assert!(all.query.is_empty());
    }

    #[test]
    fn missing_placeholders_fail_fast() {
        let err = Operation::GetProcess { process_id: "" }.route().unwrap_err();
        assert_eq!(
            err,
            FlowError::Configuration("get_process requires a non-empty processId".into())
        );

        let err = Operation::QueryOta {
            process_id: "p1",
            challenge: " ",
        }
        .route()
        .unwrap_err();
        assert!(matches!(err, FlowError::Configuration(_)));

        let err = Operation::GetProfiles {
            profile_id: None,
            credential: true,
        }
        .route()
        .unwrap_err();
        assert!(matches!(err, FlowError::Configuration(_)));
    }

    #[test]
    fn route_into_request_attaches_credential_and_timeout() {
        let req = route(Operation::StartOta).into_request(
            Some(serde_json::json!({"code": "bank01"})),
            Some("jwt"),
            Duration::from_secs(5),
        );
        assert_eq!(req.verb, Verb::Post);
        assert_eq!(req.credential.as_deref(), Some("jwt"));
        assert_eq!(req.timeout, Duration::from_secs(5));
    }
}
