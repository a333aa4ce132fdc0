use std::sync::Mutex;

use serde_json::Value;

use super::{ApiRequest, RequestError, RequestExecutor, Verb};

type Handler = dyn Fn(&ApiRequest) -> Result<Value, RequestError> + Send + Sync;

/// Executor that answers from a closure and records every request it sees.
pub(crate) struct ScriptedExecutor {
    handler: Box<Handler>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl ScriptedExecutor {
    pub(crate) fn new(
        handler: impl Fn(&ApiRequest) -> Result<Value, RequestError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, verb: Verb) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.verb == verb)
            .count()
    }
}

impl RequestExecutor for ScriptedExecutor {
    async fn execute(&self, request: ApiRequest) -> Result<Value, RequestError> {
        self.calls.lock().unwrap().push(request.clone());
        (self.handler)(&request)
    }
}
