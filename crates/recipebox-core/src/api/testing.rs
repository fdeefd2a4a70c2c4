//! Scripted transport used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;

use super::{ApiError, ApiRequest, ApiResponse, HttpTransport};

struct Scripted {
    delay: Option<Duration>,
    response: Result<ApiResponse, ApiError>,
}

/// Replays queued responses per path and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: &str, response: Result<ApiResponse, ApiError>) {
        self.push_delayed(path, None, response);
    }

    pub fn push_delayed(
        &self,
        path: &str,
        delay: Option<Duration>,
        response: Result<ApiResponse, ApiError>,
    ) {
        self.scripts
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(Scripted { delay, response });
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.path == path).count()
    }
}

impl HttpTransport for ScriptedTransport {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ApiError>> {
        Box::pin(async move {
            let next = {
                let path = request.path.clone();
                self.requests.lock().push(request);
                self.scripts.lock().get_mut(&path).and_then(VecDeque::pop_front)
            };
            match next {
                Some(scripted) => {
                    if let Some(delay) = scripted.delay {
                        tokio::time::sleep(delay).await;
                    }
                    scripted.response
                }
                None => Err(ApiError::NetworkError("no scripted response".into())),
            }
        })
    }
}

pub fn ok_json(body: Value) -> Result<ApiResponse, ApiError> {
    Ok(ApiResponse::new(200, body.to_string()))
}

pub fn status(code: u16, body: &str) -> Result<ApiResponse, ApiError> {
    Err(ApiError::from_status(code, body))
}
