use std::thread;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use kiln_contracts::request::ApiKey;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::AUTHORIZATION;
use serde_json::{Map, Value};

use crate::config::PipelineConfig;
use crate::{response_json_or_error, truncate_text};

/// Intermediate state reported while a request sits in the provider queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueUpdate {
    Queued { position: Option<u64> },
    InProgress { logs: Vec<String> },
    Completed { logs: Vec<String> },
}

impl QueueUpdate {
    pub fn status(&self) -> &'static str {
        match self {
            QueueUpdate::Queued { .. } => "IN_QUEUE",
            QueueUpdate::InProgress { .. } => "IN_PROGRESS",
            QueueUpdate::Completed { .. } => "COMPLETED",
        }
    }

    pub fn logs(&self) -> &[String] {
        match self {
            QueueUpdate::Queued { .. } => &[],
            QueueUpdate::InProgress { logs } | QueueUpdate::Completed { logs } => logs,
        }
    }

    fn from_status_payload(payload: &Value) -> Result<Self> {
        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_uppercase();
        let logs = payload
            .get("logs")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("message").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        match status.as_str() {
            "IN_QUEUE" => Ok(QueueUpdate::Queued {
                position: payload.get("queue_position").and_then(Value::as_u64),
            }),
            "IN_PROGRESS" => Ok(QueueUpdate::InProgress { logs }),
            "COMPLETED" => {
                if let Some(error) = payload.get("error").filter(|value| !value.is_null()) {
                    bail!("fal request completed with error: {error}");
                }
                Ok(QueueUpdate::Completed { logs })
            }
            other => bail!(
                "fal queue returned unexpected status '{other}': {}",
                truncate_text(&payload.to_string(), 512)
            ),
        }
    }
}

/// A remote capability that accepts a request document for a model and
/// eventually returns the provider's result document.
pub trait GenerationProvider {
    fn submit_and_wait(
        &self,
        model_id: &str,
        document: &Map<String, Value>,
        api_key: &ApiKey,
        on_update: &mut dyn FnMut(&QueueUpdate),
    ) -> Result<Value>;
}

/// Blocking client for the fal.ai queue API.
pub struct FalQueueClient {
    api_base: String,
    http: HttpClient,
    config: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueHandle {
    request_id: String,
    status_url: String,
    response_url: String,
}

impl FalQueueClient {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            api_base: config.queue_base.trim_end_matches('/').to_string(),
            http: HttpClient::new(),
            config: config.clone(),
        }
    }

    fn submit_endpoint(&self, model_id: &str) -> String {
        let model_id = model_id.trim();
        if model_id.starts_with("http://") || model_id.starts_with("https://") {
            return model_id.to_string();
        }
        format!("{}/{}", self.api_base, model_id.trim_matches('/'))
    }

    fn handle_from_submission(&self, model_id: &str, payload: &Value) -> Result<QueueHandle> {
        let Some(request_id) = payload
            .get("request_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            bail!(
                "fal submission returned no request_id: {}",
                truncate_text(&payload.to_string(), 512)
            );
        };
        // Only used when the submission omits `status_url`/`response_url`. fal
        // routes queue requests by app id (`fal-ai/flux`), so these derived URLs
        // are right only when the model id carries no sub-path like `/dev`.
        let base = format!("{}/requests/{request_id}", self.submit_endpoint(model_id));
        let url_field = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Ok(QueueHandle {
            request_id: request_id.to_string(),
            status_url: url_field("status_url").unwrap_or_else(|| format!("{base}/status")),
            response_url: url_field("response_url").unwrap_or(base),
        })
    }

    fn poll_until_complete(
        &self,
        handle: &QueueHandle,
        api_key: &ApiKey,
        started: Instant,
        on_update: &mut dyn FnMut(&QueueUpdate),
    ) -> Result<()> {
        loop {
            let response = self
                .http
                .get(&handle.status_url)
                .header(AUTHORIZATION, api_key.authorization_header())
                .query(&[("logs", "1")])
                .send()
                .with_context(|| format!("fal status request failed ({})", handle.status_url))?;
            let payload = response_json_or_error("fal status", response)?;
            let update = QueueUpdate::from_status_payload(&payload)?;
            on_update(&update);
            if matches!(update, QueueUpdate::Completed { .. }) {
                return Ok(());
            }
            if started.elapsed() >= self.config.timeout {
                bail!(
                    "fal request {} timed out after {:.0}s",
                    handle.request_id,
                    self.config.timeout.as_secs_f64()
                );
            }
            thread::sleep(self.config.poll_interval);
        }
    }
}

impl GenerationProvider for FalQueueClient {
    fn submit_and_wait(
        &self,
        model_id: &str,
        document: &Map<String, Value>,
        api_key: &ApiKey,
        on_update: &mut dyn FnMut(&QueueUpdate),
    ) -> Result<Value> {
        let started = Instant::now();
        let endpoint = self.submit_endpoint(model_id);
        let response = self
            .http
            .post(&endpoint)
            .header(AUTHORIZATION, api_key.authorization_header())
            .json(&Value::Object(document.clone()))
            .send()
            .with_context(|| format!("fal submit failed ({endpoint})"))?;
        let submission = response_json_or_error("fal submit", response)?;

        // Synchronous endpoints answer with the result directly.
        if submission.get("images").is_some() {
            on_update(&QueueUpdate::Completed { logs: Vec::new() });
            return Ok(submission);
        }

        let handle = self.handle_from_submission(model_id, &submission)?;
        on_update(&QueueUpdate::Queued {
            position: submission.get("queue_position").and_then(Value::as_u64),
        });
        self.poll_until_complete(&handle, api_key, started, on_update)?;

        let response = self
            .http
            .get(&handle.response_url)
            .header(AUTHORIZATION, api_key.authorization_header())
            .send()
            .with_context(|| format!("fal result request failed ({})", handle.response_url))?;
        response_json_or_error("fal result", response)
    }
}
