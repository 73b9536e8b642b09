//! Caption backend client for a Gradio captioning app.
//!
//! One caption is three HTTP round trips against the Gradio API:
//! upload the image, submit a call to the captioning endpoint, then read
//! the result from the call's server-sent event stream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};

use super::openai::normalize_base_url;
use super::{BackendError, Captioner};
use crate::config::CaptionSettings;
use crate::reporter::Reporter;

const BACKEND: &str = "captioning";

#[derive(Debug, Deserialize)]
struct CallResponse {
    event_id: String,
}

/// Gradio captioning client
pub struct GradioCaptioner {
    base: Url,
    api_name: String,
    token: String,
    client: reqwest::Client,
    reporter: Arc<dyn Reporter>,
}

impl GradioCaptioner {
    /// Create a client from caption settings and an access token
    pub fn new(
        settings: &CaptionSettings,
        token: impl Into<String>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self> {
        let base = normalize_base_url(&settings.endpoint)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base,
            api_name: settings.api_name.trim_matches('/').to_string(),
            token: token.into(),
            client,
            reporter,
        })
    }

    /// Base URL of the Gradio app
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        self.base
            .join(path)
            .map_err(|e| BackendError::protocol(BACKEND, format!("bad URL '{}': {}", path, e)))
    }

    /// Upload the image and return its server-side path
    async fn upload(&self, image: Vec<u8>, file_name: &str) -> Result<String, BackendError> {
        let part = Part::bytes(image).file_name(file_name.to_string());
        let form = Form::new().part("files", part);

        let response = self
            .client
            .post(self.url("upload")?)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BackendError::transport(BACKEND, e))?;

        let paths: Vec<String> = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::protocol(BACKEND, e.to_string()))?;

        paths
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::protocol(BACKEND, "upload returned no file path"))
    }

    /// Start a captioning call for an uploaded file, returning the event id
    async fn submit(&self, uploaded_path: &str) -> Result<String, BackendError> {
        let payload = json!({
            "data": [{
                "path": uploaded_path,
                "meta": { "_type": "gradio.FileData" },
            }]
        });

        let response = self
            .client
            .post(self.url(&format!("call/{}", self.api_name))?)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackendError::transport(BACKEND, e))?;

        let call: CallResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::protocol(BACKEND, e.to_string()))?;

        Ok(call.event_id)
    }

    /// Read the call's event stream until it completes
    async fn fetch_result(&self, event_id: &str) -> Result<String, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("call/{}/{}", self.api_name, event_id))?)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| BackendError::transport(BACKEND, e))?;

        let body = ensure_success(response)
            .await?
            .text()
            .await
            .map_err(|e| BackendError::transport(BACKEND, e))?;

        parse_event_stream(&body)
    }

    async fn run(&self, image: Vec<u8>, file_name: &str) -> Result<String, BackendError> {
        let uploaded = self.upload(image, file_name).await?;
        let event_id = self.submit(&uploaded).await?;
        let text = self.fetch_result(&event_id).await?;

        if text.trim().is_empty() {
            return Err(BackendError::Empty { backend: BACKEND });
        }
        Ok(text)
    }
}

#[async_trait]
impl Captioner for GradioCaptioner {
    fn name(&self) -> &str {
        "gradio"
    }

    async fn caption(&self, image: Vec<u8>, file_name: &str) -> Result<String, BackendError> {
        match self.run(image, file_name).await {
            Ok(text) => {
                self.reporter
                    .info(&format!("Prediction result for {}: {}", file_name, text));
                Ok(text)
            }
            Err(e) => {
                self.reporter.error(&format!(
                    "Error captioning {} with {}: {}",
                    file_name,
                    self.name(),
                    e
                ));
                Err(e)
            }
        }
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        backend: BACKEND,
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

/// Extract the final output from a Gradio call event stream
pub fn parse_event_stream(body: &str) -> Result<String, BackendError> {
    let mut event: Option<&str> = None;

    for line in body.lines() {
        if line.is_empty() {
            event = None;
        } else if let Some(name) = line.strip_prefix("event:") {
            event = Some(name.trim());
        } else if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            match event {
                Some("complete") => {
                    let value: Value = serde_json::from_str(data).map_err(|e| {
                        BackendError::protocol(BACKEND, format!("bad completion payload: {}", e))
                    })?;
                    return Ok(join_output(&value));
                }
                Some("error") => {
                    return Err(BackendError::Remote {
                        backend: BACKEND,
                        message: data.to_string(),
                    });
                }
                _ => {}
            }
        }
    }

    Err(BackendError::protocol(
        BACKEND,
        "event stream ended without a result",
    ))
}

/// Flatten Gradio output data into a single caption
pub fn join_output(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
