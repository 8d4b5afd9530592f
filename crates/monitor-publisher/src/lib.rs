//! HTTP publisher for the monitoring agent (spec §4.6).
//!
//! Two operations plus an embedded-API file-upload variant, built around a
//! single blocking `reqwest::Client` the way the teacher's `WebhookClient`
//! wraps one for fire-and-forget delivery — except here publish failure is
//! reported back to the caller (the worker loop decides to log-and-drop;
//! see spec §7) rather than being swallowed at this layer.

use std::fs;
use std::path::Path;

use monitor_types::AgentError;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

const ACCEPT: &str = "application/json";
const CONTENT_TYPE: &str = "application/json";

/// Thin wrapper over a blocking HTTP client configured with the three
/// headers the reference `publisher.c` sets once in `init_curl()`:
/// `Accept`, `Content-Type`, and a non-standard `charsets` header.
pub struct Publisher {
    http: Client,
}

#[derive(Debug, Deserialize)]
struct ExperimentResponse {
    experiment_id: String,
}

impl Publisher {
    pub fn new() -> Result<Self, AgentError> {
        let http = Client::builder()
            .user_agent("monitor-agent/0.3")
            .build()
            .map_err(|e| AgentError::PublishFailed(format!("failed to build http client: {e}")))?;
        Ok(Self { http })
    }

    /// `POST <server>/mf/experiments/<application_id>` with body
    /// `{"application","task","host"}`; parses `experiment_id` back out of
    /// the response. Called once at startup; fatal per spec §7 if it fails.
    pub fn create_new_experiment(
        &self,
        experiment_url: &str,
        application: &str,
        task: &str,
        host: &str,
    ) -> Result<String, AgentError> {
        let body = serde_json::json!({
            "application": application,
            "task": task,
            "host": host,
        });

        let response = self
            .http
            .post(experiment_url)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("charsets", "utf-8")
            .json(&body)
            .send()
            .map_err(|e| AgentError::ExperimentCreationFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AgentError::ExperimentCreationFailed(format!(
                "server returned {}",
                response.status()
            )));
        }

        let parsed: ExperimentResponse = response
            .json()
            .map_err(|e| AgentError::ExperimentCreationFailed(format!("invalid response body: {e}")))?;

        if parsed.experiment_id.is_empty() {
            return Err(AgentError::ExperimentCreationFailed(
                "server returned an empty experiment_id".to_string(),
            ));
        }

        tracing::debug!(experiment_id = %parsed.experiment_id, "experiment created");
        Ok(parsed.experiment_id)
    }

    /// `POST <metrics_url>` with `batch_json_array` (already a complete JSON
    /// array literal) as the body. No retry queue — failure is surfaced to
    /// the caller, which logs and drops the batch (spec §7 `PublishFailed`).
    pub fn publish_json(&self, metrics_url: &str, batch_json_array: &str) -> Result<(), AgentError> {
        // Validate shape before sending so a malformed batch never reaches the wire.
        let _: Value = serde_json::from_str(batch_json_array)
            .map_err(|e| AgentError::PublishFailed(format!("batch is not valid json: {e}")))?;

        let response = self
            .http
            .post(metrics_url)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("charsets", "utf-8")
            .body(batch_json_array.to_string())
            .send()
            .map_err(|e| AgentError::PublishFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AgentError::PublishFailed(format!(
                "server returned {}",
                response.status()
            )));
        }
        tracing::debug!(bytes = batch_json_array.len(), "batch published");
        Ok(())
    }

    /// Embedded-API variant (spec §4.6): streams a newline-delimited sample
    /// file to the server. Each line is one sample; `static_prefix` (the
    /// `{"WorkflowID":...,` fragment plus `"type":"<metric>",`) is merged in
    /// front of every line and the whole file becomes one JSON array POST.
    pub fn publish_file(&self, metrics_url: &str, static_prefix: &str, path: &Path) -> Result<(), AgentError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| AgentError::PublishFailed(format!("reading {}: {e}", path.display())))?;

        let mut array = String::from("[");
        let mut wrote_any = false;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if wrote_any {
                array.push(',');
            }
            array.push('{');
            array.push_str(static_prefix.trim_end_matches(','));
            array.push(',');
            array.push_str(line);
            array.push('}');
            wrote_any = true;
        }
        array.push(']');

        if !wrote_any {
            return Ok(());
        }

        self.publish_json(metrics_url, &array)
    }
}
