//! Telematics provider client.
//!
//! Every provider call is a JSON `POST {base_url}/{endpoint}` answered with an envelope
//! `{status, data?, msg?/err?}`. The client layer only moves bytes and validates the
//! envelope; it never retries. Callers decide what a failure means for their run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use thiserror::Error;

pub mod client;
pub mod parse;

pub use client::HttpProviderClient;

/// Roster endpoint returning every `(vehicleno, deviceno)` pair.
pub const ROSTER_ENDPOINT: &str = "vehicle-device-mapping";

/// Envelope status marking a successful call.
pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Failure of a single provider call.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },
    #[error("{endpoint} responded with HTTP {status}{}", snippet_suffix(.body_snippet))]
    HttpStatus {
        endpoint: String,
        status: u16,
        body_snippet: Option<String>,
        /// Decoded body when the error response was still JSON
        body: Option<Value>,
    },
    #[error("{endpoint} returned a body that is not JSON: {message}")]
    Decode { endpoint: String, message: String },
    #[error("{endpoint} rejected the request with status '{status}': {message}")]
    Rejected {
        endpoint: String,
        status: String,
        message: String,
    },
    #[error("{endpoint} reported success without data")]
    MissingData { endpoint: String },
    #[error("{endpoint} returned a malformed payload: {message}")]
    Malformed { endpoint: String, message: String },
}

fn snippet_suffix(body_snippet: &Option<String>) -> String {
    match body_snippet {
        Some(snippet) => format!(": {snippet}"),
        None => String::new(),
    }
}

impl ProviderError {
    /// Response body worth archiving even though the call failed.
    pub fn archived_body(&self) -> Option<&Value> {
        match self {
            ProviderError::HttpStatus { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            ProviderError::Transport { endpoint, .. }
            | ProviderError::HttpStatus { endpoint, .. }
            | ProviderError::Decode { endpoint, .. }
            | ProviderError::Rejected { endpoint, .. }
            | ProviderError::MissingData { endpoint }
            | ProviderError::Malformed { endpoint, .. } => endpoint,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Transport { .. } => "transport",
            ProviderError::HttpStatus { .. } => "http_status",
            ProviderError::Decode { .. } => "decode",
            ProviderError::Rejected { .. } => "rejected",
            ProviderError::MissingData { .. } => "missing_data",
            ProviderError::Malformed { .. } => "malformed",
        }
    }

    pub fn malformed(endpoint: &str, message: impl Into<String>) -> Self {
        ProviderError::Malformed {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }
}

/// Transport seam over the provider API.
///
/// Implementations return the decoded response body untouched so the caller can
/// archive it even when the envelope turns out to be a failure.
#[async_trait]
pub trait TelematicsProvider: Send + Sync {
    async fn post(&self, endpoint: &str, body: Value) -> Result<Value, ProviderError>;
}

/// Validates the envelope and returns its `data` member.
///
/// Any status other than `SUCCESS`, or an absent/null `data`, is a failure regardless
/// of the HTTP status code that carried it.
pub fn envelope_data<'a>(endpoint: &str, raw: &'a Value) -> Result<&'a Value, ProviderError> {
    let Some(envelope) = raw.as_object() else {
        return Err(ProviderError::malformed(
            endpoint,
            "response body is not a JSON object",
        ));
    };

    let status = envelope
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();

    if !status.eq_ignore_ascii_case(STATUS_SUCCESS) {
        let message = ["msg", "err", "message", "error"]
            .iter()
            .find_map(|key| envelope.get(*key).and_then(Value::as_str))
            .unwrap_or("no message")
            .to_string();
        return Err(ProviderError::Rejected {
            endpoint: endpoint.to_string(),
            status: if status.is_empty() {
                "<missing>".to_string()
            } else {
                status.to_string()
            },
            message,
        });
    }

    match envelope.get("data") {
        None | Some(Value::Null) => Err(ProviderError::MissingData {
            endpoint: endpoint.to_string(),
        }),
        Some(data) => Ok(data),
    }
}

/// Request body for the roster endpoint.
pub fn roster_body() -> Value {
    json!({})
}

/// Request body for a latest-snapshot endpoint.
pub fn latest_body(vehicle_no: &str) -> Value {
    json!({ "vehicleno": vehicle_no })
}

/// Request body for a history endpoint; bounds are epoch milliseconds.
pub fn history_body(vehicle_no: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Value {
    json!({
        "vehicleno": vehicle_no,
        "startTime": start.timestamp_millis(),
        "endTime": end.timestamp_millis(),
    })
}
