//! reqwest-backed [`TelematicsProvider`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::{ProviderError, TelematicsProvider, envelope_data};
use crate::config::ProviderConfig;

const BODY_SNIPPET_CHARS: usize = 200;

/// HTTP client for the telematics provider.
#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpProviderClient {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(&config.base_url)?;
        // Keep any path prefix when joining endpoint names
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_millis(config.timeout_ms.min(5_000)))
            .user_agent(concat!("fleet-telemetry/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| ProviderError::Transport {
                endpoint: endpoint.to_string(),
                message: format!("invalid endpoint url: {e}"),
            })
    }
}

#[async_trait]
impl TelematicsProvider for HttpProviderClient {
    async fn post(&self, endpoint: &str, body: Value) -> Result<Value, ProviderError> {
        let url = self.endpoint_url(endpoint)?;

        let mut request = self.http.post(url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| ProviderError::Transport {
            endpoint: endpoint.to_string(),
            message: if e.is_timeout() {
                "timed out".to_string()
            } else {
                e.to_string()
            },
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transport {
                endpoint: endpoint.to_string(),
                message: format!("failed to read response body: {e}"),
            })?;

        if !status.is_success() {
            return non_success_reply(endpoint, status.as_u16(), &bytes);
        }

        serde_json::from_slice(&bytes).map_err(|e| ProviderError::Decode {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }
}

/// A non-2xx reply whose body is a failed envelope is handed back as-is so the envelope
/// status decides the outcome and the body is archived. Anything else is an HTTP error.
fn non_success_reply(endpoint: &str, status: u16, bytes: &[u8]) -> Result<Value, ProviderError> {
    let decoded = match serde_json::from_slice::<Value>(bytes) {
        Ok(body) if envelope_data(endpoint, &body).is_err() => return Ok(body),
        Ok(body) => Some(body),
        Err(_) => None,
    };

    let text = String::from_utf8_lossy(bytes);
    let body_snippet = if text.is_empty() {
        None
    } else if text.chars().count() > BODY_SNIPPET_CHARS {
        let truncated: String = text.chars().take(BODY_SNIPPET_CHARS).collect();
        Some(format!("{truncated}..."))
    } else {
        Some(text.into_owned())
    };
    Err(ProviderError::HttpStatus {
        endpoint: endpoint.to_string(),
        status,
        body_snippet,
        body: decoded,
    })
}
