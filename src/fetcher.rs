use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::DataServiceConfig;

/// Why a topic lookup produced no usable results.
///
/// The fetcher returns these as values instead of raising so callers can tell
/// "service down" apart from "no data for this topic".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("data service rejected the credentials")]
    Unauthorized,
    #[error("data service endpoint not found")]
    NotFound,
    #[error("data service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("data service request timed out")]
    Timeout,
    #[error("data service unreachable: {0}")]
    Transport(String),
    /// The service answered with an `{"error": ...}` body
    #[error("{0}")]
    Upstream(String),
    #[error("unexpected data service response: {0}")]
    Malformed(String),
}

/// Outcome of one batched topic lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResponse {
    Topics(Vec<TopicResult>),
    Failed(FetchFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResult {
    pub topic: String,
    #[serde(default)]
    pub data: TopicData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicData {
    #[serde(rename = "totalItems", default)]
    pub total_items: i64,
    #[serde(default)]
    pub items: Vec<FetchItem>,
}

/// One publication returned for a topic. Years and dates arrive as either
/// strings or numbers depending on the upstream source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub start_year: Option<Value>,
    #[serde(default)]
    pub end_year: Option<Value>,
    #[serde(default)]
    pub date: Option<Value>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub editorial: Option<String>,
    #[serde(default)]
    pub language: Vec<String>,
}

pub struct Fetcher {
    client: Client,
    url: String,
    function_key: Option<String>,
}

impl Fetcher {
    pub fn new(config: &DataServiceConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Kiosko/1.0 (Feed Aggregator)")
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            function_key: config.function_key.clone(),
        })
    }

    /// Look up all topics with a single POST of `{"topics": [...]}`.
    pub async fn fetch_topics(&self, topics: &[String]) -> FetchResponse {
        info!("Fetching {} topics from {}", topics.len(), self.url);

        let mut request = self.client.post(&self.url).json(&json!({ "topics": topics }));
        if let Some(key) = &self.function_key {
            request = request.header("x-functions-key", key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Data service request failed: {}", e);
                return FetchResponse::Failed(Self::classify_transport_error(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Data service returned {}", status);
            return FetchResponse::Failed(Self::classify_status(status, body));
        }

        match response.bytes().await {
            Ok(bytes) => Self::parse_body(&bytes),
            Err(e) => FetchResponse::Failed(Self::classify_transport_error(&e)),
        }
    }

    pub fn classify_status(status: StatusCode, body: String) -> FetchFailure {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchFailure::Unauthorized,
            StatusCode::NOT_FOUND => FetchFailure::NotFound,
            _ => FetchFailure::Http {
                status: status.as_u16(),
                body,
            },
        }
    }

    fn classify_transport_error(err: &reqwest::Error) -> FetchFailure {
        if err.is_timeout() {
            FetchFailure::Timeout
        } else {
            FetchFailure::Transport(err.to_string())
        }
    }

    /// Interpret a 2xx body: either an array of topic results or an object
    /// carrying an `error` marker.
    pub fn parse_body(bytes: &[u8]) -> FetchResponse {
        let value: Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(e) => return FetchResponse::Failed(FetchFailure::Malformed(e.to_string())),
        };

        if let Some(error) = value.as_object().and_then(|o| o.get("error")) {
            let detail = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return FetchResponse::Failed(FetchFailure::Upstream(detail));
        }

        match serde_json::from_value::<Vec<TopicResult>>(value) {
            Ok(results) => FetchResponse::Topics(results),
            Err(e) => FetchResponse::Failed(FetchFailure::Malformed(e.to_string())),
        }
    }
}
