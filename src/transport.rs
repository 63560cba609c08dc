//! Batch transport: wire format types and the HTTP submission path
//!
//! The control loop talks to the server through the [`BatchTransport`] trait
//! so tests (and embedders with their own HTTP stack) can substitute their
//! own implementation. [`HttpTransport`] is the provided implementation: one
//! JSON POST to a Graph-style `$batch` endpoint per sub-batch, using a
//! caller-supplied `reqwest::Client` with authentication already resolved.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};
use crate::task::TaskId;

/// One request item inside a batch payload
///
/// Per the JSON batching format, `id` is a string on the wire and
/// `dependsOn` is an array of string ids.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchRequestItem {
    /// Wire id (stringified task id)
    pub id: String,

    /// HTTP verb
    pub method: String,

    /// Server-relative resource path
    pub url: String,

    /// Request payload, omitted when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Request headers, omitted when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,

    /// Ids of items the server must process first, omitted when absent
    #[serde(
        default,
        rename = "dependsOn",
        skip_serializing_if = "Option::is_none"
    )]
    pub depends_on: Option<Vec<String>>,
}

/// The whole-batch request body: `{"requests": [...]}`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchPayload {
    /// Request items, sorted by numeric id before transmission
    pub requests: Vec<BatchRequestItem>,
}

/// The whole-batch response envelope: `{"responses": [...]}`
///
/// Items are kept as raw JSON values; each is parsed into a
/// [`BatchResponseItem`] individually so one malformed item cannot poison
/// the rest of the sub-batch.
#[derive(Clone, Debug, Deserialize)]
pub struct BatchResponse {
    /// Per-item response envelopes, as received
    pub responses: Vec<Value>,
}

/// One parsed per-item response envelope
#[derive(Clone, Debug)]
pub struct BatchResponseItem {
    /// Id of the originating task
    pub id: TaskId,

    /// Per-item HTTP status code
    pub status: u16,

    /// Per-item response headers
    pub headers: BTreeMap<String, String>,

    /// Per-item response body (`Null` when absent)
    pub body: Value,

    /// The envelope exactly as received, for raw output mode
    pub raw: Value,
}

impl BatchResponseItem {
    /// Parse one envelope from the response array
    ///
    /// Ids are accepted as JSON strings (the documented format) or numbers
    /// (seen from lenient servers).
    pub fn from_value(raw: Value) -> Result<Self> {
        let id = match raw.get("id") {
            Some(Value::String(s)) => s
                .parse::<u64>()
                .map(TaskId::new)
                .map_err(|_| Error::MalformedResponse(format!("non-numeric item id '{s}'")))?,
            Some(Value::Number(n)) => n
                .as_u64()
                .map(TaskId::new)
                .ok_or_else(|| Error::MalformedResponse(format!("invalid item id {n}")))?,
            _ => return Err(Error::MalformedResponse("item is missing an id".into())),
        };

        let status = raw
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .ok_or_else(|| {
                Error::MalformedResponse(format!("item {id} is missing a status code"))
            })?;

        let headers = raw
            .get("headers")
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let body = raw.get("body").cloned().unwrap_or(Value::Null);

        Ok(Self {
            id,
            status,
            headers,
            body,
            raw,
        })
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parsed `Retry-After` cooldown in whole seconds, if present
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

/// Transport capable of submitting one batch payload and returning the
/// parsed response envelope
///
/// Implementations must not retry internally: the control loop owns all
/// retry and throttling decisions.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// POST the payload to the batch endpoint and parse the JSON envelope
    async fn submit(&self, payload: &BatchPayload) -> Result<BatchResponse>;
}

/// Default path of the batch endpoint, relative to the service base URL
pub const DEFAULT_BATCH_ENDPOINT: &str = "$batch";

/// HTTP transport POSTing batches via `reqwest`
///
/// The client is caller-supplied so connection pooling, TLS, proxies, and
/// authentication middleware stay under the embedder's control.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Create a transport for `<base_url>/$batch`
    ///
    /// `base_url` must end with a trailing slash for relative resolution to
    /// keep its path (e.g. `https://graph.example.com/v1.0/`).
    pub fn new(client: reqwest::Client, base_url: Url) -> Result<Self> {
        Self::with_endpoint(client, base_url, DEFAULT_BATCH_ENDPOINT)
    }

    /// Create a transport with a non-default endpoint path
    pub fn with_endpoint(client: reqwest::Client, base_url: Url, endpoint: &str) -> Result<Self> {
        let endpoint = base_url.join(endpoint)?;
        Ok(Self { client, endpoint })
    }

    /// The fully resolved batch endpoint URL
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl BatchTransport for HttpTransport {
    async fn submit(&self, payload: &BatchPayload) -> Result<BatchResponse> {
        tracing::debug!(
            endpoint = %self.endpoint,
            requests = payload.requests.len(),
            "Submitting batch"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::BatchStatus {
                status: status.as_u16(),
            });
        }

        let envelope: BatchResponse = response.json().await?;
        Ok(envelope)
    }
}
