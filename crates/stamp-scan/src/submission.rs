//! # Visit Submission Client
//!
//! Registers a visit for a place code with the passport backend.
//!
//! ## Request
//! ```text
//! POST {base_url}/passport/visit
//! Authorization: Bearer <token>
//! Content-Type: application/json
//!
//! { "code": "PLACE-42" }
//! ```
//!
//! ## Status Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  HTTP outcome                         SubmissionError                  │
//! │  ───────────────────────────────────  ───────────────────────────────  │
//! │  2xx                                  (success → VisitOutcome)         │
//! │  401, 403                             Unauthorized                     │
//! │  400, 404, 409, 422                   InvalidCode                      │
//! │  408, 429, 5xx                        Transient                        │
//! │  connect error / timeout              Transient                        │
//! │  anything else                        Unknown                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Error bodies look like `{ "message": "...", "statusCode": 404 }`. The
//! message may also be an array of strings, which is joined.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use stamp_core::{Credential, SubmissionError, VisitOutcome};

use crate::config::ScanConfig;
use crate::error::ScannerResult;

// =============================================================================
// Submitter Trait
// =============================================================================

/// Anything that can register a visit.
#[async_trait]
pub trait VisitSubmitter: Send + Sync {
    async fn submit(
        &self,
        code: &str,
        credential: &Credential,
    ) -> Result<VisitOutcome, SubmissionError>;
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct VisitRequest<'a> {
    code: &'a str,
}

/// Success body. `place` is kept loose: backends send a name, an id, or an
/// object carrying either.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisitResponse {
    #[serde(default)]
    message: Option<MessageField>,
    #[serde(default)]
    place: Option<serde_json::Value>,
    #[serde(default)]
    place_name: Option<String>,
}

impl VisitResponse {
    fn into_outcome(self) -> VisitOutcome {
        let place = self.place.and_then(place_name).or(self.place_name);
        let message = self.message.map(MessageField::into_text);
        VisitOutcome::new(message, place)
    }
}

fn place_name(value: serde_json::Value) -> Option<String> {
    use serde_json::Value;

    match value {
        Value::String(name) => Some(name),
        Value::Number(id) => Some(id.to_string()),
        Value::Object(mut fields) => fields
            .remove("name")
            .filter(|name| !name.is_null())
            .or_else(|| fields.remove("id"))
            .and_then(place_name),
        _ => None,
    }
}

/// Parses a 2xx body. Anything unreadable yields the default outcome.
fn parse_success(body: &str) -> VisitOutcome {
    if body.trim().is_empty() {
        return VisitResponse::default().into_outcome();
    }
    serde_json::from_str::<VisitResponse>(body)
        .unwrap_or_else(|e| {
            debug!(error = %e, "Visit response is not the expected JSON");
            VisitResponse::default()
        })
        .into_outcome()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    message: Option<MessageField>,
    #[serde(default)]
    status_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageField {
    One(String),
    Many(Vec<String>),
}

impl MessageField {
    fn into_text(self) -> String {
        match self {
            MessageField::One(s) => s,
            MessageField::Many(parts) => parts.join(", "),
        }
    }
}

// =============================================================================
// HTTP Submitter
// =============================================================================

/// [`VisitSubmitter`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpVisitSubmitter {
    http: Client,
    endpoint: Url,
}

impl HttpVisitSubmitter {
    /// Builds a client for the endpoint and timeout in `config`.
    pub fn new(config: &ScanConfig) -> ScannerResult<Self> {
        Self::with_endpoint(config.visit_url()?, config.submit_timeout())
    }

    pub fn with_endpoint(endpoint: Url, timeout: Option<Duration>) -> ScannerResult<Self> {
        let mut builder = Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(HttpVisitSubmitter {
            http: builder.build()?,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl VisitSubmitter for HttpVisitSubmitter {
    async fn submit(
        &self,
        code: &str,
        credential: &Credential,
    ) -> Result<VisitOutcome, SubmissionError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(SubmissionError::InvalidCode {
                message: "El código está vacío".into(),
            });
        }

        debug!(code = %code, endpoint = %self.endpoint, "Submitting visit");

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(header::AUTHORIZATION, credential.bearer())
            .json(&VisitRequest { code })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            let outcome = parse_success(&body);
            info!(code = %code, status = status.as_u16(), place = ?outcome.place, "Visit registered");
            return Ok(outcome);
        }

        let error = map_status(status, &body);
        warn!(code = %code, status = status.as_u16(), error = %error, "Visit rejected");
        Err(error)
    }
}

// =============================================================================
// Failure Mapping
// =============================================================================

/// Maps a non-success HTTP response to a [`SubmissionError`].
pub fn map_status(status: StatusCode, body: &str) -> SubmissionError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .map(MessageField::into_text)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| reason_phrase(status));

    // The body's statusCode is informational; the HTTP status decides.
    if let Some(code) = parsed.status_code {
        if code != status.as_u16() {
            debug!(http = status.as_u16(), body = code, "Status code mismatch in error body");
        }
    }

    match status.as_u16() {
        401 | 403 => SubmissionError::Unauthorized { message },
        400 | 404 | 409 | 422 => SubmissionError::InvalidCode { message },
        408 | 429 | 500..=599 => SubmissionError::Transient { message },
        _ => SubmissionError::Unknown { message },
    }
}

fn reason_phrase(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

fn transport_error(err: reqwest::Error) -> SubmissionError {
    if err.is_timeout() {
        SubmissionError::Transient {
            message: "La solicitud tardó demasiado".into(),
        }
    } else if err.is_connect() || err.is_request() || err.is_body() {
        SubmissionError::Transient {
            message: err.to_string(),
        }
    } else {
        SubmissionError::Unknown {
            message: err.to_string(),
        }
    }
}
