use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Failure of a single anchor round trip. Engines map it onto the
/// step-specific [`crate::AnchorError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("http {status}: {message}")]
    Status { status: u16, message: String },
    #[error("decode failed: {0}")]
    Decode(String),
}

impl HttpError {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Status { status, .. } => *status,
            Self::Transport(_) | Self::Decode(_) => 0,
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Status { message, .. } => message.clone(),
            Self::Transport(message) | Self::Decode(message) => message.clone(),
        }
    }
}

/// Thin reqwest wrapper shared by every engine: per-request timeout, request
/// ids, optional bearer auth and anchor error-body decoding.
#[derive(Debug, Clone)]
pub struct AnchorHttp {
    http: reqwest::Client,
    timeout: Duration,
}

impl AnchorHttp {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let response = self.send(self.http.get(url), url, None).await?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| HttpError::Transport(error.to_string()))?;
        if !status.is_success() {
            return Err(status_error(status, &bytes));
        }
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }

    pub async fn get_json<T>(&self, url: &str, bearer: Option<&str>) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        let response = self.send(self.http.get(url), url, bearer).await?;
        decode_json_response(response).await
    }

    pub async fn post_json<Req, Res>(
        &self,
        url: &str,
        body: &Req,
        bearer: Option<&str>,
    ) -> Result<Res, HttpError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let response = self
            .send(self.http.post(url).json(body), url, bearer)
            .await?;
        decode_json_response(response).await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, HttpError> {
        let request_id = format!("req_{}", Uuid::new_v4().simple());
        tracing::debug!(%url, %request_id, "anchor request");

        let mut request = request
            .header("x-request-id", request_id)
            .timeout(self.timeout);
        if let Some(token) = bearer {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        request
            .send()
            .await
            .map_err(|error| HttpError::Transport(error.to_string()))
    }
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, HttpError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| HttpError::Transport(error.to_string()))?;

    if !status.is_success() {
        return Err(status_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| HttpError::Decode(error.to_string()))
}

/// Prefer the anchor's own message: `{"error": "..."}`,
/// `{"error": {"message": "..."}}` or `{"message": "..."}`, else the raw body.
pub fn status_error(status: StatusCode, body: &[u8]) -> HttpError {
    let message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| anchor_message(&value))
        .or_else(|| non_empty(&String::from_utf8_lossy(body)))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("<empty>")
                .to_string()
        });
    HttpError::Status {
        status: status.as_u16(),
        message,
    }
}

fn anchor_message(value: &serde_json::Value) -> Option<String> {
    match value.get("error") {
        Some(serde_json::Value::String(message)) => non_empty(message),
        Some(serde_json::Value::Object(body)) => body
            .get("message")
            .and_then(serde_json::Value::as_str)
            .and_then(non_empty),
        _ => value
            .get("message")
            .and_then(serde_json::Value::as_str)
            .and_then(non_empty),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
