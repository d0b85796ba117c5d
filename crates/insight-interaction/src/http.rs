//! HTTP failure classification shared by the REST providers.

use insight_core::llm::ProviderError;
use reqwest::{StatusCode, header::HeaderValue};
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Maps a non-success response to a provider error.
///
/// 429 is a rate limit, 5xx and 408 are retryable, any other status is not.
pub(crate) fn map_http_error(
    provider: &str,
    status: StatusCode,
    body: String,
    retry_after: Option<Duration>,
) -> ProviderError {
    let message = serde_json::from_str::<ErrorWrapper>(&body)
        .map(|wrapper| {
            let label = wrapper
                .error
                .status
                .or(wrapper.error.kind)
                .unwrap_or_default();
            let msg = wrapper.error.message.unwrap_or_else(|| body.clone());
            if label.is_empty() {
                msg
            } else {
                format!("{label}: {msg}")
            }
        })
        .unwrap_or_else(|_| body.clone());
    let message = format!("{provider}: {message}");

    if status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimited {
            message,
            retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
        };
    }

    ProviderError::Api {
        status: Some(status.as_u16()),
        message,
        retryable: status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT,
    }
}

pub(crate) fn map_transport_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(format!("{provider} request failed: {err}"))
    }
}

pub(crate) fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
