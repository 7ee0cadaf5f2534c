use crate::llm::{ApiError, ApiErrorContext};
use anyhow::Result;
use reqwest::{Response, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Check the response status and turn failures into an [`ApiErrorContext`].
pub async fn check_response_error(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let response_text = response
        .text()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    let error = match status {
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimit(response_text),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::Authentication(response_text)
        }
        StatusCode::BAD_REQUEST => ApiError::InvalidRequest(response_text),
        status if status.is_server_error() => ApiError::ServiceError(response_text),
        _ => ApiError::Unknown(format!("Status {status}: {response_text}")),
    };

    Err(ApiErrorContext { error, retry_after }.into())
}

/// Handle retryable errors for the chat completion transport.
///
/// Returns true after waiting when the caller should try again, false when
/// the error is final or `attempts` (1-based) reached `max_retries`.
pub async fn handle_retryable_error(error: &anyhow::Error, attempts: u32, max_retries: u32) -> bool {
    if attempts >= max_retries {
        return false;
    }

    let Some(ctx) = error.downcast_ref::<ApiErrorContext>() else {
        return false;
    };

    let backoff = Duration::from_secs(2u64.pow(attempts.saturating_sub(1)));
    let delay = match &ctx.error {
        ApiError::RateLimit(_) => ctx.retry_after.unwrap_or(backoff),
        ApiError::ServiceError(_) | ApiError::NetworkError(_) => backoff,
        _ => {
            warn!("Unhandled error (attempt {attempts}/{max_retries}): {error}");
            return false;
        }
    };

    warn!(
        "Error: {} (attempt {}/{}), retrying in {} seconds",
        error,
        attempts,
        max_retries,
        delay.as_secs()
    );
    sleep(delay).await;
    true
}
