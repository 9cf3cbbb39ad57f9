use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{info, warn};

use fibo_core::config::RetryConfig;
use fibo_core::error::ApiError;

/// A failure worth another attempt.
#[derive(Debug)]
enum Transient {
    RateLimited,
    Server(u16),
    Transport(String),
}

impl Transient {
    fn into_error(self, attempts: u32) -> ApiError {
        match self {
            Transient::RateLimited => ApiError::RateLimitExceeded { attempts },
            Transient::Server(status) => ApiError::ServerError { status, attempts },
            Transient::Transport(message) => ApiError::Timeout { attempts, message },
        }
    }
}

enum Attempt {
    Done(String),
    Retry(Transient),
    Fatal(ApiError),
}

/// Send one HTTP request, retrying 429s, 5xx responses, timeouts and
/// connection failures with exponential backoff. Client errors (other 4xx)
/// fail immediately with the response body attached.
///
/// Returns the raw body of the first successful response.
pub(crate) async fn send_with_retry(
    http: &Client,
    retry: &RetryConfig,
    method: Method,
    url: &str,
    payload: Option<&Value>,
) -> Result<String, ApiError> {
    let max_retries = retry.max_retries;
    let mut attempt = 0;

    loop {
        let transient = match send_once(http, &method, url, payload, attempt).await {
            Attempt::Done(body) => return Ok(body),
            Attempt::Fatal(e) => return Err(e),
            Attempt::Retry(t) => t,
        };

        if attempt >= max_retries {
            return Err(transient.into_error(attempt + 1));
        }

        let backoff = retry.backoff(attempt);
        warn!(
            attempt = attempt + 1,
            max_retries,
            backoff_ms = backoff.as_millis() as u64,
            reason = ?transient,
            url,
            "Retrying API request"
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}

async fn send_once(
    http: &Client,
    method: &Method,
    url: &str,
    payload: Option<&Value>,
    attempt: u32,
) -> Attempt {
    match payload {
        Some(body) => info!(%method, url, attempt, payload = %body, "Sending API request"),
        None => info!(%method, url, attempt, "Sending API request"),
    }

    let mut request = http.request(method.clone(), url);
    if let Some(body) = payload {
        request = request.json(body);
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) if e.is_builder() => {
            return Attempt::Fatal(ApiError::InvalidResponse(format!(
                "could not build request: {e}"
            )))
        }
        Err(e) if e.is_timeout() => return Attempt::Retry(Transient::Transport(format!("timeout: {e}"))),
        Err(e) => return Attempt::Retry(Transient::Transport(format!("connection error: {e}"))),
    };

    let status = response.status();
    if status.is_success() {
        return match response.text().await {
            Ok(body) => Attempt::Done(body),
            Err(e) if e.is_timeout() => {
                Attempt::Retry(Transient::Transport(format!("timeout reading body: {e}")))
            }
            Err(e) => Attempt::Fatal(ApiError::InvalidResponse(e.to_string())),
        };
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Attempt::Retry(Transient::RateLimited);
    }
    if status.is_server_error() {
        return Attempt::Retry(Transient::Server(status.as_u16()));
    }

    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    if status.is_client_error() {
        warn!(status = status.as_u16(), url, body = %body, "API rejected request");
        return Attempt::Fatal(ApiError::ClientError {
            status: status.as_u16(),
            body,
        });
    }

    Attempt::Fatal(ApiError::InvalidResponse(format!(
        "unexpected HTTP status {status}"
    )))
}
