//! Retry and throttle handling for outbound HTTP requests.
//!
//! Source adapters and the Claude client send their calls through
//! [`send_with_retry`]. Throttling responses (429, 503) are retried up to
//! `max_throttle_retries` times, honoring `Retry-After` when the server sends
//! one. Other 5xx responses and client-side timeouts get the smaller
//! `max_server_error_retries` budget.
//! Once the budget is spent the last response is handed back unchanged so the
//! caller can decide what a non-2xx status means for it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_throttle_retries: u32,
    pub max_server_error_retries: u32,
    /// First backoff step; doubles on each further retry.
    pub initial_delay: Duration,
    /// Upper bound applied to any server-provided `Retry-After`.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_throttle_retries: 3,
            max_server_error_retries: 1,
            initial_delay: Duration::from_secs(2),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

fn is_throttled(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

/// Parse `Retry-After` as delta-seconds or an HTTP date.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Delay before retry number `attempt` (0-based).
///
/// A parseable `Retry-After` wins, capped at `max_retry_after`; otherwise
/// exponential backoff from `initial_delay`.
pub fn retry_delay(policy: &RetryPolicy, attempt: u32, retry_after: Option<&str>) -> Duration {
    if let Some(wait) = retry_after.and_then(|v| parse_retry_after(v, Utc::now())) {
        return wait.min(policy.max_retry_after);
    }
    policy
        .initial_delay
        .saturating_mul(2u32.saturating_pow(attempt.min(16)))
}

/// Send `request`, retrying throttled, failed and timed-out attempts per `policy`.
///
/// Requests whose body cannot be cloned are sent once.
pub async fn send_with_retry(request: RequestBuilder, policy: &RetryPolicy) -> reqwest::Result<Response> {
    let mut throttle_retries = 0u32;
    let mut server_retries = 0u32;
    let mut attempt = 0u32;

    loop {
        let Some(current) = request.try_clone() else {
            return request.send().await;
        };

        let delay = match current.send().await {
            Ok(response) => {
                let status = response.status();
                let throttled = is_throttled(status);
                let server_error = status.is_server_error() && !throttled;

                let retry = (throttled && throttle_retries < policy.max_throttle_retries)
                    || (server_error && server_retries < policy.max_server_error_retries);
                if !retry {
                    return Ok(response);
                }

                let header = throttled
                    .then(|| response.headers().get(RETRY_AFTER))
                    .flatten()
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                if throttled {
                    throttle_retries += 1;
                } else {
                    server_retries += 1;
                }

                let delay = retry_delay(policy, attempt, header.as_deref());
                warn!(
                    url = %response.url(),
                    status = status.as_u16(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Upstream refused request, retrying"
                );
                delay
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                if server_retries >= policy.max_server_error_retries {
                    return Err(e);
                }
                server_retries += 1;
                let delay = retry_delay(policy, attempt, None);
                warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "Request failed, retrying");
                delay
            }
            Err(e) => return Err(e),
        };

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_initial_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(retry_delay(&policy, 0, None), Duration::from_secs(2));
        assert_eq!(retry_delay(&policy, 1, None), Duration::from_secs(4));
        assert_eq!(retry_delay(&policy, 2, None), Duration::from_secs(8));
    }

    #[test]
    fn retry_after_seconds_override_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(retry_delay(&policy, 2, Some("5")), Duration::from_secs(5));
    }

    #[test]
    fn retry_after_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(retry_delay(&policy, 0, Some("3600")), Duration::from_secs(60));
    }

    #[test]
    fn unparseable_retry_after_falls_back_to_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(retry_delay(&policy, 1, Some("soon")), Duration::from_secs(4));
    }

    #[test]
    fn http_date_retry_after_is_relative_to_now() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2026 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);
        let wait = parse_retry_after("Wed, 21 Oct 2026 07:28:30 GMT", now).unwrap();
        assert_eq!(wait, Duration::from_secs(30));

        let past = parse_retry_after("Wed, 21 Oct 2026 07:27:00 GMT", now).unwrap();
        assert_eq!(past, Duration::ZERO);
    }

    #[test]
    fn only_429_and_503_count_as_throttling() {
        assert!(is_throttled(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_throttled(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_throttled(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
