use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;

use crate::error::EngineError;

/// Exponential backoff with jitter, bounded by an attempt ceiling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per engine tier, first call included.
    pub ceiling: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ceiling: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`. `seed` spreads concurrent
    /// callers apart; a server-provided `retry_after` wins when longer.
    pub fn delay_for(&self, attempt: u32, seed: &str, retry_after: Option<Duration>) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
        let total_ms = exp_ms.saturating_add(jitter(base_ms, seed, attempt));
        let mut delay = Duration::from_millis(total_ms.min(self.max_delay.as_millis() as u64));
        if let Some(retry_after) = retry_after
            && retry_after > delay
        {
            delay = retry_after;
        }
        delay
    }
}

fn jitter(base_ms: u64, seed: &str, attempt: u32) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    let digest = md5::compute(format!("{}:{}", seed, attempt));
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.0[..8]);
    u64::from_le_bytes(bytes) % base_ms
}

pub(crate) fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    let code = status.as_u16();
    if code == 529 || code == 503 {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("resource_exhausted")
        || lower.contains("overloaded")
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Classifies a non-success HTTP response.
pub(crate) fn status_error(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    detail: Option<String>,
) -> EngineError {
    let message = format!(
        "{} API error ({}): {}",
        provider,
        status,
        detail.unwrap_or_else(|| body.trim().to_string())
    );
    let transient = is_rate_limited(status, body)
        || status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT;
    if transient {
        EngineError::transient(message).with_retry_after(retry_after(headers))
    } else {
        EngineError::permanent(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use reqwest::header::HeaderValue;

    #[test]
    fn delays_grow_and_stay_capped() {
        let policy = RetryPolicy {
            ceiling: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        };
        let first = policy.delay_for(1, "k", None);
        let second = policy.delay_for(2, "k", None);
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(200));
        assert!(second >= Duration::from_millis(200) && second < Duration::from_millis(300));
        assert_eq!(policy.delay_for(9, "k", None), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_is_stable_per_seed() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(2, "same", None),
            policy.delay_for(2, "same", None)
        );
    }

    #[test]
    fn retry_after_extends_the_delay() {
        let policy = RetryPolicy {
            ceiling: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        let delay = policy.delay_for(1, "k", Some(Duration::from_secs(2)));
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[test]
    fn classifies_statuses() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3"));
        let throttled = status_error("DeepL", StatusCode::TOO_MANY_REQUESTS, &headers, "", None);
        assert_eq!(throttled.class, ErrorClass::Transient);
        assert_eq!(throttled.retry_after, Some(Duration::from_secs(3)));

        let server = status_error("DeepL", StatusCode::BAD_GATEWAY, &HeaderMap::new(), "", None);
        assert_eq!(server.class, ErrorClass::Transient);

        let denied = status_error("DeepL", StatusCode::FORBIDDEN, &HeaderMap::new(), "bad key", None);
        assert_eq!(denied.class, ErrorClass::Permanent);
        assert!(denied.message.contains("bad key"));
    }
}
