//! API-key authentication and per-IP rate limiting

use axum::http::HeaderMap;
use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;

use super::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Check `X-API-Key` against the configured key in constant time. With no
/// key configured, authenticated routes are closed, not open.
pub fn require_api_key(
    headers: &HeaderMap,
    expected: Option<&SecretString>,
) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Err(ApiError::Forbidden);
    };
    let Some(provided) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) else {
        return Err(ApiError::Forbidden);
    };

    let expected = expected.expose_secret().as_bytes();
    let provided = provided.as_bytes();
    if expected.len() != provided.len() {
        return Err(ApiError::Forbidden);
    }
    if bool::from(expected.ct_eq(provided)) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

/// Sliding-window per-IP rate limiter
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    hits: DashMap<IpAddr, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            hits: DashMap::new(),
        }
    }

    /// Record a hit and report whether it is within the budget
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut entry = self.hits.entry(ip).or_default();

        while entry
            .front()
            .is_some_and(|&hit| now.duration_since(hit) > self.window)
        {
            entry.pop_front();
        }

        if entry.len() >= self.max_per_window as usize {
            return false;
        }
        entry.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_key(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        headers
    }

    #[test]
    fn test_matching_key_passes() {
        let expected = SecretString::from("k".to_string());
        assert!(require_api_key(&headers_with_key("k"), Some(&expected)).is_ok());
    }

    #[test]
    fn test_wrong_or_missing_key_fails() {
        let expected = SecretString::from("secret".to_string());
        assert!(require_api_key(&headers_with_key("wrong!"), Some(&expected)).is_err());
        assert!(require_api_key(&HeaderMap::new(), Some(&expected)).is_err());
    }

    #[test]
    fn test_unconfigured_key_closes_the_door() {
        assert!(require_api_key(&headers_with_key("anything"), None).is_err());
    }

    #[test]
    fn test_rate_limiter_budget() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));

        // Another IP has its own budget
        let other: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.check(other));
    }
}
