//! Fixed-window request counters keyed by caller.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde_json::json;

use super::auth::{optional_auth_user, AuthUser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterKind {
    /// Every API route; answers 429 without rate headers
    General,
    /// Expensive analytic routes; always reports its counters in headers
    Strict,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start_ms: i64,
    count: u32,
}

/// Result of one check-and-increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds at which the window ends
    pub reset_epoch_secs: i64,
    pub retry_after_secs: i64,
}

#[derive(Debug)]
pub struct RateLimiter {
    kind: LimiterKind,
    limit: u32,
    window_ms: i64,
    entries: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(kind: LimiterKind, limit: u32, window_secs: u64) -> Self {
        Self {
            kind,
            limit,
            window_ms: window_secs as i64 * 1000,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn general_from_config() -> Self {
        let api = &crate::config::config().api;
        Self::new(LimiterKind::General, api.rate_limit_requests, api.rate_limit_window_secs)
    }

    pub fn strict_from_config() -> Self {
        let api = &crate::config::config().api;
        Self::new(LimiterKind::Strict, api.strict_rate_limit_requests, api.rate_limit_window_secs)
    }

    pub fn kind(&self) -> LimiterKind {
        self.kind
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Utc::now().timestamp_millis())
    }

    /// Count one request for `key` at `now_ms`. The whole read-reset-increment
    /// happens under one lock.
    pub fn check_at(&self, key: &str, now_ms: i64) -> RateDecision {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let window = entries.entry(key.to_string()).or_insert(Window { start_ms: now_ms, count: 0 });

        if now_ms - window.start_ms > self.window_ms {
            window.start_ms = now_ms;
            window.count = 0;
        }
        window.count = window.count.saturating_add(1);

        let window_end = window.start_ms + self.window_ms;
        RateDecision {
            allowed: window.count <= self.limit,
            limit: self.limit,
            remaining: self.limit.saturating_sub(window.count),
            reset_epoch_secs: window_end / 1000,
            retry_after_secs: ((window_end - now_ms) / 1000).max(1),
        }
    }

    pub fn remaining_at(&self, key: &str, now_ms: i64) -> u32 {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        match entries.get(key) {
            Some(window) if now_ms - window.start_ms <= self.window_ms => self.limit.saturating_sub(window.count),
            _ => self.limit,
        }
    }

    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now().timestamp_millis())
    }

    /// Drop windows that have fully expired. The strict limiter keeps them for
    /// two windows.
    pub fn cleanup_at(&self, now_ms: i64) -> usize {
        let max_age = match self.kind {
            LimiterKind::General => self.window_ms,
            LimiterKind::Strict => self.window_ms * 2,
        };
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let before = entries.len();
        entries.retain(|_, window| now_ms - window.start_ms <= max_age);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!("Cleaned up {} expired {:?} rate limit entries", removed, self.kind);
        }
        removed
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    fn exceeded_body(&self, decision: &RateDecision) -> serde_json::Value {
        match self.kind {
            LimiterKind::General => json!({
                "error": "Rate limit exceeded",
                "message": format!("Maximum {} requests per minute. Please try again later.", self.limit),
            }),
            LimiterKind::Strict => json!({
                "error": "Rate limit exceeded",
                "message": format!(
                    "Maximum {} requests per minute. Please try again in {} seconds.",
                    self.limit, decision.retry_after_secs
                ),
                "retryAfter": decision.retry_after_secs,
            }),
        }
    }
}

/// Rate-limit key: the JWT subject, else the client address
pub fn rate_limit_key(request: &Request) -> String {
    if let Some(user) = request.extensions().get::<AuthUser>() {
        return format!("user:{}", user.user_id);
    }
    if let Some(user) = optional_auth_user(request.headers()) {
        return format!("user:{}", user.user_id);
    }
    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "anonymous".to_string(),
    }
}

fn set_header(response: &mut Response, name: &'static str, value: i64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        response.headers_mut().insert(HeaderName::from_static(name), value);
    }
}

fn apply_headers(response: &mut Response, decision: &RateDecision) {
    set_header(response, "x-ratelimit-limit", decision.limit as i64);
    set_header(response, "x-ratelimit-remaining", decision.remaining as i64);
    set_header(response, "x-ratelimit-reset", decision.reset_epoch_secs);
}

pub async fn rate_limit_middleware(State(limiter): State<Arc<RateLimiter>>, request: Request, next: Next) -> Response {
    if !crate::config::config().api.enable_rate_limiting {
        return next.run(request).await;
    }

    let key = rate_limit_key(&request);
    let decision = limiter.check(&key);

    if !decision.allowed {
        tracing::warn!(
            "Rate limit exceeded for {} on {} ({:?})",
            key,
            request.uri().path(),
            limiter.kind()
        );
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(limiter.exceeded_body(&decision))).into_response();
        if limiter.kind() == LimiterKind::Strict {
            apply_headers(&mut response, &decision);
            set_header(&mut response, "retry-after", decision.retry_after_secs);
        }
        return response;
    }

    let mut response = next.run(request).await;
    if limiter.kind() == LimiterKind::Strict {
        apply_headers(&mut response, &decision);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_limit_within_window() {
        let limiter = RateLimiter::new(LimiterKind::General, 3, 60);
        let t0 = 1_000_000;
        assert!(limiter.check_at("u", t0).allowed);
        assert!(limiter.check_at("u", t0 + 10).allowed);
        let third = limiter.check_at("u", t0 + 20);
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);
        assert!(!limiter.check_at("u", t0 + 30).allowed);
        assert!(limiter.check_at("other", t0 + 30).allowed);
    }

    #[test]
    fn window_resets_only_after_it_has_passed() {
        let limiter = RateLimiter::new(LimiterKind::General, 1, 60);
        let t0 = 5_000_000;
        assert!(limiter.check_at("u", t0).allowed);
        assert!(!limiter.check_at("u", t0 + 60_000).allowed);
        assert!(limiter.check_at("u", t0 + 60_001).allowed);
    }

    #[test]
    fn reset_and_retry_after() {
        let limiter = RateLimiter::new(LimiterKind::Strict, 1, 60);
        let t0 = 10_000_000;
        limiter.check_at("u", t0);
        let blocked = limiter.check_at("u", t0 + 59_500);
        assert!(!blocked.allowed);
        assert_eq!(blocked.reset_epoch_secs, (t0 + 60_000) / 1000);
        assert_eq!(blocked.retry_after_secs, 1);

        let early = limiter.check_at("u", t0 + 20_000);
        assert_eq!(early.retry_after_secs, 40);
    }

    #[test]
    fn remaining_requests_tracks_the_window() {
        let limiter = RateLimiter::new(LimiterKind::General, 5, 60);
        let t0 = 1_000;
        assert_eq!(limiter.remaining_at("u", t0), 5);
        limiter.check_at("u", t0);
        limiter.check_at("u", t0);
        assert_eq!(limiter.remaining_at("u", t0 + 1), 3);
        assert_eq!(limiter.remaining_at("u", t0 + 60_001), 5);
    }

    #[test]
    fn cleanup_uses_kind_specific_age() {
        let general = RateLimiter::new(LimiterKind::General, 5, 60);
        let strict = RateLimiter::new(LimiterKind::Strict, 5, 60);
        let t0 = 0;
        general.check_at("u", t0);
        strict.check_at("u", t0);

        assert_eq!(general.cleanup_at(t0 + 90_000), 1);
        assert_eq!(strict.cleanup_at(t0 + 90_000), 0);
        assert_eq!(strict.cleanup_at(t0 + 120_001), 1);
        assert_eq!(strict.tracked_keys(), 0);
    }

    #[test]
    fn exceeded_body_names_the_limit() {
        let limiter = RateLimiter::new(LimiterKind::General, 60, 60);
        let decision = limiter.check_at("u", 0);
        let body = limiter.exceeded_body(&decision);
        assert_eq!(body["error"], "Rate limit exceeded");
        assert_eq!(body["message"], "Maximum 60 requests per minute. Please try again later.");
    }
}
