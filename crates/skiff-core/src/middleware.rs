// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Before/after hooks around every request.
//!
//! Before-hooks run in registration order and may short-circuit the request;
//! after-hooks run in reverse order once the output messages are known and
//! their failures are logged but never alter the already-streamed response.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use skiff_model::Message;

use crate::{context::RequestContext, status::ResponseStatus};

/// Why a before-hook refused the request; the transport layer maps this to an
/// HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalKind {
    Auth,
    RateLimit,
    Validation,
}

#[derive(Debug, Clone)]
pub struct MiddlewareResult {
    pub success: bool,
    pub error: Option<String>,
    pub refusal: Option<RefusalKind>,
}

impl MiddlewareResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            refusal: None,
        }
    }

    pub fn fail(kind: RefusalKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            refusal: Some(kind),
        }
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Runs before the adapter is invoked.  May rewrite `messages` in place;
    /// rewrites compose by replacement.
    async fn before(
        &self,
        ctx: &mut RequestContext,
        messages: &mut Vec<Message>,
    ) -> MiddlewareResult {
        let _ = (ctx, messages);
        MiddlewareResult::ok()
    }

    /// Runs after the output messages are collected.
    async fn after(
        &self,
        ctx: &RequestContext,
        output: &[Message],
        status: &ResponseStatus,
    ) -> MiddlewareResult {
        let _ = (ctx, output, status);
        MiddlewareResult::ok()
    }
}

#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.push(middleware);
        self
    }

    /// Run before-hooks forward; the first failure short-circuits.
    pub async fn run_before(
        &self,
        ctx: &mut RequestContext,
        messages: &mut Vec<Message>,
    ) -> MiddlewareResult {
        for mw in &self.middlewares {
            let result = mw.before(ctx, messages).await;
            if !result.success {
                return result;
            }
        }
        MiddlewareResult::ok()
    }

    /// Run after-hooks in reverse; failures are non-fatal.
    pub async fn run_after(
        &self,
        ctx: &RequestContext,
        output: &[Message],
        status: &ResponseStatus,
    ) {
        for mw in self.middlewares.iter().rev() {
            let result = mw.after(ctx, output, status).await;
            if !result.success {
                warn!(
                    middleware = mw.name(),
                    error = result.error.as_deref().unwrap_or(""),
                    "after-hook failed"
                );
            }
        }
    }
}

// ─── Request logging ──────────────────────────────────────────────────────────

pub struct RequestLoggingMiddleware;

#[async_trait]
impl Middleware for RequestLoggingMiddleware {
    fn name(&self) -> &str {
        "request_logging"
    }

    async fn before(
        &self,
        ctx: &mut RequestContext,
        messages: &mut Vec<Message>,
    ) -> MiddlewareResult {
        info!(
            thread_id = %ctx.thread_id,
            run_id = %ctx.run_id,
            input_messages = messages.len(),
            "request started"
        );
        MiddlewareResult::ok()
    }

    async fn after(
        &self,
        ctx: &RequestContext,
        output: &[Message],
        status: &ResponseStatus,
    ) -> MiddlewareResult {
        info!(
            thread_id = %ctx.thread_id,
            output_messages = output.len(),
            status = status.code.as_str(),
            elapsed_ms = ctx.elapsed_ms(),
            "request completed"
        );
        MiddlewareResult::ok()
    }
}

// ─── Metrics ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    #[serde(rename = "totalRequests")]
    pub total_requests: u64,
    #[serde(rename = "successfulRequests")]
    pub successful_requests: u64,
    #[serde(rename = "failedRequests")]
    pub failed_requests: u64,
    #[serde(rename = "averageLatencyMs")]
    pub average_latency_ms: u64,
    #[serde(rename = "outputMessages")]
    pub output_messages: u64,
    #[serde(rename = "actionCalls")]
    pub action_calls: u64,
}

/// Process-wide counters, atomically updated.  Nothing else on the streaming
/// critical path touches shared state.
#[derive(Default)]
pub struct MetricsMiddleware {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_latency_ms: AtomicU64,
    output_messages: AtomicU64,
    action_calls: AtomicU64,
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_requests: total,
            successful_requests: self.succeeded.load(Ordering::Relaxed),
            failed_requests: self.failed.load(Ordering::Relaxed),
            average_latency_ms: if total == 0 { 0 } else { total_latency / total },
            output_messages: self.output_messages.load(Ordering::Relaxed),
            action_calls: self.action_calls.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn before(
        &self,
        _ctx: &mut RequestContext,
        _messages: &mut Vec<Message>,
    ) -> MiddlewareResult {
        self.total.fetch_add(1, Ordering::Relaxed);
        MiddlewareResult::ok()
    }

    async fn after(
        &self,
        ctx: &RequestContext,
        output: &[Message],
        status: &ResponseStatus,
    ) -> MiddlewareResult {
        if status.is_success() {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_ms
            .fetch_add(ctx.elapsed_ms(), Ordering::Relaxed);
        self.output_messages
            .fetch_add(output.len() as u64, Ordering::Relaxed);
        let actions = output.iter().filter(|m| m.is_action_execution()).count();
        self.action_calls
            .fetch_add(actions as u64, Ordering::Relaxed);
        MiddlewareResult::ok()
    }
}

// ─── API-key authentication ───────────────────────────────────────────────────

/// Matches `context.properties.api_key` against a configured allow-set.
/// An empty set disables authentication entirely.
pub struct ApiKeyAuthMiddleware {
    keys: HashSet<String>,
}

impl ApiKeyAuthMiddleware {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Middleware for ApiKeyAuthMiddleware {
    fn name(&self) -> &str {
        "api_key_auth"
    }

    async fn before(
        &self,
        ctx: &mut RequestContext,
        _messages: &mut Vec<Message>,
    ) -> MiddlewareResult {
        if self.keys.is_empty() {
            return MiddlewareResult::ok();
        }
        match ctx.property_str("api_key") {
            Some(key) if self.keys.contains(key) => MiddlewareResult::ok(),
            _ => MiddlewareResult::fail(RefusalKind::Auth, "Invalid API key"),
        }
    }
}

// ─── Rate limiting ────────────────────────────────────────────────────────────

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limiter keyed by thread id: at most `max_per_minute`
/// requests inside any 60-second window.  Timestamps are pruned on each
/// check, so the table stays proportional to the set of active threads.
pub struct RateLimitMiddleware {
    max_per_minute: u32,
    table: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimitMiddleware {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            table: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn before(
        &self,
        ctx: &mut RequestContext,
        _messages: &mut Vec<Message>,
    ) -> MiddlewareResult {
        let now = Instant::now();
        let mut table = self.table.lock().expect("rate table poisoned");
        let timestamps = table.entry(ctx.thread_id.clone()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < RATE_WINDOW);
        if timestamps.len() >= self.max_per_minute as usize {
            return MiddlewareResult::fail(
                RefusalKind::RateLimit,
                format!(
                    "Rate limit exceeded: {} requests per minute",
                    self.max_per_minute
                ),
            );
        }
        timestamps.push(now);
        MiddlewareResult::ok()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new("th-1", "run-1")
    }

    // ── Chain ordering ───────────────────────────────────────────────────────

    struct Recorder {
        label: &'static str,
        order: Arc<Mutex<Vec<String>>>,
        fail_before: bool,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        async fn before(
            &self,
            _ctx: &mut RequestContext,
            _messages: &mut Vec<Message>,
        ) -> MiddlewareResult {
            self.order.lock().unwrap().push(format!("before:{}", self.label));
            if self.fail_before {
                MiddlewareResult::fail(RefusalKind::Validation, "nope")
            } else {
                MiddlewareResult::ok()
            }
        }

        async fn after(
            &self,
            _ctx: &RequestContext,
            _output: &[Message],
            _status: &ResponseStatus,
        ) -> MiddlewareResult {
            self.order.lock().unwrap().push(format!("after:{}", self.label));
            MiddlewareResult::ok()
        }
    }

    #[tokio::test]
    async fn before_runs_forward_and_after_runs_reverse() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new()
            .with(Arc::new(Recorder {
                label: "a",
                order: Arc::clone(&order),
                fail_before: false,
            }))
            .with(Arc::new(Recorder {
                label: "b",
                order: Arc::clone(&order),
                fail_before: false,
            }));

        let mut c = ctx();
        let mut msgs = vec![];
        chain.run_before(&mut c, &mut msgs).await;
        chain.run_after(&c, &[], &ResponseStatus::success()).await;

        assert_eq!(
            *order.lock().unwrap(),
            vec!["before:a", "before:b", "after:b", "after:a"]
        );
    }

    #[tokio::test]
    async fn before_failure_short_circuits() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new()
            .with(Arc::new(Recorder {
                label: "a",
                order: Arc::clone(&order),
                fail_before: true,
            }))
            .with(Arc::new(Recorder {
                label: "b",
                order: Arc::clone(&order),
                fail_before: false,
            }));

        let mut c = ctx();
        let result = chain.run_before(&mut c, &mut vec![]).await;
        assert!(!result.success);
        assert_eq!(*order.lock().unwrap(), vec!["before:a"]);
    }

    // ── Auth ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn auth_disabled_when_no_keys_configured() {
        let mw = ApiKeyAuthMiddleware::new(vec![]);
        let mut c = ctx();
        assert!(mw.before(&mut c, &mut vec![]).await.success);
    }

    #[tokio::test]
    async fn auth_accepts_configured_key() {
        let mw = ApiKeyAuthMiddleware::new(vec!["sk-good".into()]);
        let mut c = ctx();
        c.properties.insert("api_key".into(), json!("sk-good"));
        assert!(mw.before(&mut c, &mut vec![]).await.success);
    }

    #[tokio::test]
    async fn auth_rejects_missing_or_wrong_key() {
        let mw = ApiKeyAuthMiddleware::new(vec!["sk-good".into()]);
        let mut c = ctx();
        let result = mw.before(&mut c, &mut vec![]).await;
        assert!(!result.success);
        assert_eq!(result.refusal, Some(RefusalKind::Auth));

        c.properties.insert("api_key".into(), json!("sk-bad"));
        assert!(!mw.before(&mut c, &mut vec![]).await.success);
    }

    // ── Rate limit ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn nth_request_passes_and_n_plus_first_is_rejected() {
        let mw = RateLimitMiddleware::new(3);
        let mut c = ctx();
        for _ in 0..3 {
            assert!(mw.before(&mut c, &mut vec![]).await.success);
        }
        let result = mw.before(&mut c, &mut vec![]).await;
        assert!(!result.success);
        assert_eq!(result.refusal, Some(RefusalKind::RateLimit));
    }

    #[tokio::test]
    async fn rate_limit_is_per_thread() {
        let mw = RateLimitMiddleware::new(1);
        let mut a = RequestContext::new("th-a", "r");
        let mut b = RequestContext::new("th-b", "r");
        assert!(mw.before(&mut a, &mut vec![]).await.success);
        assert!(mw.before(&mut b, &mut vec![]).await.success);
        assert!(!mw.before(&mut a, &mut vec![]).await.success);
    }

    // ── Metrics ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn metrics_count_requests_and_outcomes() {
        let mw = MetricsMiddleware::new();
        let mut c = ctx();
        mw.before(&mut c, &mut vec![]).await;
        mw.after(&c, &[Message::assistant("hi")], &ResponseStatus::success())
            .await;

        mw.before(&mut c, &mut vec![]).await;
        mw.after(
            &c,
            &[],
            &ResponseStatus::failed(crate::StatusCode::UnknownError, "x"),
        )
        .await;

        let snap = mw.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.successful_requests, 1);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.output_messages, 1);
    }

    #[tokio::test]
    async fn metrics_count_action_calls_in_output() {
        let mw = MetricsMiddleware::new();
        let mut c = ctx();
        mw.before(&mut c, &mut vec![]).await;
        let output = vec![
            Message::assistant("hi"),
            Message::ActionExecution {
                id: "t1".into(),
                name: "f".into(),
                arguments: json!({}),
                parent_id: None,
            },
        ];
        mw.after(&c, &output, &ResponseStatus::success()).await;
        assert_eq!(mw.snapshot().action_calls, 1);
    }
}
