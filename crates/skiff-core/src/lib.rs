// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The runtime orchestration kernel: event pipeline, request lifecycle,
//! middleware chain, output-message promises, and the guardrails client.

mod collect;
mod context;
mod guardrails;
mod middleware;
mod pipeline;
mod promise;
mod runtime;
mod status;

pub use collect::MessageCollector;
pub use context::RequestContext;
pub use guardrails::{build_validate_body, GuardrailsClient, GuardrailsRules, GuardrailsVerdict};
pub use middleware::{
    ApiKeyAuthMiddleware, MetricsMiddleware, MetricsSnapshot, Middleware, MiddlewareChain,
    MiddlewareResult, RateLimitMiddleware, RefusalKind, RequestLoggingMiddleware,
};
pub use pipeline::{run_pipeline, PipelineEnv, PipelineError};
pub use promise::OutputMessages;
pub use runtime::{
    GuardrailsValidator, PolicyRefusal, PreparedRun, RunOutcome, RunRequest, Runtime,
    RuntimeBuilder,
};
pub use status::{ResponseStatus, StatusCode};
