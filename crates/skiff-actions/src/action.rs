// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use skiff_model::{ActionAvailability, ActionInput, ChunkStream, EventStream, Parameter};

/// A tool call nested inside a structured handler result.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedToolCall {
    pub name: String,
    pub arguments: Value,
}

/// What a handler produced.
///
/// Dispatch is on the variant, not on runtime reflection of the handler:
/// - `Text` — a single result string, emitted as one result event.
/// - `Structured` — optional assistant-visible content plus follow-up tool
///   calls replayed after the current provider stream is exhausted.
/// - `Stream` — a chunk stream fed through a nested pipeline (the handler is
///   itself a model, or proxies one).
pub enum HandlerOutcome {
    Text(String),
    Structured {
        content: Option<String>,
        tool_calls: Vec<NestedToolCall>,
    },
    Stream(ChunkStream),
}

impl std::fmt::Debug for HandlerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Self::Structured {
                content,
                tool_calls,
            } => f
                .debug_struct("Structured")
                .field("content", content)
                .field("tool_calls", tool_calls)
                .finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Executes one server-side action invocation.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, args: Value) -> anyhow::Result<HandlerOutcome>;
}

/// Starts a remote agent run.  The returned events are forwarded verbatim
/// into the outer event stream after the runtime has bound a result to the
/// originating tool-call id.
#[async_trait]
pub trait RemoteAgentHandler: Send + Sync {
    async fn start(&self, args: Value) -> anyhow::Result<EventStream>;
}

/// A named, typed tool the model can invoke.
#[derive(Clone)]
pub struct Action {
    pub name: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
    pub availability: ActionAvailability,
    pub handler: Option<Arc<dyn ActionHandler>>,
    pub remote_agent_handler: Option<Arc<dyn RemoteAgentHandler>>,
}

impl Action {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            availability: ActionAvailability::Enabled,
            handler: None,
            remote_agent_handler: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_remote_agent(mut self, handler: Arc<dyn RemoteAgentHandler>) -> Self {
        self.remote_agent_handler = Some(handler);
        self
    }

    /// The wire-facing descriptor of this action (no handler attached).
    pub fn descriptor(&self) -> ActionInput {
        ActionInput {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            availability: self.availability,
        }
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("availability", &self.availability)
            .field("has_handler", &self.handler.is_some())
            .field("remote", &self.remote_agent_handler.is_some())
            .finish()
    }
}

/// Wrap an async closure as an [`ActionHandler`].
///
/// ```
/// use skiff_actions::{handler_fn, HandlerOutcome};
/// let handler = handler_fn(|args| async move {
///     let city = args["city"].as_str().unwrap_or("?").to_string();
///     Ok(HandlerOutcome::Text(format!("sunny in {city}")))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HandlerOutcome>> + Send + 'static,
{
    struct FnHandler<F>(F);

    #[async_trait]
    impl<F, Fut> ActionHandler for FnHandler<F>
    where
        F: Fn(Value) -> Fut + Send + Sync,
        Fut: Future<Output = anyhow::Result<HandlerOutcome>> + Send,
    {
        async fn call(&self, args: Value) -> anyhow::Result<HandlerOutcome> {
            (self.0)(args).await
        }
    }

    Arc::new(FnHandler(f))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
