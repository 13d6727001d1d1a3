// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The request orchestrator.
//!
//! One chat request flows through: normalize → before-middleware → action-set
//! resolution → guardrails → output-messages promise → adapter → event
//! pipeline → collation → after-middleware.  Policy refusals happen in
//! [`Runtime::begin`] so the transport can answer 4xx before any stream
//! bytes are written; everything after streams through [`PreparedRun::execute`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use skiff_actions::{Action, ActionRegistry, ApprovalManager};
use skiff_model::{
    random_id, ActionAvailability, ActionInput, AdapterRequest, ForwardedParameters, Message,
    ProviderAdapter, RuntimeEvent,
};

use crate::{
    collect::MessageCollector,
    context::RequestContext,
    guardrails::{GuardrailsClient, GuardrailsRules, GuardrailsVerdict},
    middleware::{MiddlewareChain, RefusalKind},
    pipeline::{run_pipeline, PipelineEnv, PipelineError},
    promise::OutputMessages,
    status::{ResponseStatus, StatusCode},
};

/// Seam for guardrails validation so the deny path is testable offline.
#[async_trait]
pub trait GuardrailsValidator: Send + Sync {
    async fn validate(
        &self,
        public_api_key: &str,
        rules: &GuardrailsRules,
        messages: &[Message],
    ) -> anyhow::Result<GuardrailsVerdict>;
}

#[async_trait]
impl GuardrailsValidator for GuardrailsClient {
    async fn validate(
        &self,
        public_api_key: &str,
        rules: &GuardrailsRules,
        messages: &[Message],
    ) -> anyhow::Result<GuardrailsVerdict> {
        GuardrailsClient::validate(self, public_api_key, rules, messages).await
    }
}

/// One chat request as seen by the orchestrator.
#[derive(Default)]
pub struct RunRequest {
    pub messages: Vec<Message>,
    pub thread_id: Option<String>,
    pub run_id: Option<String>,
    pub client_actions: Vec<ActionInput>,
    pub forwarded_parameters: Option<ForwardedParameters>,
    pub model: Option<String>,
    pub guardrails_rules: Option<GuardrailsRules>,
    pub cloud_api_key: Option<String>,
    pub properties: HashMap<String, Value>,
    pub url: Option<String>,
}

/// Terminal result of one request.
#[derive(Debug)]
pub struct RunOutcome {
    pub thread_id: String,
    pub run_id: String,
    pub messages: Vec<Message>,
    pub status: ResponseStatus,
}

/// A before-hook refused the request; no stream was opened.
#[derive(Debug)]
pub struct PolicyRefusal {
    pub kind: RefusalKind,
    pub reason: String,
}

pub struct Runtime {
    adapter: Arc<dyn ProviderAdapter>,
    actions: Arc<ActionRegistry>,
    middleware: MiddlewareChain,
    approvals: Arc<ApprovalManager>,
    guardrails: Option<Arc<dyn GuardrailsValidator>>,
    promises: Arc<OutputMessages>,
}

pub struct RuntimeBuilder {
    adapter: Arc<dyn ProviderAdapter>,
    actions: Arc<ActionRegistry>,
    middleware: MiddlewareChain,
    approvals: Arc<ApprovalManager>,
    guardrails: Option<Arc<dyn GuardrailsValidator>>,
}

impl RuntimeBuilder {
    pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            adapter,
            actions: Arc::new(ActionRegistry::new()),
            middleware: MiddlewareChain::new(),
            approvals: Arc::new(ApprovalManager::disabled()),
            guardrails: None,
        }
    }

    pub fn actions(mut self, actions: Arc<ActionRegistry>) -> Self {
        self.actions = actions;
        self
    }

    pub fn middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn approvals(mut self, approvals: Arc<ApprovalManager>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn guardrails(mut self, validator: Arc<dyn GuardrailsValidator>) -> Self {
        self.guardrails = Some(validator);
        self
    }

    pub fn build(self) -> Arc<Runtime> {
        Arc::new(Runtime {
            adapter: self.adapter,
            actions: self.actions,
            middleware: self.middleware,
            approvals: self.approvals,
            guardrails: self.guardrails,
            promises: Arc::new(OutputMessages::new()),
        })
    }
}

impl Runtime {
    pub fn builder(adapter: Arc<dyn ProviderAdapter>) -> RuntimeBuilder {
        RuntimeBuilder::new(adapter)
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    pub fn approvals(&self) -> &Arc<ApprovalManager> {
        &self.approvals
    }

    pub fn promises(&self) -> &Arc<OutputMessages> {
        &self.promises
    }

    /// Steps 1–3: normalize ids, run before-hooks, resolve the action set.
    ///
    /// Returns `Err` when a before-hook refuses the request — the transport
    /// should answer with a 4xx before opening any stream.
    pub async fn begin(
        self: &Arc<Self>,
        req: RunRequest,
    ) -> Result<PreparedRun, PolicyRefusal> {
        let thread_id = req
            .thread_id
            .filter(|t| !t.is_empty())
            .unwrap_or_else(random_id);
        let run_id = req.run_id.filter(|r| !r.is_empty()).unwrap_or_else(random_id);

        let mut ctx = RequestContext::new(thread_id, run_id);
        ctx.properties = req.properties;
        ctx.url = req.url;

        let mut messages = req.messages;
        let before = self.middleware.run_before(&mut ctx, &mut messages).await;
        if !before.success {
            return Err(PolicyRefusal {
                kind: before.refusal.unwrap_or(RefusalKind::Validation),
                reason: before.error.unwrap_or_else(|| "request refused".into()),
            });
        }

        let (wire_actions, server_actions) =
            resolve_action_set(&self.actions, &req.client_actions);

        Ok(PreparedRun {
            runtime: Arc::clone(self),
            ctx,
            messages,
            wire_actions,
            server_actions,
            forwarded_parameters: req.forwarded_parameters,
            model: req.model,
            guardrails_rules: req.guardrails_rules,
            cloud_api_key: req.cloud_api_key,
        })
    }
}

/// Merge server actions with request-declared ones.
///
/// Precedence on name collision: server-side wins, then client-side, then
/// remote.  Disabled actions never reach the provider.
fn resolve_action_set(
    registry: &ActionRegistry,
    client_actions: &[ActionInput],
) -> (Vec<ActionInput>, HashMap<String, Arc<Action>>) {
    let mut wire: Vec<ActionInput> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut server: HashMap<String, Arc<Action>> = HashMap::new();

    for action in registry.all() {
        if action.availability == ActionAvailability::Disabled {
            continue;
        }
        if seen.insert(action.name.clone()) {
            wire.push(action.descriptor());
            server.insert(action.name.clone(), action);
        }
    }

    // Client-declared enabled actions first, remote-declared ones last.
    let (client, remote): (Vec<_>, Vec<_>) = client_actions
        .iter()
        .filter(|a| a.availability != ActionAvailability::Disabled)
        .partition(|a| a.availability != ActionAvailability::Remote);
    for a in client.into_iter().chain(remote) {
        if seen.insert(a.name.clone()) {
            wire.push(a.clone());
        }
    }

    (wire, server)
}

/// A validated request, ready to stream.
pub struct PreparedRun {
    runtime: Arc<Runtime>,
    ctx: RequestContext,
    messages: Vec<Message>,
    wire_actions: Vec<ActionInput>,
    server_actions: HashMap<String, Arc<Action>>,
    forwarded_parameters: Option<ForwardedParameters>,
    model: Option<String>,
    guardrails_rules: Option<GuardrailsRules>,
    cloud_api_key: Option<String>,
}

impl std::fmt::Debug for PreparedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedRun")
            .field("thread_id", &self.ctx.thread_id)
            .field("run_id", &self.ctx.run_id)
            .finish_non_exhaustive()
    }
}

impl PreparedRun {
    pub fn thread_id(&self) -> &str {
        &self.ctx.thread_id
    }

    pub fn run_id(&self) -> &str {
        &self.ctx.run_id
    }

    /// Steps 4–9: guardrails, adapter, pipeline, collation, after-hooks.
    ///
    /// Events stream into `sink` as they are produced; the returned outcome
    /// carries the collated messages and the terminal status.  A dropped
    /// sink receiver is treated as a client disconnect.
    pub async fn execute(self, sink: mpsc::Sender<RuntimeEvent>) -> RunOutcome {
        let runtime = Arc::clone(&self.runtime);
        let thread_id = self.ctx.thread_id.clone();
        let run_id = self.ctx.run_id.clone();

        // Register the promise before anything can resolve or reject it.
        let _receiver = runtime.promises.register(&thread_id);

        // Guardrails pre-flight: only when the request carries rules and a
        // cloud key, and a validator is configured.
        if let (Some(rules), Some(key), Some(validator)) = (
            &self.guardrails_rules,
            &self.cloud_api_key,
            &runtime.guardrails,
        ) {
            match validator.validate(key, rules, &self.messages).await {
                Ok(verdict) if verdict.is_denied() => {
                    let reason = verdict
                        .reason
                        .unwrap_or_else(|| "Input validation failed".to_string());
                    info!(thread_id = %thread_id, reason = %reason, "guardrails denied input");
                    let denial = Message::assistant(reason.clone());
                    emit_text_message(&sink, &denial).await;
                    let messages = vec![denial];
                    runtime.promises.resolve(&thread_id, messages.clone());
                    let status =
                        ResponseStatus::failed(StatusCode::GuardrailsValidationFailure, reason);
                    runtime
                        .middleware
                        .run_after(&self.ctx, &messages, &status)
                        .await;
                    return RunOutcome {
                        thread_id,
                        run_id,
                        messages,
                        status,
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    error!(thread_id = %thread_id, error = %e, "guardrails validation error");
                    let _ = sink
                        .send(RuntimeEvent::Error {
                            code: "GUARDRAILS_ERROR".into(),
                            message: e.to_string(),
                        })
                        .await;
                    runtime.promises.reject(&thread_id, e.to_string());
                    let status = ResponseStatus::failed(StatusCode::UnknownError, e.to_string());
                    runtime.middleware.run_after(&self.ctx, &[], &status).await;
                    return RunOutcome {
                        thread_id,
                        run_id,
                        messages: Vec::new(),
                        status,
                    };
                }
            }
        }

        // Open the provider stream.  The adapter owns payload translation
        // (allow-list filter, role fix-up, token budget).
        let adapter_request = AdapterRequest {
            messages: self.messages,
            actions: self.wire_actions,
            thread_id: Some(thread_id.clone()),
            model: self.model,
            forwarded_parameters: self.forwarded_parameters,
        };
        let chunks = match runtime.adapter.process(adapter_request).await {
            Ok(chunks) => chunks,
            Err(e) => {
                error!(thread_id = %thread_id, error = %e, "adapter failed before streaming");
                let _ = sink
                    .send(RuntimeEvent::Error {
                        code: "ADAPTER_ERROR".into(),
                        message: e.to_string(),
                    })
                    .await;
                runtime.promises.reject(&thread_id, e.to_string());
                let status = ResponseStatus::failed(StatusCode::UnknownError, e.to_string());
                runtime.middleware.run_after(&self.ctx, &[], &status).await;
                return RunOutcome {
                    thread_id,
                    run_id,
                    messages: Vec::new(),
                    status,
                };
            }
        };

        // Drive the pipeline, forwarding events to the transport while
        // folding them into messages.  Dropping the internal receiver is how
        // a client disconnect propagates back to the pipeline.
        let env = PipelineEnv {
            server_actions: self.server_actions,
            approvals: Arc::clone(&runtime.approvals),
            thread_id: thread_id.clone(),
        };
        let (tx, mut rx) = mpsc::channel::<RuntimeEvent>(64);
        let pipeline_fut = async {
            let result = run_pipeline(chunks, &env, &tx).await;
            drop(tx);
            result
        };
        // The forward task owns the receiver: breaking out drops it, which
        // fails the pipeline's next send and stops chunk consumption.
        let forward_fut = async move {
            let mut collector = MessageCollector::new();
            let mut interrupted = false;
            while let Some(ev) = rx.recv().await {
                collector.observe(&ev);
                if sink.send(ev).await.is_err() {
                    interrupted = true;
                    break;
                }
            }
            drop(rx);
            (collector, interrupted)
        };
        let (pipeline_result, (collector, interrupted)) = tokio::join!(pipeline_fut, forward_fut);

        let messages = collector.finish();
        let status = if interrupted || matches!(pipeline_result, Err(PipelineError::SinkClosed)) {
            warn!(thread_id = %thread_id, "client disconnected mid-stream");
            runtime.promises.reject(&thread_id, "stream cancelled");
            ResponseStatus::failed(StatusCode::MessageStreamInterrupted, "stream cancelled")
        } else {
            runtime.promises.resolve(&thread_id, messages.clone());
            ResponseStatus::success()
        };

        runtime
            .middleware
            .run_after(&self.ctx, &messages, &status)
            .await;

        RunOutcome {
            thread_id,
            run_id,
            messages,
            status,
        }
    }
}

/// Emit a complete single-message text group for `message`.
async fn emit_text_message(sink: &mpsc::Sender<RuntimeEvent>, message: &Message) {
    let (Some(content), id) = (message.text_content(), message.id().to_string()) else {
        return;
    };
    let _ = sink
        .send(RuntimeEvent::TextMessageStart {
            message_id: id.clone(),
            parent_message_id: None,
        })
        .await;
    let _ = sink
        .send(RuntimeEvent::TextMessageContent {
            message_id: id.clone(),
            delta: content.to_string(),
        })
        .await;
    let _ = sink.send(RuntimeEvent::TextMessageEnd { message_id: id }).await;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
