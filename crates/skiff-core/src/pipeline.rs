// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The streaming event pipeline.
//!
//! Consumes a finite stream of decoded provider chunks and emits an ordered
//! stream of typed events, opening and closing text-message and
//! action-execution groups in strict discipline.  Server-side tool calls are
//! executed inline the moment their group closes; no further provider chunks
//! are consumed while a handler runs, so backpressure flows to the provider
//! through the chunk source itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_recursion::async_recursion;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use skiff_actions::{take_bypass_flag, Action, ApprovalManager, HandlerOutcome, NestedToolCall};
use skiff_model::{encode_result, random_id, ChunkStream, ErrorDetail, RuntimeEvent, StreamChunk};

/// Nested pipelines (streaming handlers) may not recurse deeper than this.
const MAX_PIPELINE_DEPTH: u8 = 3;

/// Everything the pipeline needs besides the chunk source.
pub struct PipelineEnv {
    /// Actions the runtime may execute itself, keyed by name.  A tool call
    /// whose name is absent here streams through transparently.
    pub server_actions: HashMap<String, Arc<Action>>,
    pub approvals: Arc<ApprovalManager>,
    pub thread_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The event receiver went away (client disconnect).  The pipeline stops
    /// consuming chunks; draining the provider stream is unnecessary.
    #[error("event sink closed")]
    SinkClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    InMessage,
    InFunction,
}

/// Mutable per-request state, advanced once per chunk.
struct PipelineState {
    mode: Mode,
    current_message_id: String,
    current_tool_call_id: String,
    current_action_name: String,
    accumulated_args: String,
    action: Option<Arc<Action>>,
    parent_message_id: Option<String>,
    /// Nested tool calls produced by structured handler results; replayed
    /// after the chunk source is exhausted.
    deferred: Vec<NestedToolCall>,
}

impl PipelineState {
    fn new() -> Self {
        Self {
            mode: Mode::Idle,
            current_message_id: String::new(),
            current_tool_call_id: String::new(),
            current_action_name: String::new(),
            accumulated_args: String::new(),
            action: None,
            parent_message_id: None,
            deferred: Vec::new(),
        }
    }
}

/// Drive one chunk stream to completion, emitting events into `sink`.
pub async fn run_pipeline(
    chunks: ChunkStream,
    env: &PipelineEnv,
    sink: &mpsc::Sender<RuntimeEvent>,
) -> Result<(), PipelineError> {
    run_at_depth(chunks, env, sink, 0).await
}

#[async_recursion]
async fn run_at_depth(
    mut chunks: ChunkStream,
    env: &PipelineEnv,
    sink: &mpsc::Sender<RuntimeEvent>,
    depth: u8,
) -> Result<(), PipelineError> {
    let mut state = PipelineState::new();

    while let Some(item) = chunks.next().await {
        let chunk = match item {
            Ok(c) => c,
            Err(e) => {
                // Close whatever group is open so the client's state machine
                // stays balanced, then surface the failure as an event.  The
                // half-finished tool call is not executed.
                close_open_group_without_execution(&mut state, sink).await?;
                warn!(thread_id = %env.thread_id, error = %e, "provider stream failed");
                emit(
                    sink,
                    RuntimeEvent::Error {
                        code: "PROVIDER_ERROR".into(),
                        message: e.to_string(),
                    },
                )
                .await?;
                return Ok(());
            }
        };

        step(&mut state, &chunk, env, sink, depth).await?;

        if chunk.finish_reason.is_some() {
            break;
        }
    }

    // Close any group the stream left open.
    match state.mode {
        Mode::InMessage => {
            emit(
                sink,
                RuntimeEvent::TextMessageEnd {
                    message_id: state.current_message_id.clone(),
                },
            )
            .await?;
        }
        Mode::InFunction => {
            close_function_group(&mut state, env, sink, depth).await?;
        }
        Mode::Idle => {}
    }
    state.mode = Mode::Idle;

    // Replay nested tool calls queued by structured handler results.  These
    // groups are emitted for the client; their handlers are not re-entered.
    {
        let deferred = std::mem::take(&mut state.deferred);
        for call in deferred {
            let id = random_id();
            emit(
                sink,
                RuntimeEvent::ActionExecutionStart {
                    action_execution_id: id.clone(),
                    action_name: call.name.clone(),
                    parent_message_id: None,
                },
            )
            .await?;
            emit(
                sink,
                RuntimeEvent::ActionExecutionArgs {
                    action_execution_id: id.clone(),
                    args: call.arguments.to_string(),
                },
            )
            .await?;
            emit(
                sink,
                RuntimeEvent::ActionExecutionEnd {
                    action_execution_id: id,
                },
            )
            .await?;
        }
    }

    Ok(())
}

/// Apply the mode-switch rules to one chunk, in order.
async fn step(
    state: &mut PipelineState,
    chunk: &StreamChunk,
    env: &PipelineEnv,
    sink: &mpsc::Sender<RuntimeEvent>,
    depth: u8,
) -> Result<(), PipelineError> {
    let opens_call = chunk.opens_tool_call();
    let incoming_call_id = chunk.tool_call.as_ref().and_then(|t| t.id.as_deref());

    // 1. Switch out of message mode when a tool call begins.
    if state.mode == Mode::InMessage && opens_call {
        emit(
            sink,
            RuntimeEvent::TextMessageEnd {
                message_id: state.current_message_id.clone(),
            },
        )
        .await?;
        state.mode = Mode::Idle;
    }

    // 2. Switch out of function mode on finish, on a different call id, or
    //    when text resumes.
    if state.mode == Mode::InFunction {
        let different_call = opens_call && incoming_call_id != Some(state.current_tool_call_id.as_str());
        if chunk.finish_reason.is_some() || different_call || chunk.text_delta.is_some() {
            close_function_group(state, env, sink, depth).await?;
        }
    }

    // 3. Enter function mode.
    if let (Mode::Idle, true, Some(tc)) = (state.mode, opens_call, chunk.tool_call.as_ref()) {
        state.current_tool_call_id = tc.id.clone().unwrap_or_default();
        state.current_action_name = tc.name.clone().unwrap_or_default();
        state.action = env.server_actions.get(&state.current_action_name).cloned();
        state.parent_message_id = if chunk.id.is_empty() {
            None
        } else {
            Some(chunk.id.clone())
        };
        state.accumulated_args.clear();
        emit(
            sink,
            RuntimeEvent::ActionExecutionStart {
                action_execution_id: state.current_tool_call_id.clone(),
                action_name: state.current_action_name.clone(),
                parent_message_id: state.parent_message_id.clone(),
            },
        )
        .await?;
        state.mode = Mode::InFunction;
    }
    // 4. Enter message mode.
    else if state.mode == Mode::Idle && chunk.text_delta.is_some() {
        state.current_message_id = if chunk.id.is_empty() {
            random_id()
        } else {
            chunk.id.clone()
        };
        emit(
            sink,
            RuntimeEvent::TextMessageStart {
                message_id: state.current_message_id.clone(),
                parent_message_id: None,
            },
        )
        .await?;
        state.mode = Mode::InMessage;
    }

    // 5. Emit text content.
    if state.mode == Mode::InMessage {
        if let Some(delta) = &chunk.text_delta {
            emit(
                sink,
                RuntimeEvent::TextMessageContent {
                    message_id: state.current_message_id.clone(),
                    delta: delta.clone(),
                },
            )
            .await?;
        }
    }

    // 6. Emit argument deltas.
    if state.mode == Mode::InFunction {
        if let Some(args) = chunk.tool_call.as_ref().and_then(|t| t.arguments.as_ref()) {
            state.accumulated_args.push_str(args);
            emit(
                sink,
                RuntimeEvent::ActionExecutionArgs {
                    action_execution_id: state.current_tool_call_id.clone(),
                    args: args.clone(),
                },
            )
            .await?;
        }
    }

    Ok(())
}

/// Emit the group-closing event only; used on the chunk-error path where the
/// half-received tool call must not execute.
async fn close_open_group_without_execution(
    state: &mut PipelineState,
    sink: &mpsc::Sender<RuntimeEvent>,
) -> Result<(), PipelineError> {
    match state.mode {
        Mode::InMessage => {
            emit(
                sink,
                RuntimeEvent::TextMessageEnd {
                    message_id: state.current_message_id.clone(),
                },
            )
            .await?;
        }
        Mode::InFunction => {
            emit(
                sink,
                RuntimeEvent::ActionExecutionEnd {
                    action_execution_id: state.current_tool_call_id.clone(),
                },
            )
            .await?;
        }
        Mode::Idle => {}
    }
    state.mode = Mode::Idle;
    Ok(())
}

/// Close the open function group and, for a known server-side action, run the
/// tool-execution policy.
async fn close_function_group(
    state: &mut PipelineState,
    env: &PipelineEnv,
    sink: &mpsc::Sender<RuntimeEvent>,
    depth: u8,
) -> Result<(), PipelineError> {
    emit(
        sink,
        RuntimeEvent::ActionExecutionEnd {
            action_execution_id: state.current_tool_call_id.clone(),
        },
    )
    .await?;
    state.mode = Mode::Idle;

    let Some(action) = state.action.take() else {
        // Unknown action: the call streamed through transparently and the
        // client (or a remote peer) owns its execution.
        debug!(
            action = %state.current_action_name,
            "no server-side handler, passing through"
        );
        return Ok(());
    };

    let call_id = state.current_tool_call_id.clone();
    let action_name = state.current_action_name.clone();
    let raw_args = if state.accumulated_args.is_empty() {
        "{}".to_string()
    } else {
        std::mem::take(&mut state.accumulated_args)
    };

    let mut args: Value = match serde_json::from_str(&raw_args) {
        Ok(v) => v,
        Err(e) => {
            warn!(action = %action_name, error = %e, "action arguments unparsable");
            let encoded = encode_result(
                "",
                Some(&ErrorDetail::new(
                    "INVALID_ARGUMENTS",
                    "Failed to parse action arguments",
                )),
            );
            return emit_result(sink, &call_id, &action_name, encoded).await;
        }
    };

    // Remote agents: bind a result to the call id first, then hand the stream
    // over — the remote side keeps producing text and tool events.
    if let Some(remote) = &action.remote_agent_handler {
        emit_result(
            sink,
            &call_id,
            &action_name,
            format!("{action_name} agent started"),
        )
        .await?;
        match remote.start(args).await {
            Ok(mut events) => {
                while let Some(ev) = events.next().await {
                    emit(sink, ev).await?;
                }
            }
            Err(e) => {
                emit(
                    sink,
                    RuntimeEvent::Error {
                        code: "REMOTE_AGENT_ERROR".into(),
                        message: e.to_string(),
                    },
                )
                .await?;
            }
        }
        return Ok(());
    }

    let Some(handler) = &action.handler else {
        return Ok(());
    };

    // Approval gate.  An argument carrying the bypass flag was already
    // approved; strip the flag and execute directly.
    let bypassed = take_bypass_flag(&mut args);
    if env.approvals.is_gated(&action_name) && !bypassed {
        let result = match env.approvals.enqueue(
            &env.thread_id,
            &action_name,
            args,
            Arc::clone(handler),
        ) {
            Ok(ticket) => ticket.prompt,
            Err(e) => encode_result(
                "",
                Some(&ErrorDetail::new("APPROVAL_QUEUE_FULL", e.to_string())),
            ),
        };
        return emit_result(sink, &call_id, &action_name, result).await;
    }

    match handler.call(args).await {
        Ok(HandlerOutcome::Text(text)) => emit_result(sink, &call_id, &action_name, text).await,
        Ok(HandlerOutcome::Structured {
            content,
            tool_calls,
        }) => {
            emit_result(
                sink,
                &call_id,
                &action_name,
                content.clone().unwrap_or_default(),
            )
            .await?;
            if let Some(text) = content {
                let message_id = random_id();
                emit(
                    sink,
                    RuntimeEvent::TextMessageStart {
                        message_id: message_id.clone(),
                        parent_message_id: Some(call_id.clone()),
                    },
                )
                .await?;
                emit(
                    sink,
                    RuntimeEvent::TextMessageContent {
                        message_id: message_id.clone(),
                        delta: text,
                    },
                )
                .await?;
                emit(sink, RuntimeEvent::TextMessageEnd { message_id }).await?;
            }
            state.deferred.extend(tool_calls);
            Ok(())
        }
        Ok(HandlerOutcome::Stream(nested_chunks)) => {
            if depth >= MAX_PIPELINE_DEPTH {
                warn!(action = %action_name, depth, "nested pipeline depth limit reached");
            } else {
                run_at_depth(nested_chunks, env, sink, depth + 1).await?;
            }
            emit_result(sink, &call_id, &action_name, "Sending a message".to_string()).await
        }
        Err(e) => {
            warn!(action = %action_name, error = %e, "action handler failed");
            let encoded = encode_result(
                "",
                Some(&ErrorDetail::new("HANDLER_ERROR", e.to_string())),
            );
            emit_result(sink, &call_id, &action_name, encoded).await
        }
    }
}

async fn emit_result(
    sink: &mpsc::Sender<RuntimeEvent>,
    call_id: &str,
    action_name: &str,
    result: String,
) -> Result<(), PipelineError> {
    emit(
        sink,
        RuntimeEvent::ActionExecutionResult {
            action_execution_id: call_id.to_string(),
            action_name: action_name.to_string(),
            result,
        },
    )
    .await
}

async fn emit(
    sink: &mpsc::Sender<RuntimeEvent>,
    event: RuntimeEvent,
) -> Result<(), PipelineError> {
    sink.send(event).await.map_err(|_| PipelineError::SinkClosed)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;
    use skiff_actions::{handler_fn, ApprovalStrategy};

    fn env_with(actions: Vec<Action>) -> PipelineEnv {
        PipelineEnv {
            server_actions: actions
                .into_iter()
                .map(|a| (a.name.clone(), Arc::new(a)))
                .collect(),
            approvals: Arc::new(ApprovalManager::disabled()),
            thread_id: "th-test".into(),
        }
    }

    fn chunk_stream(chunks: Vec<StreamChunk>) -> ChunkStream {
        Box::pin(stream::iter(chunks.into_iter().map(Ok)))
    }

    async fn collect_events(chunks: Vec<StreamChunk>, env: &PipelineEnv) -> Vec<RuntimeEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        run_pipeline(chunk_stream(chunks), env, &tx).await.unwrap();
        drop(tx);
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    fn assert_group_balance(events: &[RuntimeEvent]) {
        let starts = events
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::TextMessageStart { .. }))
            .count();
        let ends = events
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::TextMessageEnd { .. }))
            .count();
        assert_eq!(starts, ends, "text groups unbalanced: {events:?}");
        let astarts = events
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::ActionExecutionStart { .. }))
            .count();
        let aends = events
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::ActionExecutionEnd { .. }))
            .count();
        assert_eq!(astarts, aends, "action groups unbalanced: {events:?}");
    }

    // ── Scenario: plain reply ─────────────────────────────────────────────────

    #[tokio::test]
    async fn plain_reply_emits_one_balanced_text_group() {
        let env = env_with(vec![]);
        let events = collect_events(
            vec![
                StreamChunk::text("m1", "Hi"),
                StreamChunk::text("m1", " there!"),
                StreamChunk::finish("m1", "stop"),
            ],
            &env,
        )
        .await;

        assert_eq!(
            events,
            vec![
                RuntimeEvent::TextMessageStart {
                    message_id: "m1".into(),
                    parent_message_id: None
                },
                RuntimeEvent::TextMessageContent {
                    message_id: "m1".into(),
                    delta: "Hi".into()
                },
                RuntimeEvent::TextMessageContent {
                    message_id: "m1".into(),
                    delta: " there!".into()
                },
                RuntimeEvent::TextMessageEnd {
                    message_id: "m1".into()
                },
            ]
        );
    }

    // ── Scenario: message → function mode switch ─────────────────────────────

    #[tokio::test]
    async fn message_to_function_switch_closes_text_group_first() {
        let env = env_with(vec![]);
        let events = collect_events(
            vec![
                StreamChunk::text("m1", "Sure,"),
                StreamChunk::tool_start("m1", "t1", "get_weather"),
                StreamChunk::tool_args("m1", "{\"city\":"),
                StreamChunk::tool_args("m1", "\"SF\"}"),
                StreamChunk::finish("m1", "tool_calls"),
            ],
            &env,
        )
        .await;

        assert_eq!(
            events,
            vec![
                RuntimeEvent::TextMessageStart {
                    message_id: "m1".into(),
                    parent_message_id: None
                },
                RuntimeEvent::TextMessageContent {
                    message_id: "m1".into(),
                    delta: "Sure,".into()
                },
                RuntimeEvent::TextMessageEnd {
                    message_id: "m1".into()
                },
                RuntimeEvent::ActionExecutionStart {
                    action_execution_id: "t1".into(),
                    action_name: "get_weather".into(),
                    parent_message_id: Some("m1".into())
                },
                RuntimeEvent::ActionExecutionArgs {
                    action_execution_id: "t1".into(),
                    args: "{\"city\":".into()
                },
                RuntimeEvent::ActionExecutionArgs {
                    action_execution_id: "t1".into(),
                    args: "\"SF\"}".into()
                },
                RuntimeEvent::ActionExecutionEnd {
                    action_execution_id: "t1".into()
                },
            ]
        );
    }

    // ── Scenario: server-side execution ──────────────────────────────────────

    #[tokio::test]
    async fn server_side_handler_result_follows_group_end() {
        let action = Action::new("get_weather", "").with_handler(handler_fn(|args| async move {
            let city = args["city"].as_str().unwrap_or("?").to_string();
            Ok(HandlerOutcome::Text(format!("72F in {city}")))
        }));
        let env = env_with(vec![action]);
        let events = collect_events(
            vec![
                StreamChunk::tool_start("m1", "t1", "get_weather"),
                StreamChunk::tool_args("m1", "{\"city\":\"SF\"}"),
                StreamChunk::finish("m1", "tool_calls"),
            ],
            &env,
        )
        .await;

        assert_group_balance(&events);
        assert_eq!(
            events.last(),
            Some(&RuntimeEvent::ActionExecutionResult {
                action_execution_id: "t1".into(),
                action_name: "get_weather".into(),
                result: "72F in SF".into(),
            })
        );
    }

    // ── Scenario: invalid arguments ──────────────────────────────────────────

    #[tokio::test]
    async fn invalid_arguments_produce_encoded_error_result() {
        let action = Action::new("get_weather", "")
            .with_handler(handler_fn(|_| async { Ok(HandlerOutcome::Text("unreachable".into())) }));
        let env = env_with(vec![action]);
        let events = collect_events(
            vec![
                StreamChunk::tool_start("m1", "t1", "get_weather"),
                StreamChunk::tool_args("m1", "{not json"),
                StreamChunk::finish("m1", "tool_calls"),
            ],
            &env,
        )
        .await;

        let Some(RuntimeEvent::ActionExecutionResult { result, .. }) = events.last() else {
            panic!("expected result event, got {events:?}");
        };
        let (_, error) = skiff_model::decode_result(result);
        assert_eq!(error.unwrap().code, "INVALID_ARGUMENTS");
    }

    // ── Unknown action streams through transparently ─────────────────────────

    #[tokio::test]
    async fn unknown_action_passes_through_without_result() {
        let env = env_with(vec![]);
        let events = collect_events(
            vec![
                StreamChunk::tool_start("m1", "t1", "client_side_tool"),
                StreamChunk::tool_args("m1", "{}"),
                StreamChunk::finish("m1", "tool_calls"),
            ],
            &env,
        )
        .await;

        assert_group_balance(&events);
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, RuntimeEvent::ActionExecutionResult { .. })),
            "runtime must not execute a handler it does not know"
        );
    }

    // ── Handler failure ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn handler_error_is_encoded_and_stream_continues() {
        let action = Action::new("boom", "")
            .with_handler(handler_fn(|_| async { anyhow::bail!("kaput") }));
        let env = env_with(vec![action]);
        let events = collect_events(
            vec![
                StreamChunk::tool_start("m1", "t1", "boom"),
                StreamChunk::tool_args("m1", "{}"),
                // Text after the failing call keeps streaming.
                StreamChunk::text("m2", "anyway"),
                StreamChunk::finish("m2", "stop"),
            ],
            &env,
        )
        .await;

        assert_group_balance(&events);
        let result = events
            .iter()
            .find_map(|e| match e {
                RuntimeEvent::ActionExecutionResult { result, .. } => Some(result.clone()),
                _ => None,
            })
            .expect("handler error must yield a result event");
        let (_, error) = skiff_model::decode_result(&result);
        assert_eq!(error.unwrap().code, "HANDLER_ERROR");
        assert!(events
            .iter()
            .any(|e| matches!(e, RuntimeEvent::TextMessageContent { delta, .. } if delta == "anyway")));
    }

    // ── Consecutive tool calls (different ids) ───────────────────────────────

    #[tokio::test]
    async fn second_tool_call_id_closes_the_first_group() {
        let env = env_with(vec![]);
        let events = collect_events(
            vec![
                StreamChunk::tool_start("m1", "t1", "first"),
                StreamChunk::tool_args("m1", "{}"),
                StreamChunk::tool_start("m1", "t2", "second"),
                StreamChunk::tool_args("m1", "{}"),
                StreamChunk::finish("m1", "tool_calls"),
            ],
            &env,
        )
        .await;

        assert_group_balance(&events);
        // Non-overlap: first group must be closed before the second opens.
        let end_t1 = events
            .iter()
            .position(|e| matches!(e, RuntimeEvent::ActionExecutionEnd { action_execution_id } if action_execution_id == "t1"))
            .unwrap();
        let start_t2 = events
            .iter()
            .position(|e| matches!(e, RuntimeEvent::ActionExecutionStart { action_execution_id, .. } if action_execution_id == "t2"))
            .unwrap();
        assert!(end_t1 < start_t2);
    }

    // ── Gated action ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn gated_action_parks_and_prompts_instead_of_executing() {
        let action = Action::new("delete_file", "")
            .with_handler(handler_fn(|_| async { Ok(HandlerOutcome::Text("deleted".into())) }));
        let approvals = Arc::new(ApprovalManager::new(
            vec!["delete_file".into()],
            10,
            ApprovalStrategy::Queue,
        ));
        let env = PipelineEnv {
            server_actions: [(action.name.clone(), Arc::new(action))].into_iter().collect(),
            approvals: Arc::clone(&approvals),
            thread_id: "th".into(),
        };
        let events = collect_events(
            vec![
                StreamChunk::tool_start("m1", "t1", "delete_file"),
                StreamChunk::tool_args("m1", "{\"path\":\"/tmp/x\"}"),
                StreamChunk::finish("m1", "tool_calls"),
            ],
            &env,
        )
        .await;

        let Some(RuntimeEvent::ActionExecutionResult { result, .. }) = events.last() else {
            panic!("expected result event");
        };
        assert!(result.contains("requires approval"), "got: {result}");
        assert_eq!(approvals.pending_count(), 1);
    }

    #[tokio::test]
    async fn bypass_flag_skips_the_gate() {
        let action = Action::new("delete_file", "")
            .with_handler(handler_fn(|_| async { Ok(HandlerOutcome::Text("deleted".into())) }));
        let approvals = Arc::new(ApprovalManager::new(
            vec!["delete_file".into()],
            10,
            ApprovalStrategy::Queue,
        ));
        let env = PipelineEnv {
            server_actions: [(action.name.clone(), Arc::new(action))].into_iter().collect(),
            approvals: Arc::clone(&approvals),
            thread_id: "th".into(),
        };
        let args = json!({"path": "/tmp/x", skiff_actions::APPROVAL_BYPASS_FLAG: true}).to_string();
        let events = collect_events(
            vec![
                StreamChunk::tool_start("m1", "t1", "delete_file"),
                StreamChunk::tool_args("m1", args.as_str()),
                StreamChunk::finish("m1", "tool_calls"),
            ],
            &env,
        )
        .await;

        let Some(RuntimeEvent::ActionExecutionResult { result, .. }) = events.last() else {
            panic!("expected result event");
        };
        assert_eq!(result, "deleted");
        assert_eq!(approvals.pending_count(), 0);
    }

    // ── Structured outcome ───────────────────────────────────────────────────

    #[tokio::test]
    async fn structured_outcome_emits_synthetic_message_and_deferred_calls() {
        let action = Action::new("plan", "").with_handler(handler_fn(|_| async {
            Ok(HandlerOutcome::Structured {
                content: Some("planning done".into()),
                tool_calls: vec![NestedToolCall {
                    name: "execute_step".into(),
                    arguments: json!({"step": 1}),
                }],
            })
        }));
        let env = env_with(vec![action]);
        let events = collect_events(
            vec![
                StreamChunk::tool_start("m1", "t1", "plan"),
                StreamChunk::tool_args("m1", "{}"),
                StreamChunk::finish("m1", "tool_calls"),
            ],
            &env,
        )
        .await;

        assert_group_balance(&events);
        assert!(events
            .iter()
            .any(|e| matches!(e, RuntimeEvent::TextMessageContent { delta, .. } if delta == "planning done")));
        // The nested call group appears after the primary stream's events.
        let nested_start = events.iter().position(|e| {
            matches!(e, RuntimeEvent::ActionExecutionStart { action_name, .. } if action_name == "execute_step")
        });
        assert!(nested_start.is_some(), "deferred call must be replayed");
    }

    // ── Streaming handler ────────────────────────────────────────────────────

    #[tokio::test]
    async fn streaming_handler_runs_nested_pipeline_then_sentinel_result() {
        let action = Action::new("delegate", "").with_handler(handler_fn(|_| async {
            let nested: ChunkStream = Box::pin(stream::iter(
                vec![
                    StreamChunk::text("n1", "nested hello"),
                    StreamChunk::finish("n1", "stop"),
                ]
                .into_iter()
                .map(Ok),
            ));
            Ok(HandlerOutcome::Stream(nested))
        }));
        let env = env_with(vec![action]);
        let events = collect_events(
            vec![
                StreamChunk::tool_start("m1", "t1", "delegate"),
                StreamChunk::tool_args("m1", "{}"),
                StreamChunk::finish("m1", "tool_calls"),
            ],
            &env,
        )
        .await;

        assert_group_balance(&events);
        assert!(events
            .iter()
            .any(|e| matches!(e, RuntimeEvent::TextMessageContent { delta, .. } if delta == "nested hello")));
        assert_eq!(
            events.last(),
            Some(&RuntimeEvent::ActionExecutionResult {
                action_execution_id: "t1".into(),
                action_name: "delegate".into(),
                result: "Sending a message".into(),
            })
        );
    }

    // ── Remote agent handler ─────────────────────────────────────────────────

    #[tokio::test]
    async fn remote_agent_result_precedes_forwarded_events() {
        use skiff_model::EventStream;

        struct FakeRemote;

        #[async_trait::async_trait]
        impl skiff_actions::RemoteAgentHandler for FakeRemote {
            async fn start(&self, _args: Value) -> anyhow::Result<EventStream> {
                Ok(Box::pin(stream::iter(vec![
                    RuntimeEvent::TextMessageStart {
                        message_id: "r1".into(),
                        parent_message_id: None,
                    },
                    RuntimeEvent::TextMessageContent {
                        message_id: "r1".into(),
                        delta: "remote says hi".into(),
                    },
                    RuntimeEvent::TextMessageEnd {
                        message_id: "r1".into(),
                    },
                ])))
            }
        }

        let action = Action::new("research", "").with_remote_agent(Arc::new(FakeRemote));
        let env = env_with(vec![action]);
        let events = collect_events(
            vec![
                StreamChunk::tool_start("m1", "t1", "research"),
                StreamChunk::tool_args("m1", "{}"),
                StreamChunk::finish("m1", "tool_calls"),
            ],
            &env,
        )
        .await;

        let result_pos = events
            .iter()
            .position(|e| matches!(e, RuntimeEvent::ActionExecutionResult { result, .. } if result == "research agent started"))
            .expect("remote result must be bound to the call id");
        let remote_text_pos = events
            .iter()
            .position(|e| matches!(e, RuntimeEvent::TextMessageContent { delta, .. } if delta == "remote says hi"))
            .expect("remote events must be forwarded");
        assert!(result_pos < remote_text_pos);
    }

    // ── Error chunk mid-stream ───────────────────────────────────────────────

    #[tokio::test]
    async fn provider_error_closes_open_group_and_emits_error_event() {
        let env = env_with(vec![]);
        let chunks: ChunkStream = Box::pin(stream::iter(vec![
            Ok(StreamChunk::text("m1", "partial")),
            Err(anyhow::anyhow!("connection reset")),
        ]));
        let (tx, mut rx) = mpsc::channel(64);
        run_pipeline(chunks, &env, &tx).await.unwrap();
        drop(tx);
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }

        assert_group_balance(&events);
        assert!(matches!(
            events.last(),
            Some(RuntimeEvent::Error { code, .. }) if code == "PROVIDER_ERROR"
        ));
    }

    // ── Empty stream ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn zero_chunks_emit_zero_events() {
        let env = env_with(vec![]);
        let events = collect_events(vec![], &env).await;
        assert!(events.is_empty());
    }

    // ── Sink closed ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn closed_sink_stops_consumption() {
        let env = env_with(vec![]);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = run_pipeline(
            chunk_stream(vec![StreamChunk::text("m1", "hi")]),
            &env,
            &tx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::SinkClosed));
    }
}
