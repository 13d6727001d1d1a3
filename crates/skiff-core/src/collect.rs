// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

use skiff_model::{ids::result_message_id, Message, Role, RuntimeEvent};

/// Folds the per-request event sequence back into fully-formed messages.
///
/// Text deltas between a Start/End pair concatenate into one assistant
/// message; an action-execution group becomes one `ActionExecution`; each
/// result event becomes a `Result`.  Used for the non-streaming response body
/// and for resolving the output-messages promise.
#[derive(Default)]
pub struct MessageCollector {
    messages: Vec<Message>,
    open_text: Option<OpenText>,
    open_action: Option<OpenAction>,
}

struct OpenText {
    id: String,
    parent_id: Option<String>,
    content: String,
}

struct OpenAction {
    id: String,
    name: String,
    parent_id: Option<String>,
    args: String,
}

impl MessageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &RuntimeEvent) {
        match event {
            RuntimeEvent::TextMessageStart {
                message_id,
                parent_message_id,
            } => {
                self.open_text = Some(OpenText {
                    id: message_id.clone(),
                    parent_id: parent_message_id.clone(),
                    content: String::new(),
                });
            }
            RuntimeEvent::TextMessageContent { message_id, delta } => {
                if let Some(open) = self.open_text.as_mut() {
                    if open.id == *message_id {
                        open.content.push_str(delta);
                    }
                }
            }
            RuntimeEvent::TextMessageEnd { message_id } => {
                if let Some(open) = self.open_text.take() {
                    if open.id == *message_id {
                        self.messages.push(Message::Text {
                            id: open.id,
                            role: Role::Assistant,
                            content: open.content,
                            parent_id: open.parent_id,
                        });
                    }
                }
            }
            RuntimeEvent::ActionExecutionStart {
                action_execution_id,
                action_name,
                parent_message_id,
            } => {
                self.open_action = Some(OpenAction {
                    id: action_execution_id.clone(),
                    name: action_name.clone(),
                    parent_id: parent_message_id.clone(),
                    args: String::new(),
                });
            }
            RuntimeEvent::ActionExecutionArgs {
                action_execution_id,
                args,
            } => {
                if let Some(open) = self.open_action.as_mut() {
                    if open.id == *action_execution_id {
                        open.args.push_str(args);
                    }
                }
            }
            RuntimeEvent::ActionExecutionEnd {
                action_execution_id,
            } => {
                if let Some(open) = self.open_action.take() {
                    if open.id == *action_execution_id {
                        let arguments: Value = if open.args.is_empty() {
                            Value::Object(Default::default())
                        } else {
                            serde_json::from_str(&open.args).unwrap_or(Value::String(open.args))
                        };
                        self.messages.push(Message::ActionExecution {
                            id: open.id,
                            name: open.name,
                            arguments,
                            parent_id: open.parent_id,
                        });
                    }
                }
            }
            RuntimeEvent::ActionExecutionResult {
                action_execution_id,
                action_name,
                result,
            } => {
                self.messages.push(Message::Result {
                    id: result_message_id(action_execution_id),
                    action_execution_id: action_execution_id.clone(),
                    action_name: action_name.clone(),
                    result: result.clone(),
                });
            }
            RuntimeEvent::AgentStateMessage {
                thread_id,
                agent_name,
                node_name,
                run_id,
                active,
                running,
                state,
            } => {
                self.messages.push(Message::AgentState {
                    id: skiff_model::random_id(),
                    thread_id: thread_id.clone(),
                    agent_name: agent_name.clone(),
                    node_name: node_name.clone(),
                    run_id: run_id.clone(),
                    active: *active,
                    running: *running,
                    state: state.clone(),
                });
            }
            RuntimeEvent::Meta { .. } | RuntimeEvent::Error { .. } => {}
        }
    }

    /// Close out and return the collected messages.
    pub fn finish(self) -> Vec<Message> {
        self.messages
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
