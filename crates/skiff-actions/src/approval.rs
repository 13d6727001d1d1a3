// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Gate for tool executions that need an explicit decision.
//!
//! A gated call is parked in a bounded in-memory map and the model's reply
//! carries a prompt telling the user how to decide it.  Entries have no TTL:
//! they leave the map only through a decision, a cancellation, or by the
//! enqueue being rejected at capacity.  Each entry is consumed exactly once.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::action::{handler_fn, Action, ActionHandler, HandlerOutcome};
use skiff_model::{random_id, Parameter, ParameterType};

/// Argument key that marks a call as already approved.  The gate strips the
/// flag and lets the call through so an approved re-invocation is never
/// re-queued.
pub const APPROVAL_BYPASS_FLAG: &str = "__approval_bypass";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStrategy {
    /// Decisions arrive through the approvals HTTP endpoint.
    Queue,
    /// Decisions may also arrive as a y/n reply in the conversation, resolved
    /// by the built-in decision action.
    Conversational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    ApprovedAndExecuted,
    ApprovedButFailed,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    #[serde(rename = "approvalId")]
    pub approval_id: String,
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval queue is full (capacity {0})")]
    Full(usize),
    #[error("no pending approval with id {0}")]
    NotFound(String),
}

/// One parked tool call awaiting a decision.
struct PendingCall {
    thread_id: String,
    action_name: String,
    arguments: Value,
    handler: Arc<dyn ActionHandler>,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Wire-facing view of a pending entry (no handler).
#[derive(Debug, Clone, Serialize)]
pub struct PendingSummary {
    #[serde(rename = "approvalId")]
    pub approval_id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    #[serde(rename = "actionName")]
    pub action_name: String,
    pub arguments: Value,
    #[serde(rename = "createdAt")]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A freshly parked call: the id plus the user-facing prompt the runtime
/// emits as the tool result.
#[derive(Debug, Clone)]
pub struct GateTicket {
    pub approval_id: String,
    pub prompt: String,
}

/// Process-wide approval state.  Constructed explicitly at startup and passed
/// by reference — there is no ambient singleton.
pub struct ApprovalManager {
    gated: HashSet<String>,
    capacity: usize,
    strategy: ApprovalStrategy,
    pending: Mutex<HashMap<String, PendingCall>>,
}

impl ApprovalManager {
    pub fn new(gated: Vec<String>, capacity: usize, strategy: ApprovalStrategy) -> Self {
        Self {
            gated: gated.into_iter().collect(),
            capacity,
            strategy,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// A manager that gates nothing; every call passes straight through.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), 0, ApprovalStrategy::Queue)
    }

    pub fn strategy(&self) -> ApprovalStrategy {
        self.strategy
    }

    pub fn is_gated(&self, action_name: &str) -> bool {
        self.gated.contains(action_name)
    }

    /// Park a gated call.  Fails fast when the queue is at capacity.
    pub fn enqueue(
        &self,
        thread_id: &str,
        action_name: &str,
        arguments: Value,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<GateTicket, ApprovalError> {
        let mut pending = self.pending.lock().expect("approval map poisoned");
        if pending.len() >= self.capacity {
            warn!(
                action = action_name,
                capacity = self.capacity,
                "approval queue full, rejecting"
            );
            return Err(ApprovalError::Full(self.capacity));
        }
        let approval_id = random_id();
        let prompt = self.prompt_text(&approval_id, action_name, &arguments);
        pending.insert(
            approval_id.clone(),
            PendingCall {
                thread_id: thread_id.to_string(),
                action_name: action_name.to_string(),
                arguments,
                handler,
                created_at: chrono::Utc::now(),
            },
        );
        info!(approval_id = %approval_id, action = action_name, "tool call parked for approval");
        Ok(GateTicket {
            approval_id,
            prompt,
        })
    }

    fn prompt_text(&self, approval_id: &str, action_name: &str, arguments: &Value) -> String {
        let base = format!(
            "Tool call requires approval.\n\
             Tool: {action_name}\n\
             Arguments: {arguments}\n\
             Approval id: {approval_id}\n\
             Decide via POST /api/approvals/decide with {{\"approvalId\": \"{approval_id}\", \"approved\": true|false}}."
        );
        match self.strategy {
            ApprovalStrategy::Queue => base,
            ApprovalStrategy::Conversational => {
                format!("{base}\nOr reply 'y' to approve or 'n' to reject.")
            }
        }
    }

    /// Resolve one pending entry.  The entry is removed before the handler
    /// runs, so a second decision for the same id reports `NotFound`.
    pub async fn decide(
        &self,
        approval_id: &str,
        approved: bool,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        let call = self
            .pending
            .lock()
            .expect("approval map poisoned")
            .remove(approval_id)
            .ok_or_else(|| ApprovalError::NotFound(approval_id.to_string()))?;

        if !approved {
            info!(approval_id, action = %call.action_name, "tool call rejected");
            return Ok(ApprovalOutcome {
                approval_id: approval_id.to_string(),
                status: ApprovalStatus::Rejected,
                result: Some(format!("Tool call '{}' was rejected.", call.action_name)),
                error: None,
            });
        }

        match call.handler.call(call.arguments).await {
            Ok(outcome) => Ok(ApprovalOutcome {
                approval_id: approval_id.to_string(),
                status: ApprovalStatus::ApprovedAndExecuted,
                result: Some(flatten_outcome(outcome)),
                error: None,
            }),
            Err(e) => {
                warn!(approval_id, action = %call.action_name, error = %e, "approved tool call failed");
                Ok(ApprovalOutcome {
                    approval_id: approval_id.to_string(),
                    status: ApprovalStatus::ApprovedButFailed,
                    result: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Remove a pending entry without running its handler.
    pub fn cancel(&self, approval_id: &str) -> Result<(), ApprovalError> {
        self.pending
            .lock()
            .expect("approval map poisoned")
            .remove(approval_id)
            .map(|call| {
                info!(approval_id, action = %call.action_name, "pending approval cancelled");
            })
            .ok_or_else(|| ApprovalError::NotFound(approval_id.to_string()))
    }

    pub fn pending(&self) -> Vec<PendingSummary> {
        let mut entries: Vec<PendingSummary> = self
            .pending
            .lock()
            .expect("approval map poisoned")
            .iter()
            .map(|(id, call)| PendingSummary {
                approval_id: id.clone(),
                thread_id: call.thread_id.clone(),
                action_name: call.action_name.clone(),
                arguments: call.arguments.clone(),
                created_at: call.created_at,
            })
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        entries
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("approval map poisoned").len()
    }

    /// Resolve a decision phrased in natural language.
    ///
    /// `partial_id` narrows the target by id prefix; without it the most
    /// recent pending entry is decided.  Returns the user-facing reply text.
    pub async fn decide_conversational(
        &self,
        decision: &str,
        partial_id: Option<&str>,
    ) -> String {
        let decision = decision.trim().to_lowercase();
        let approved = match decision.as_str() {
            "y" | "yes" => true,
            "n" | "no" => false,
            "" => return "Please reply 'y' to approve or 'n' to reject.".to_string(),
            other => {
                return format!("Unrecognized decision '{other}'. Reply 'y' or 'n'.");
            }
        };

        let target_id = {
            let pending = self.pending.lock().expect("approval map poisoned");
            if pending.is_empty() {
                return "There are no pending tool calls to decide.".to_string();
            }
            match partial_id {
                Some(prefix) => pending.keys().find(|id| id.starts_with(prefix)).cloned(),
                None => pending
                    .iter()
                    .max_by_key(|(_, call)| call.created_at)
                    .map(|(id, _)| id.clone()),
            }
        };

        let Some(id) = target_id else {
            return match partial_id {
                Some(p) => format!("No pending approval matches id prefix '{p}'."),
                None => "There are no pending tool calls to decide.".to_string(),
            };
        };

        match self.decide(&id, approved).await {
            Ok(outcome) => match outcome.status {
                ApprovalStatus::ApprovedAndExecuted => format!(
                    "Approved and executed.\nResult:\n{}",
                    outcome.result.unwrap_or_default()
                ),
                ApprovalStatus::ApprovedButFailed => format!(
                    "Approved, but execution failed: {}",
                    outcome.error.unwrap_or_default()
                ),
                ApprovalStatus::Rejected => outcome.result.unwrap_or_default(),
                ApprovalStatus::Cancelled => "The pending call was cancelled.".to_string(),
            },
            Err(e) => e.to_string(),
        }
    }
}

fn flatten_outcome(outcome: HandlerOutcome) -> String {
    match outcome {
        HandlerOutcome::Text(t) => t,
        HandlerOutcome::Structured { content, .. } => content.unwrap_or_default(),
        HandlerOutcome::Stream(_) => "[streaming result started]".to_string(),
    }
}

/// The built-in decision action for the conversational strategy.
///
/// Registered as an ordinary server-side action so the model can route the
/// user's y/n reply back into the pending queue.
pub fn decision_action(manager: Arc<ApprovalManager>) -> Action {
    Action::new(
        "approve_tool_call",
        "Approve or reject the pending tool call. Call this when the user \
         answers an approval prompt with yes/no.",
    )
    .with_parameters(vec![
        Parameter::new("decision", ParameterType::String)
            .with_description("The user's decision: 'y'/'yes' or 'n'/'no'."),
        Parameter::new("approval_id", ParameterType::String)
            .with_description("Optional approval id (or prefix) identifying the pending call.")
            .optional(),
    ])
    .with_handler(handler_fn(move |args| {
        let manager = Arc::clone(&manager);
        async move {
            let decision = args["decision"].as_str().unwrap_or_default().to_string();
            let partial = args["approval_id"].as_str().map(|s| s.to_string());
            let reply = manager
                .decide_conversational(&decision, partial.as_deref())
                .await;
            Ok(HandlerOutcome::Text(reply))
        }
    }))
}

/// Strip the bypass flag from `args`, reporting whether it was set.
pub fn take_bypass_flag(args: &mut Value) -> bool {
    match args.as_object_mut() {
        Some(map) => map
            .remove(APPROVAL_BYPASS_FLAG)
            .map(|v| v.as_bool().unwrap_or(true))
            .unwrap_or(false),
        None => false,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
