// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Server-side actions: handler traits, the registry, and the approval gate.

mod action;
mod approval;
mod registry;

pub use action::{
    handler_fn, Action, ActionHandler, HandlerOutcome, NestedToolCall, RemoteAgentHandler,
};
pub use approval::{
    decision_action, take_bypass_flag, ApprovalError, ApprovalManager, ApprovalOutcome,
    ApprovalStatus, ApprovalStrategy, GateTicket, PendingSummary, APPROVAL_BYPASS_FLAG,
};
pub use registry::ActionRegistry;
