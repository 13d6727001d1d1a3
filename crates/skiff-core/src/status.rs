// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Serialize;

/// Closed set of terminal request outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Success,
    GuardrailsValidationFailure,
    MessageStreamInterrupted,
    ActionExecutionFailed,
    InvalidArguments,
    UnknownError,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::GuardrailsValidationFailure => "guardrails_validation_failure",
            Self::MessageStreamInterrupted => "message_stream_interrupted",
            Self::ActionExecutionFailed => "action_execution_failed",
            Self::InvalidArguments => "invalid_arguments",
            Self::UnknownError => "unknown_error",
        }
    }
}

/// Terminal status of one request, with an optional human-readable reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseStatus {
    pub code: StatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ResponseStatus {
    pub fn success() -> Self {
        Self {
            code: StatusCode::Success,
            reason: None,
        }
    }

    pub fn failed(code: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_has_no_reason() {
        let s = ResponseStatus::success();
        assert!(s.is_success());
        assert!(s.reason.is_none());
    }

    #[test]
    fn serializes_snake_case_code() {
        let s = ResponseStatus::failed(StatusCode::GuardrailsValidationFailure, "topic blocked");
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["code"], "guardrails_validation_failure");
        assert_eq!(json["reason"], "topic blocked");
    }

    #[test]
    fn as_str_matches_serde_form() {
        let json = serde_json::to_value(StatusCode::MessageStreamInterrupted).unwrap();
        assert_eq!(json, StatusCode::MessageStreamInterrupted.as_str());
    }
}
