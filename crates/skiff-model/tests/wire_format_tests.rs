// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider wire-format tests: what actually goes over the HTTP boundary.
//!
//! These exercise the request-body builder through the public surface of the
//! crate (message list in, JSON payload out) without any network access.

use serde_json::{json, Value};

use skiff_model::{
    filter_orphan_results, ActionInput, ForwardedParameters, Message, Parameter, ParameterType,
    Role, ToolChoice,
};

// The builder is crate-private; replicate a call through a thin shim that the
// crate exposes for its own integration tests.
fn build_body(
    messages: Vec<Message>,
    actions: &[ActionInput],
    forwarded: Option<&ForwardedParameters>,
) -> Value {
    skiff_model::testing::build_request_body_for_tests(messages, actions, forwarded)
}

fn weather_action() -> ActionInput {
    ActionInput {
        name: "get_weather".into(),
        description: "Look up the weather".into(),
        parameters: vec![Parameter::new("city", ParameterType::String)],
        availability: Default::default(),
    }
}

#[test]
fn plain_text_message_serialized_with_role_and_content() {
    let body = build_body(vec![Message::user("hello world")], &[], None);
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "hello world");
    assert_eq!(body["stream"], true);
}

#[test]
fn developer_role_is_rewritten_to_system() {
    let msg = Message::Text {
        id: "m1".into(),
        role: Role::Developer,
        content: "house rules".into(),
        parent_id: None,
    };
    let body = build_body(vec![msg], &[], None);
    assert_eq!(body["messages"][0]["role"], "system");
}

#[test]
fn action_execution_becomes_assistant_tool_call() {
    let msg = Message::ActionExecution {
        id: "t1".into(),
        name: "get_weather".into(),
        arguments: json!({"city": "SF"}),
        parent_id: None,
    };
    let body = build_body(vec![msg], &[], None);
    let wire = &body["messages"][0];
    assert_eq!(wire["role"], "assistant");
    assert_eq!(wire["content"], Value::Null);
    assert_eq!(wire["tool_calls"][0]["id"], "t1");
    assert_eq!(wire["tool_calls"][0]["type"], "function");
    assert_eq!(wire["tool_calls"][0]["function"]["name"], "get_weather");
    // Arguments are serialized as a JSON string, not an object.
    let args: Value =
        serde_json::from_str(wire["tool_calls"][0]["function"]["arguments"].as_str().unwrap())
            .unwrap();
    assert_eq!(args["city"], "SF");
}

#[test]
fn result_becomes_tool_role_with_call_id() {
    let msgs = vec![
        Message::ActionExecution {
            id: "t1".into(),
            name: "get_weather".into(),
            arguments: json!({}),
            parent_id: None,
        },
        Message::Result {
            id: "result-t1".into(),
            action_execution_id: "t1".into(),
            action_name: "get_weather".into(),
            result: "72F".into(),
        },
    ];
    let body = build_body(msgs, &[], None);
    let tool_msg = &body["messages"][1];
    assert_eq!(tool_msg["role"], "tool");
    assert_eq!(tool_msg["tool_call_id"], "t1");
    assert_eq!(tool_msg["content"], "72F");
}

#[test]
fn image_becomes_data_url_content_block() {
    let msg = Message::Image {
        id: "i1".into(),
        role: Role::User,
        format: "png".into(),
        bytes: "iVBORw0KGgo=".into(),
    };
    let body = build_body(vec![msg], &[], None);
    let content = &body["messages"][0]["content"];
    assert_eq!(content[0]["type"], "image_url");
    assert_eq!(
        content[0]["image_url"]["url"],
        "data:image/png;base64,iVBORw0KGgo="
    );
}

#[test]
fn orphan_result_never_reaches_the_wire() {
    let msgs = vec![
        Message::user("Run it"),
        Message::Result {
            id: "r1".into(),
            action_execution_id: "nonexistent".into(),
            action_name: "f".into(),
            result: "x".into(),
        },
    ];
    let body = build_body(msgs, &[], None);
    let wire_messages = body["messages"].as_array().unwrap();
    assert_eq!(wire_messages.len(), 1, "orphan result must be dropped");
    assert_eq!(wire_messages[0]["role"], "user");
}

#[test]
fn agent_state_messages_are_not_forwarded() {
    let msgs = vec![
        Message::user("hi"),
        Message::AgentState {
            id: "a1".into(),
            thread_id: "th".into(),
            agent_name: "planner".into(),
            node_name: "start".into(),
            run_id: "r".into(),
            active: true,
            running: true,
            state: json!({}),
        },
    ];
    let body = build_body(msgs, &[], None);
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
}

#[test]
fn tools_block_uses_function_schema() {
    let body = build_body(vec![Message::user("hi")], &[weather_action()], None);
    let tool = &body["tools"][0];
    assert_eq!(tool["type"], "function");
    assert_eq!(tool["function"]["name"], "get_weather");
    assert_eq!(tool["function"]["parameters"]["type"], "object");
    assert_eq!(
        tool["function"]["parameters"]["properties"]["city"]["type"],
        "string"
    );
    assert_eq!(tool["function"]["parameters"]["required"], json!(["city"]));
}

#[test]
fn action_without_parameters_still_sends_object_schema() {
    let action = ActionInput::new("ping", "liveness probe");
    let body = build_body(vec![Message::user("hi")], &[action], None);
    let params = &body["tools"][0]["function"]["parameters"];
    assert_eq!(params["type"], "object");
    assert_eq!(params["properties"], json!({}));
    assert_eq!(params["required"], json!([]));
}

#[test]
fn no_actions_means_no_tools_key() {
    let body = build_body(vec![Message::user("hi")], &[], None);
    assert!(body.get("tools").is_none());
}

#[test]
fn temperature_is_clamped_to_provider_range() {
    let fp = ForwardedParameters {
        temperature: Some(5.0),
        ..Default::default()
    };
    let body = build_body(vec![Message::user("hi")], &[], Some(&fp));
    // DeepSeek range is [0.1, 2.0].
    assert_eq!(body["temperature"], json!(2.0));

    let fp = ForwardedParameters {
        temperature: Some(0.0),
        ..Default::default()
    };
    let body = build_body(vec![Message::user("hi")], &[], Some(&fp));
    // Low end of the range; compare with a tolerance (f32 → JSON f64).
    let t = body["temperature"].as_f64().unwrap();
    assert!((t - 0.1).abs() < 1e-6, "expected clamp to 0.1, got {t}");
}

#[test]
fn forwarded_stop_and_max_tokens_are_passed() {
    let fp = ForwardedParameters {
        max_tokens: Some(256),
        stop: Some(vec!["END".into()]),
        ..Default::default()
    };
    let body = build_body(vec![Message::user("hi")], &[], Some(&fp));
    assert_eq!(body["max_tokens"], 256);
    assert_eq!(body["stop"], json!(["END"]));
}

#[test]
fn tool_choice_function_targets_named_function() {
    let fp = ForwardedParameters {
        tool_choice: Some(ToolChoice::Mode("function".into())),
        tool_choice_function_name: Some("get_weather".into()),
        ..Default::default()
    };
    let body = build_body(vec![Message::user("hi")], &[weather_action()], Some(&fp));
    assert_eq!(body["tool_choice"]["type"], "function");
    assert_eq!(body["tool_choice"]["function"]["name"], "get_weather");
}

#[test]
fn parallel_tool_calls_false_is_forwarded() {
    let fp = ForwardedParameters {
        parallel_tool_calls: Some(false),
        ..Default::default()
    };
    let body = build_body(vec![Message::user("hi")], &[weather_action()], Some(&fp));
    assert_eq!(body["parallel_tool_calls"], false);
}

#[test]
fn allow_list_filter_is_order_sensitive() {
    // A result that appears before any execution with its id is an orphan —
    // but here the execution comes first, so it is kept.
    let msgs = vec![
        Message::ActionExecution {
            id: "t1".into(),
            name: "f".into(),
            arguments: json!({}),
            parent_id: None,
        },
        Message::Result {
            id: "r1".into(),
            action_execution_id: "t1".into(),
            action_name: "f".into(),
            result: "ok".into(),
        },
    ];
    assert_eq!(filter_orphan_results(msgs).len(), 2);
}
