// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One declared parameter of an action.
///
/// `items` describes array elements (its `name` is ignored); `properties`
/// describes the fields of an object parameter.  Both recurse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(
        rename = "enum",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Parameter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<Parameter>>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: true,
            enum_values: None,
            items: None,
            properties: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_description(mut self, d: impl Into<String>) -> Self {
        self.description = Some(d.into());
        self
    }
}

/// Where an action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionAvailability {
    #[default]
    Enabled,
    Disabled,
    Remote,
}

/// An action as declared on the wire (no handler attached).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(alias = "available", default)]
    pub availability: ActionAvailability,
}

impl ActionInput {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            availability: ActionAvailability::Enabled,
        }
    }
}

/// JSON Schema fragment for a single parameter.  Recurses into array items
/// and object properties.
pub fn parameter_schema(p: &Parameter) -> Value {
    let mut schema = json!({ "type": p.param_type.as_str() });
    if let Some(d) = &p.description {
        schema["description"] = json!(d);
    }
    if let Some(values) = &p.enum_values {
        schema["enum"] = json!(values);
    }
    match p.param_type {
        ParameterType::Array => {
            // An array with no declared item shape defaults to string items.
            let items = p
                .items
                .as_deref()
                .map(parameter_schema)
                .unwrap_or_else(|| json!({ "type": "string" }));
            schema["items"] = items;
        }
        ParameterType::Object => {
            let props = p.properties.as_deref().unwrap_or(&[]);
            schema["properties"] = object_properties(props);
            schema["required"] = required_names(props);
        }
        _ => {}
    }
    schema
}

/// Full `parameters` schema for an action.  Actions with no parameters still
/// emit `{type: object, properties: {}, required: []}` — providers reject a
/// missing or non-object tool parameter block.
pub fn action_parameters_schema(parameters: &[Parameter]) -> Value {
    json!({
        "type": "object",
        "properties": object_properties(parameters),
        "required": required_names(parameters),
    })
}

fn object_properties(params: &[Parameter]) -> Value {
    let mut props = serde_json::Map::new();
    for p in params {
        props.insert(p.name.clone(), parameter_schema(p));
    }
    Value::Object(props)
}

fn required_names(params: &[Parameter]) -> Value {
    json!(params
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_parameters_emits_empty_object_schema() {
        let schema = action_parameters_schema(&[]);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"], json!({}));
        assert_eq!(schema["required"], json!([]));
    }

    #[test]
    fn required_and_optional_split() {
        let params = vec![
            Parameter::new("city", ParameterType::String),
            Parameter::new("unit", ParameterType::String).optional(),
        ];
        let schema = action_parameters_schema(&params);
        assert_eq!(schema["required"], json!(["city"]));
        assert_eq!(schema["properties"]["unit"]["type"], "string");
    }

    #[test]
    fn enum_values_are_emitted() {
        let p = Parameter {
            enum_values: Some(vec!["c".into(), "f".into()]),
            ..Parameter::new("unit", ParameterType::String)
        };
        assert_eq!(parameter_schema(&p)["enum"], json!(["c", "f"]));
    }

    #[test]
    fn array_parameter_recurses_into_items() {
        let p = Parameter {
            items: Some(Box::new(Parameter::new("", ParameterType::Number))),
            ..Parameter::new("values", ParameterType::Array)
        };
        let schema = parameter_schema(&p);
        assert_eq!(schema["type"], "array");
        assert_eq!(schema["items"]["type"], "number");
    }

    #[test]
    fn array_without_items_defaults_to_string_items() {
        let p = Parameter::new("tags", ParameterType::Array);
        assert_eq!(parameter_schema(&p)["items"]["type"], "string");
    }

    #[test]
    fn object_parameter_emits_nested_properties_and_required() {
        let p = Parameter {
            properties: Some(vec![
                Parameter::new("lat", ParameterType::Number),
                Parameter::new("label", ParameterType::String).optional(),
            ]),
            ..Parameter::new("location", ParameterType::Object)
        };
        let schema = parameter_schema(&p);
        assert_eq!(schema["properties"]["lat"]["type"], "number");
        assert_eq!(schema["required"], json!(["lat"]));
    }

    #[test]
    fn action_input_accepts_available_alias() {
        let a: ActionInput = serde_json::from_str(
            r#"{"name": "f", "description": "", "parameters": [], "available": "remote"}"#,
        )
        .unwrap();
        assert_eq!(a.availability, ActionAvailability::Remote);
    }

    #[test]
    fn action_input_defaults_to_enabled() {
        let a: ActionInput = serde_json::from_str(r#"{"name": "f"}"#).unwrap();
        assert_eq!(a.availability, ActionAvailability::Enabled);
        assert!(a.parameters.is_empty());
    }
}
