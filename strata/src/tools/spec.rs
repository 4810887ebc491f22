//! Tool descriptors, results, and function-calling schema emission.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Broad tool classification, used for filtered listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Function,
    Mcp,
    Api,
    Browser,
    Database,
}

/// Semantic parameter type, mapped 1:1 onto JSON-schema `type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Allowed values, emitted as the schema's `enum`.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "enum")]
    pub choices: Option<Vec<Value>>,
}

impl ToolParameter {
    pub fn required(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            default: None,
            choices: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        default: Option<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: false,
            default,
            choices: None,
        }
    }

    pub fn with_choices(mut self, choices: Vec<Value>) -> Self {
        self.choices = Some(choices);
        self
    }
}

/// Declarative tool definition: everything but the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub kind: ToolKind,
    pub parameters: Vec<ToolParameter>,
    pub category: String,
    pub requires_auth: bool,
    /// Calls per minute, global per tool. None = unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    /// Wall-clock execution timeout.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

mod duration_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

impl ToolSpec {
    /// Defaults: function kind, `general` category, no auth, no rate limit,
    /// 30-second timeout.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: ToolKind::Function,
            parameters: Vec::new(),
            category: "general".to_string(),
            requires_auth: false,
            rate_limit: None,
            timeout: Duration::from_secs(30),
            metadata: BTreeMap::new(),
        }
    }

    pub fn kind(mut self, kind: ToolKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn requires_auth(mut self, yes: bool) -> Self {
        self.requires_auth = yes;
        self
    }

    /// Calls per minute; two successful calls are separated by at least
    /// `60 / rate` seconds.
    pub fn rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit = Some(per_minute);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Function-calling schema:
    /// `{name, description, parameters: {type: object, properties, required}}`.
    pub fn schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for parameter in &self.parameters {
            let mut property = serde_json::Map::new();
            property.insert("type".to_string(), json!(parameter.param_type.as_str()));
            property.insert("description".to_string(), json!(parameter.description));
            if let Some(choices) = &parameter.choices {
                property.insert("enum".to_string(), json!(choices));
            }
            if let Some(default) = &parameter.default {
                property.insert("default".to_string(), default.clone());
            }
            properties.insert(parameter.name.clone(), Value::Object(property));
            if parameter.required {
                required.push(parameter.name.clone());
            }
        }
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }
}

/// Result of one tool execution. Tool-level failures (missing tool, rate
/// limit, validation, timeout, handler error) come back as
/// `success = false`, never as an `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "duration_secs")]
    pub execution_time: Duration,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl ToolResult {
    pub fn failure(error: impl Into<String>, execution_time: Duration) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            execution_time,
            metadata: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_carries_parameter_metadata() {
        let spec = ToolSpec::new("search", "Search for items")
            .parameter(ToolParameter::required("query", ParamType::String, "Search query"))
            .parameter(
                ToolParameter::optional("max_results", ParamType::Integer, "Result cap", Some(json!(10)))
                    .with_choices(vec![json!(5), json!(10), json!(25)]),
            );
        let schema = spec.schema();
        assert_eq!(schema["name"], "search");
        assert_eq!(schema["parameters"]["type"], "object");
        assert_eq!(schema["parameters"]["required"], json!(["query"]));
        let max = &schema["parameters"]["properties"]["max_results"];
        assert_eq!(max["type"], "integer");
        assert_eq!(max["default"], 10);
        assert_eq!(max["enum"], json!([5, 10, 25]));
    }

    #[test]
    fn spec_round_trips_through_serde() {
        let spec = ToolSpec::new("t", "d").rate_limit(10).timeout(Duration::from_secs(5));
        let wire = serde_json::to_string(&spec).unwrap();
        let back: ToolSpec = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.rate_limit, Some(10));
        assert_eq!(back.timeout, Duration::from_secs(5));
    }
}
