//! Tool definitions in each provider's request format.

use serde_json::Value;

use super::Provider;
use crate::inference::types::{AnthropicTool, FunctionDefinition, ToolDefinition};
use crate::mcp_client::ToolSpec;

/// OpenAI `{"type": "function", "function": {...}}` definitions.
///
/// Gemini's OpenAI-compatible endpoint rejects some JSON Schema keywords, so
/// its schemas are cleaned first.
pub fn to_openai_tools(tools: &[ToolSpec], provider: Provider) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: match provider {
                    Provider::Gemini => sanitize_gemini_schema(&t.input_schema),
                    _ => t.input_schema.clone(),
                },
            },
        })
        .collect()
}

pub fn to_anthropic_tools(tools: &[ToolSpec]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|t| AnthropicTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
        })
        .collect()
}

/// Keywords Gemini refuses in function parameter schemas.
const GEMINI_UNSUPPORTED_KEYS: &[&str] = &["additionalProperties", "$schema", "default"];

/// Strip unsupported keywords at every depth and give object schemas an
/// explicit (possibly empty) `properties` map.
pub fn sanitize_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                if GEMINI_UNSUPPORTED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                // `properties` keys are field names, not keywords
                let cleaned = if key == "properties" {
                    match value {
                        Value::Object(props) => Value::Object(
                            props
                                .iter()
                                .map(|(k, v)| (k.clone(), sanitize_gemini_schema(v)))
                                .collect(),
                        ),
                        other => other.clone(),
                    }
                } else {
                    sanitize_gemini_schema(value)
                };
                out.insert(key.clone(), cleaned);
            }
            if out.get("type").and_then(Value::as_str) == Some("object")
                && !out.contains_key("properties")
            {
                out.insert("properties".to_string(), Value::Object(Default::default()));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_gemini_schema).collect()),
        other => other.clone(),
    }
}
