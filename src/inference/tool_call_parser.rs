//! Tool call parsing: normalizes provider output to `ToolCall` structs.
//!
//! Two formats are recognized, selected per provider by `tool_call_format`:
//!
//! 1. **native_json**: structured tool calls (OpenAI `tool_calls`, Anthropic
//!    `tool_use`). Arguments arrive as a JSON string that may be split across
//!    stream deltas.
//!
//! 2. **pythonic**: text-based calls emitted by small local models that have
//!    no native function calling:
//!    ```text
//!    Tool: date__get_today
//!    Arguments: {"timezone": "UTC"}
//!    ```

use serde::Deserialize;
use uuid::Uuid;

use super::errors::ProviderError;
use super::types::ToolCall;

/// Which tool-call format a provider emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallFormat {
    /// Structured JSON tool calls.
    #[default]
    NativeJson,
    /// `Tool: … / Arguments: …` lines in the text content.
    Pythonic,
}

/// Generate an id for a tool call the provider did not label.
pub fn generate_call_id() -> String {
    format!("call_{}", Uuid::new_v4())
}

// ─── Native JSON ─────────────────────────────────────────────────────────────

/// Build a tool call from the accumulated name/arguments of one call.
///
/// An empty argument string is treated as `{}`; some providers omit the
/// arguments entirely for zero-parameter tools.
pub fn parse_native_json_tool_call(
    id: Option<&str>,
    name: &str,
    arguments_json: &str,
) -> Result<ToolCall, ProviderError> {
    if name.is_empty() {
        return Err(ProviderError::ToolCallParseError {
            raw_response: arguments_json.to_string(),
            reason: "empty tool name".into(),
        });
    }

    let arguments = if arguments_json.trim().is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(arguments_json).map_err(|e| ProviderError::ToolCallParseError {
            raw_response: arguments_json.to_string(),
            reason: format!("invalid JSON arguments: {e}"),
        })?
    };

    Ok(ToolCall {
        id: id.map(String::from).unwrap_or_else(generate_call_id),
        name: name.to_string(),
        arguments,
    })
}

// ─── Pythonic ────────────────────────────────────────────────────────────────

/// Extract every `Tool:` / `Arguments:` pair from text content.
///
/// A `Tool:` line without a following `Arguments:` line gets `{}`.
pub fn parse_pythonic_tool_calls(text: &str) -> Result<Vec<ToolCall>, ProviderError> {
    let mut calls = Vec::new();
    let mut lines = text.lines().map(str::trim).peekable();

    while let Some(line) = lines.next() {
        let Some(name) = strip_label(line, "tool:") else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }

        let arguments = match lines.peek().and_then(|next| strip_label(next, "arguments:")) {
            Some(raw) => {
                let raw = raw.trim();
                let parsed =
                    serde_json::from_str(raw).map_err(|e| ProviderError::ToolCallParseError {
                        raw_response: raw.to_string(),
                        reason: format!("invalid pythonic arguments JSON: {e}"),
                    })?;
                lines.next();
                parsed
            }
            None => serde_json::Value::Object(serde_json::Map::new()),
        };

        calls.push(ToolCall {
            id: generate_call_id(),
            name: name.to_string(),
            arguments,
        });
    }

    Ok(calls)
}

/// Case-insensitive prefix strip for `Label:` style lines.
fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    if head.eq_ignore_ascii_case(label) {
        Some(&line[label.len()..])
    } else {
        None
    }
}

/// Run the text-based parser for `format`, if it has one.
pub fn parse_text_tool_calls(
    format: ToolCallFormat,
    text: &str,
) -> Result<Vec<ToolCall>, ProviderError> {
    match format {
        ToolCallFormat::Pythonic => parse_pythonic_tool_calls(text),
        ToolCallFormat::NativeJson => Ok(Vec::new()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
