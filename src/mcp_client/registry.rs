//! Tool registry: aggregates what every connected server advertises.
//!
//! Provides:
//! - Flat tool names of the form `server__tool`, valid for every provider
//! - Lookup by flat name, or by bare tool name when exactly one server owns it
//! - Structural validation of tool call arguments
//! - Resource and prompt routing

use std::collections::{BTreeMap, BTreeSet};

use super::errors::McpError;
use super::types::{McpPrompt, McpResource, McpToolDefinition, ToolSpec};

/// Separator between server and tool in flat names.
pub const NAME_SEPARATOR: &str = "__";

/// Flat name for `tool` on `server`.
///
/// Characters providers reject in function names are replaced with `_`.
pub fn qualified_name(server: &str, tool: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!("{}{NAME_SEPARATOR}{}", clean(server), clean(tool))
}

/// A registry entry: owning server plus the definition as advertised.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub server: String,
    pub definition: McpToolDefinition,
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Aggregated registry across all tool servers.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    /// `flat name → entry`. Ordered so tool lists are stable between requests.
    tools: BTreeMap<String, RegisteredTool>,
    /// `uri → (server, resource)`.
    resources: BTreeMap<String, (String, McpResource)>,
    /// `flat name → (server, prompt)`.
    prompts: BTreeMap<String, (String, McpPrompt)>,
    /// Servers that advertised the resources capability.
    resource_servers: BTreeSet<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register tools from a server.
    pub fn register_server_tools(&mut self, server_name: &str, tools: Vec<McpToolDefinition>) {
        for tool in tools {
            let fq_name = qualified_name(server_name, &tool.name);
            if let Some(previous) = self.tools.get(&fq_name) {
                tracing::warn!(
                    tool = %fq_name,
                    previous = %previous.definition.name,
                    "tool name collision after sanitizing, keeping the latest"
                );
            }
            self.tools.insert(
                fq_name,
                RegisteredTool {
                    server: server_name.to_string(),
                    definition: tool,
                },
            );
        }
    }

    /// Register resources from a server.
    pub fn register_server_resources(&mut self, server_name: &str, resources: Vec<McpResource>) {
        self.resource_servers.insert(server_name.to_string());
        for resource in resources {
            self.resources
                .insert(resource.uri.clone(), (server_name.to_string(), resource));
        }
    }

    /// Register prompt templates from a server.
    pub fn register_server_prompts(&mut self, server_name: &str, prompts: Vec<McpPrompt>) {
        for prompt in prompts {
            self.prompts.insert(
                qualified_name(server_name, &prompt.name),
                (server_name.to_string(), prompt),
            );
        }
    }

    /// Remove everything belonging to a server.
    pub fn unregister_server(&mut self, server_name: &str) {
        self.tools.retain(|_, t| t.server != server_name);
        self.resources.retain(|_, (srv, _)| srv != server_name);
        self.prompts.retain(|_, (srv, _)| srv != server_name);
        self.resource_servers.remove(server_name);
    }

    /// Look up a tool by flat name, falling back to a unique bare tool name.
    ///
    /// Returns the flat name together with the entry.
    pub fn resolve_tool(&self, name: &str) -> Option<(&str, &RegisteredTool)> {
        if let Some((fq, tool)) = self.tools.get_key_value(name) {
            return Some((fq.as_str(), tool));
        }

        let mut matches = self
            .tools
            .iter()
            .filter(|(_, t)| t.definition.name == name);
        match (matches.next(), matches.next()) {
            (Some((fq, tool)), None) => Some((fq.as_str(), tool)),
            _ => None,
        }
    }

    /// Server that should answer `resources/read` for `uri`.
    ///
    /// An advertised uri routes to its owner; otherwise the sole server with
    /// resource support gets it (servers may expose templated uris).
    pub fn server_for_resource(&self, uri: &str) -> Option<&str> {
        if let Some((server, _)) = self.resources.get(uri) {
            return Some(server.as_str());
        }
        let mut servers = self.resource_servers.iter();
        match (servers.next(), servers.next()) {
            (Some(only), None) => Some(only.as_str()),
            _ => None,
        }
    }

    /// Look up a prompt by flat name, falling back to a unique bare name.
    pub fn resolve_prompt(&self, name: &str) -> Option<&(String, McpPrompt)> {
        if let Some(entry) = self.prompts.get(name) {
            return Some(entry);
        }
        let mut matches = self.prompts.values().filter(|(_, p)| p.name == name);
        match (matches.next(), matches.next()) {
            (Some(entry), None) => Some(entry),
            _ => None,
        }
    }

    /// Check arguments against the tool's schema: an object with every
    /// `required` field present. Full validation is left to the server.
    pub fn validate_arguments(
        tool: &RegisteredTool,
        arguments: &serde_json::Value,
    ) -> Result<(), McpError> {
        let name = &tool.definition.name;
        let Some(args_obj) = arguments.as_object() else {
            return Err(McpError::InvalidArguments {
                tool: name.clone(),
                reason: "arguments must be a JSON object".into(),
            });
        };

        if let Some(required) = tool
            .definition
            .input_schema
            .get("required")
            .and_then(|r| r.as_array())
        {
            for field_name in required.iter().filter_map(|f| f.as_str()) {
                if !args_obj.contains_key(field_name) {
                    return Err(McpError::InvalidArguments {
                        tool: name.clone(),
                        reason: format!("missing required field: '{field_name}'"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Tools as agents see them, ordered by flat name.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|(fq, t)| ToolSpec {
                name: fq.clone(),
                description: t.definition.description.clone(),
                input_schema: t.definition.input_schema.clone(),
            })
            .collect()
    }

    pub fn resources(&self) -> Vec<&McpResource> {
        self.resources.values().map(|(_, r)| r).collect()
    }

    /// `(flat name, prompt)` pairs.
    pub fn prompts(&self) -> Vec<(&str, &McpPrompt)> {
        self.prompts
            .iter()
            .map(|(fq, (_, p))| (fq.as_str(), p))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
