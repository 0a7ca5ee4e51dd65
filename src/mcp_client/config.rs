//! Loading the tool-server registry file.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "date":   { "command": "uv", "args": ["run", "servers/date.py"] },
//!     "search": { "url": "http://localhost:8931/mcp", "headers": { "Authorization": "Bearer ..." } },
//!     "old":    { "command": "node", "args": ["old.js"], "disabled": true }
//!   }
//! }
//! ```

use std::path::Path;

use super::errors::McpError;
use super::types::McpServersConfig;

impl McpServersConfig {
    /// Read the registry file. A missing file means "no tool servers".
    pub fn load(path: &Path) -> Result<Self, McpError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no tool-server registry found, running without tools");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| McpError::ConfigError {
            reason: format!("failed to parse {}: {e}", path.display()),
        })?;
        config.validate()?;

        tracing::info!(
            path = %path.display(),
            servers = config.servers.len(),
            enabled = config.enabled_count(),
            "loaded tool-server registry"
        );
        Ok(config)
    }

    /// Every enabled entry must name a command or a url.
    pub fn validate(&self) -> Result<(), McpError> {
        for (name, server) in &self.servers {
            if server.disabled {
                continue;
            }
            if server.command.is_none() && server.url.is_none() {
                return Err(McpError::ConfigError {
                    reason: format!("server '{name}' needs either 'command' or 'url'"),
                });
            }
        }
        Ok(())
    }

    pub fn enabled_count(&self) -> usize {
        self.servers.values().filter(|s| !s.disabled).count()
    }
}
