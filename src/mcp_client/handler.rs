//! The seam between the conversation loop and external tools.

use async_trait::async_trait;

use super::errors::ToolError;
use super::types::{ResourceContent, ToolCallResult, ToolSpec};

/// Discovers and invokes external tools and resources.
///
/// One instance is shared (`Arc<dyn ProtocolHandler>`) by every agent and
/// every concurrent turn; implementations guard their own connections.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Tools currently available, in a stable order.
    fn tools(&self) -> Vec<ToolSpec>;

    /// Invoke a tool by name.
    async fn use_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ToolError>;

    /// Read an addressable resource.
    async fn access_resource(&self, uri: &str) -> Result<Vec<ResourceContent>, ToolError>;
}
