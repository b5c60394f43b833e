use async_trait::async_trait;

use crate::{
    arguments::Arguments,
    error::Result,
    schema::{
        CallToolResult, CreateMessageParams, CreateMessageResult, GetPromptResult,
        ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
        LoggingLevel, ReadResourceResult,
    },
};

/// Server API trait defining the methods a client can call on an MCP server.
#[async_trait]
pub trait ServerAPI: Send + Sync {
    /// Liveness check
    async fn ping(&self) -> Result<()>;

    async fn list_tools(&self) -> Result<ListToolsResult>;

    /// Resources registered under literal URIs
    async fn list_resources(&self) -> Result<ListResourcesResult>;

    async fn list_resource_templates(&self) -> Result<ListResourceTemplatesResult>;

    async fn list_prompts(&self) -> Result<ListPromptsResult>;

    /// Call a tool with the given name and arguments
    async fn call_tool(&self, name: &str, arguments: Arguments) -> Result<CallToolResult>;

    /// Read a resource by URI
    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult>;

    /// Render a prompt by name
    async fn get_prompt(&self, name: &str, arguments: Arguments) -> Result<GetPromptResult>;

    /// Set the minimum level of log records the server sends
    async fn set_level(&self, level: LoggingLevel) -> Result<()>;
}

/// Client API trait defining the methods a server can call on the client.
#[async_trait]
pub trait ClientAPI: Send + Sync {
    /// Respond to ping requests from the server
    async fn ping(&self) -> Result<()>;

    /// Ask the client to sample its language model
    async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult>;
}
