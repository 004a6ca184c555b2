//! Command routing to the host's tool-execution engine.
//!
//! The engine itself lives in the host application. This module defines
//! the seam ([`CommandRouter`]) and a compile-time registry
//! ([`ToolRegistry`]) mapping tool names to handlers, built once at startup.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown command type: {0}")]
    UnknownTool(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),
}

/// Executes one command on behalf of the session client.
#[async_trait]
pub trait CommandRouter: Send + Sync {
    async fn execute(&self, tool: &str, params: Value) -> Result<Value, ToolError>;
}

/// A single named tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: Value) -> Result<Value, ToolError>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub struct FnTool<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn call(&self, params: Value) -> Result<Value, ToolError> {
        (self.0)(params).await
    }
}

pub fn tool_fn<F, Fut>(f: F) -> FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    FnTool(f)
}

/// Replies `{"message": "pong"}`.
pub struct PingTool;

#[async_trait]
impl ToolHandler for PingTool {
    async fn call(&self, _params: Value) -> Result<Value, ToolError> {
        Ok(json!({ "message": "pong" }))
    }
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `ping`.
    pub fn with_builtins() -> Self {
        Self::new().register("ping", PingTool)
    }

    pub fn register(mut self, name: impl Into<String>, tool: impl ToolHandler + 'static) -> Self {
        self.tools.insert(name.into(), Arc::new(tool));
        self
    }

    pub fn register_arc(mut self, name: impl Into<String>, tool: Arc<dyn ToolHandler>) -> Self {
        self.tools.insert(name.into(), tool);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl CommandRouter for ToolRegistry {
    async fn execute(&self, tool: &str, params: Value) -> Result<Value, ToolError> {
        let handler = self
            .tools
            .get(tool)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool(tool.to_string()))?;
        handler.call(params).await
    }
}
