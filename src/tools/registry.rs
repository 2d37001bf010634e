//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / schema / call），由 ToolRegistry 按名注册与调用。
//! 注册只在启动阶段进行；之后注册表以 `Arc<ToolRegistry>` 只读共享，调用无需加锁。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// 工具调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool {tool} failed: {message}")]
    ToolExecutionError { tool: String, message: String },

    #[error("Tool timeout: {0}")]
    Timeout(String),
}

/// 工具 trait：名称、描述、输入/输出 schema、异步执行（args 与结果均为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema，默认不限
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    fn output_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    async fn call(&self, args: Value) -> Result<Value, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名工具后注册者覆盖先注册者
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous capability replaced");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.call(args)
            .await
            .map_err(|message| ToolError::ToolExecutionError {
                tool: name.to_string(),
                message,
            })
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 所有已注册工具的 schema 列表（name / description / input / output）
    pub fn to_schema_json(&self) -> Value {
        let tools: Vec<Value> = self
            .tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "input": tool.input_schema(),
                    "output": tool.output_schema(),
                })
            })
            .collect();
        Value::Array(tools)
    }
}
