//! TechHealth - 多智能体健康助手核心
//!
//! 模块划分：
//! - **agents**: 协调者与三个专家 Agent（健康监测 / 建议 / 医学知识）、工具调用封装
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 请求分类、路由计划、安全过滤、编排器与构建器
//! - **llm**: 推理后端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 会话模型、会话存储、会话锁与 JSON Lines 持久化
//! - **observability**: 日志初始化与结构化追踪事件
//! - **tools**: 工具注册表与内置健康工具

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use crate::core::{FinalResponse, Orchestrator, OrchestratorBuilder, OrchestratorError};
