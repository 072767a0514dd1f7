//! CRM Agent - 多租户 CRM 对话智能体编排运行时
//!
//! 模块划分：
//! - **agents**: worker 节点身份与调用、路由、评估器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、分级回退、单轮编排、定时调度、优雅关闭
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）及 provider 注册表
//! - **memory**: 会话消息、滑动窗口、用户事实记忆
//! - **node_config**: 每用户每节点的模型配置、配置服务与缓存
//! - **observability**: tracing 日志初始化

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod node_config;
pub mod observability;

pub use crate::core::{Orchestrator, OrchestratorBuilder, OrchestratorError, TurnOutcome};
