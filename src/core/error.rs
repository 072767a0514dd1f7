//! 编排层错误类型
//!
//! 传播策略：配置加载失败在缓存内部降级为默认值，不打断对话；
//! 分级回退耗尽与取消总是返回给调用方；调度 tick 的失败只记日志。

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;

/// 单个 tier 失败的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierFailureReason {
    /// 首 token 未在时限内到达
    FirstTokenTimeout(Duration),
    /// 模型调用出错
    Error(String),
}

impl fmt::Display for TierFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierFailureReason::FirstTokenTimeout(t) => {
                write!(f, "no first token within {}ms", t.as_millis())
            }
            TierFailureReason::Error(e) => write!(f, "{e}"),
        }
    }
}

/// 回退链中某一级的失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierFailure {
    pub tier: usize,
    pub model: String,
    pub reason: TierFailureReason,
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {} ({}): {}", self.tier, self.model, self.reason)
    }
}

fn join_failures(failures: &[TierFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 编排核心对外暴露的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionAlreadyExists(String),

    /// 仅在缓存内部使用，调用方拿到的是默认配置
    #[error("Config load failed for user {user_id}: {reason}")]
    ConfigLoadFailed { user_id: String, reason: String },

    #[error("All model tiers exhausted: {}", join_failures(.failures))]
    AllTiersExhausted { failures: Vec<TierFailure> },

    #[error("Retry ceiling reached after {attempts} attempts")]
    RetryCeilingReached { attempts: usize, last_output: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("No worker registered for node: {0}")]
    WorkerUnavailable(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

impl OrchestratorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrchestratorError::Cancelled)
    }
}
