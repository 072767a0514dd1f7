//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：complete_stream（流式 Token）为必需，
//! complete（非流式）默认由流拼接而成。首 token 的到达时间由调用方观测，用于分级回退。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::memory::Message;

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Empty response")]
    EmptyResponse,

    #[error("Request cancelled")]
    Cancelled,
}

/// 生成参数；None 表示交给后端默认值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

impl GenerationSettings {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// 一次模型调用的完整请求
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// 允许模型使用的工具名子集
    pub tools: Vec<String>,
    pub settings: GenerationSettings,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 同一请求换一个模型（回退链逐级尝试时使用）
    pub fn for_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }
}

/// Token 流
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 流式完成，返回 Token 流；cancel 触发时实现应尽快中止底层请求
    async fn complete_stream(
        &self,
        request: &LlmRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, LlmError>;

    /// 非流式完成
    async fn complete(
        &self,
        request: &LlmRequest,
        cancel: CancellationToken,
    ) -> Result<String, LlmError> {
        let stream = self.complete_stream(request, cancel.clone()).await?;
        collect_stream(stream, &cancel).await
    }
}

/// 把剩余 token 拼接成完整文本，期间响应取消
pub async fn collect_stream(
    mut stream: TokenStream,
    cancel: &CancellationToken,
) -> Result<String, LlmError> {
    let mut content = String::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            next = stream.next() => match next {
                Some(Ok(token)) => content.push_str(&token),
                Some(Err(e)) => return Err(e),
                None => return Ok(content),
            },
        }
    }
}
