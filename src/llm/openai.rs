//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 请求中的模型名逐次传入，同一客户端可服务回退链上的多个模型。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::llm::{LlmClient, LlmError, LlmRequest, TokenStream};
use crate::memory::{Message, Role};

/// DeepSeek 提供与 OpenAI 完全兼容的 API 接口
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, api_key: &str) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self {
            client: Client::with_config(config),
        }
    }

    /// 创建 DeepSeek 客户端
    pub fn deepseek(api_key: &str) -> Self {
        Self::new(Some(DEEPSEEK_BASE_URL), api_key)
    }

    fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
        let built = match m.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map(ChatCompletionRequestMessage::System),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map(ChatCompletionRequestMessage::User),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map(ChatCompletionRequestMessage::Assistant),
        };
        built.map_err(|e| LlmError::ApiError(e.to_string()))
    }

    fn build_request(request: &LlmRequest) -> Result<CreateChatCompletionRequest, LlmError> {
        let messages = request
            .messages
            .iter()
            .map(Self::to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&request.model).messages(messages).stream(true);

        let settings = &request.settings;
        if let Some(t) = settings.temperature {
            args.temperature(t);
        }
        if let Some(max) = settings.max_tokens {
            args.max_completion_tokens(max);
        }
        if let Some(p) = settings.top_p {
            args.top_p(p);
        }
        if let Some(fp) = settings.frequency_penalty {
            args.frequency_penalty(fp);
        }
        if let Some(pp) = settings.presence_penalty {
            args.presence_penalty(pp);
        }
        if settings.top_k.is_some() {
            tracing::debug!(model = %request.model, "top_k is not supported by OpenAI-compatible endpoints, ignoring");
        }

        args.build().map_err(|e| LlmError::ApiError(e.to_string()))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete_stream(
        &self,
        request: &LlmRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, LlmError> {
        let api_request = Self::build_request(request)?;

        let chat = self.client.chat();
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = chat.create_stream(api_request) => {
                result.map_err(|e| LlmError::ApiError(e.to_string()))?
            }
        };

        // 丢弃流即中止底层 HTTP 请求；取消时流提前结束
        let tokens = stream
            .filter_map(|chunk| async move {
                match chunk {
                    Ok(response) => response
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .filter(|content| !content.is_empty())
                        .map(Ok),
                    Err(e) => Some(Err(LlmError::StreamInterrupted(e.to_string()))),
                }
            })
            .take_until(cancel.cancelled_owned());

        Ok(Box::pin(tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GenerationSettings;

    #[test]
    fn test_build_request_applies_settings() {
        let request = LlmRequest::new("gpt-4o-mini", vec![Message::system("s"), Message::user("u")])
            .with_settings(GenerationSettings {
                temperature: Some(0.3),
                max_tokens: Some(256),
                ..Default::default()
            });
        let built = OpenAiClient::build_request(&request).unwrap();
        assert_eq!(built.model, "gpt-4o-mini");
        assert_eq!(built.messages.len(), 2);
        assert_eq!(built.temperature, Some(0.3));
        assert_eq!(built.max_completion_tokens, Some(256));
    }

    #[tokio::test]
    async fn test_cancelled_before_request_is_sent() {
        // 指向不可达地址：若真的发出请求会得到连接错误而不是 Cancelled
        let client = OpenAiClient::new(Some("http://127.0.0.1:9"), "test-key");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = client
            .complete_stream(&LlmRequest::new("gpt-4o-mini", vec![Message::user("hi")]), cancel)
            .await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }
}
