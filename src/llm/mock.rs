//! Mock LLM 客户端（用于测试，无需 API）
//!
//! - MockLlmClient：回显最后一条 User 消息，按词流式输出
//! - ScriptedLlmClient：按模型名预设回复（文本 / 延迟 / 失败 / 挂起），记录每次调用及其取消令牌

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::llm::{LlmClient, LlmError, LlmRequest, TokenStream};
use crate::memory::Role;

/// 把文本切成带空白的词 token
fn tokenize(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(String::from).collect()
}

/// 由后台任务喂数据的 token 流；delay 为 None 时挂起直到取消
fn channel_stream(delay: Option<Duration>, tokens: Vec<String>, cancel: CancellationToken) -> TokenStream {
    let (tx, rx) = mpsc::unbounded_channel::<Result<String, LlmError>>();
    tokio::spawn(async move {
        let wait = async {
            match delay {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tx.send(Err(LlmError::Cancelled));
            }
            _ = wait => {
                for token in tokens {
                    if tx.send(Ok(token)).is_err() {
                        break;
                    }
                }
            }
        }
    });
    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete_stream(
        &self,
        request: &LlmRequest,
        _cancel: CancellationToken,
    ) -> Result<TokenStream, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let reply = format!("[{}] {}", request.model, last_user);
        Ok(Box::pin(stream::iter(tokenize(&reply).into_iter().map(Ok))))
    }
}

/// 预设回复
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// 立即流式返回
    Text(String),
    /// 延迟 delay 后才出首 token
    Delayed { delay: Duration, text: String },
    /// 建立流之前直接失败
    Fail(String),
    /// 永不出 token，直到被取消
    Hang,
}

/// 一次调用记录
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub request: LlmRequest,
    pub cancel: CancellationToken,
}

/// 按模型名脚本化的客户端
///
/// 同一模型可排队多条回复：依次消费，只剩最后一条时一直复用。
/// 未配置的模型回显最后一条 User 消息。
#[derive(Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为模型追加一条回复
    pub fn script(self, model: &str, reply: ScriptedReply) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(model.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// 所有调用（按发生顺序）
    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 某模型被调用的次数
    pub fn call_count(&self, model: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.request.model == model)
            .count()
    }

    fn next_reply(&self, model: &str) -> Option<ScriptedReply> {
        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        let queue = replies.get_mut(model)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete_stream(
        &self,
        request: &LlmRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ScriptedCall {
                request: request.clone(),
                cancel: cancel.clone(),
            });

        match self.next_reply(&request.model) {
            Some(ScriptedReply::Text(text)) => {
                Ok(Box::pin(stream::iter(tokenize(&text).into_iter().map(Ok))))
            }
            Some(ScriptedReply::Delayed { delay, text }) => {
                Ok(channel_stream(Some(delay), tokenize(&text), cancel))
            }
            Some(ScriptedReply::Fail(reason)) => Err(LlmError::ApiError(reason)),
            Some(ScriptedReply::Hang) => Ok(channel_stream(None, Vec::new(), cancel)),
            None => MockLlmClient.complete_stream(request, cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let req = LlmRequest::new("m", vec![Message::user("first"), Message::user("find jobs")]);
        let text = MockLlmClient.complete(&req, CancellationToken::new()).await.unwrap();
        assert_eq!(text, "[m] find jobs");
    }

    #[tokio::test]
    async fn test_scripted_queue_then_repeat_last() {
        let client = ScriptedLlmClient::new()
            .script("m", ScriptedReply::Text("one".into()))
            .script("m", ScriptedReply::Text("two".into()));
        let req = LlmRequest::new("m", vec![]);
        let cancel = CancellationToken::new();
        assert_eq!(client.complete(&req, cancel.clone()).await.unwrap(), "one");
        assert_eq!(client.complete(&req, cancel.clone()).await.unwrap(), "two");
        assert_eq!(client.complete(&req, cancel).await.unwrap(), "two");
        assert_eq!(client.call_count("m"), 3);
    }

    #[tokio::test]
    async fn test_scripted_hang_ends_on_cancel() {
        let client = ScriptedLlmClient::new().script("m", ScriptedReply::Hang);
        let cancel = CancellationToken::new();
        let req = LlmRequest::new("m", vec![]);
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { client.complete(&req, cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), Err(LlmError::Cancelled));
    }

    #[tokio::test]
    async fn test_scripted_fail() {
        let client = ScriptedLlmClient::new().script("m", ScriptedReply::Fail("down".into()));
        let err = client
            .complete(&LlmRequest::new("m", vec![]), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::ApiError("down".into()));
    }
}
