//! 分级模型回退
//!
//! 状态机：Idle -> AwaitingFirstToken(i) -> { Streaming | Promote(i+1) | AllTiersExhausted }
//!
//! 每级尝试使用父取消令牌的子令牌；首 token 超时或出错时取消子令牌（放弃该级）并立即尝试下一级。
//! 首 token 到达后在该级完成，不再晋级。回退链为空时对节点默认模型只调用一次、不设首 token 计时。
//! 父令牌取消时返回 Cancelled，不再晋级。

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::core::error::{OrchestratorError, TierFailure, TierFailureReason};
use crate::llm::{collect_stream, LlmClient, LlmError, LlmRequest, ProviderRegistry, TokenStream};
use crate::node_config::ResolvedNode;

/// 一次成功调用的结果
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    /// 实际给出回复的模型
    pub model: String,
    /// 回复来自回退链的第几级；None 表示未启用回退链
    pub tier: Option<usize>,
    /// 成功之前被放弃的各级
    pub promotions: Vec<TierFailure>,
}

/// 模型错误映射：父令牌已取消时一律视为取消
fn map_llm_error(err: LlmError, cancel: &CancellationToken) -> OrchestratorError {
    if cancel.is_cancelled() || err == LlmError::Cancelled {
        OrchestratorError::Cancelled
    } else {
        OrchestratorError::Llm(err)
    }
}

/// 建立流并等首 token
async fn first_token(
    client: &dyn LlmClient,
    request: &LlmRequest,
    attempt: CancellationToken,
) -> Result<(String, TokenStream), LlmError> {
    let mut stream = client.complete_stream(request, attempt).await?;
    match stream.next().await {
        Some(Ok(token)) => Ok((token, stream)),
        Some(Err(e)) => Err(e),
        None => Err(LlmError::EmptyResponse),
    }
}

pub struct FallbackController {
    providers: Arc<ProviderRegistry>,
}

impl FallbackController {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    /// 按节点解析出的配置执行一次调用；request 中的 model / settings 会被节点配置覆盖
    pub async fn execute(
        &self,
        node: &ResolvedNode,
        request: LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, OrchestratorError> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let client = self.providers.get(&node.provider);
        let request = request.with_settings(node.settings.clone());

        if node.fallback_chain.is_empty() {
            return self.execute_single(client.as_ref(), node, &request, cancel).await;
        }
        self.execute_chain(client.as_ref(), node, &request, cancel).await
    }

    async fn execute_single(
        &self,
        client: &dyn LlmClient,
        node: &ResolvedNode,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, OrchestratorError> {
        let request = request.for_model(&node.model);
        let attempt = cancel.child_token();

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            result = client.complete_stream(&request, attempt) => {
                result.map_err(|e| map_llm_error(e, cancel))?
            }
        };
        let content = collect_stream(stream, cancel)
            .await
            .map_err(|e| map_llm_error(e, cancel))?;

        tracing::debug!(node = %node.node, model = %node.model, "Single-tier call completed");
        Ok(Completion {
            content,
            model: node.model.clone(),
            tier: None,
            promotions: Vec::new(),
        })
    }

    async fn execute_chain(
        &self,
        client: &dyn LlmClient,
        node: &ResolvedNode,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, OrchestratorError> {
        let mut failures = Vec::with_capacity(node.fallback_chain.len());

        for (index, tier) in node.fallback_chain.iter().enumerate() {
            let tier_request = request.for_model(&tier.model);
            let attempt = cancel.child_token();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                result = tokio::time::timeout(
                    tier.first_token_timeout,
                    first_token(client, &tier_request, attempt.clone()),
                ) => result,
            };

            let reason = match outcome {
                Ok(Ok((first, rest))) => {
                    let tail = collect_stream(rest, cancel)
                        .await
                        .map_err(|e| map_llm_error(e, cancel))?;
                    if index > 0 {
                        tracing::info!(node = %node.node, tier = index, model = %tier.model, "Fallback tier answered");
                    }
                    return Ok(Completion {
                        content: first + &tail,
                        model: tier.model.clone(),
                        tier: Some(index),
                        promotions: failures,
                    });
                }
                Ok(Err(e)) => {
                    if cancel.is_cancelled() {
                        return Err(OrchestratorError::Cancelled);
                    }
                    TierFailureReason::Error(e.to_string())
                }
                Err(_) => TierFailureReason::FirstTokenTimeout(tier.first_token_timeout),
            };

            attempt.cancel();
            let failure = TierFailure {
                tier: index,
                model: tier.model.clone(),
                reason,
            };
            tracing::warn!(node = %node.node, "Promoting past {}", failure);
            failures.push(failure);
        }

        Err(OrchestratorError::AllTiersExhausted { failures })
    }
}
