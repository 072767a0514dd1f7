//! 评估器：worker 输出的可选质量门
//!
//! 评估结果交给 RetryPolicy 决定：满足标准则接受；需要用户补充信息则直接返回给用户；
//! 两者都不满足时带着评估意见让同一 worker 重试，直到重试上限。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::{FallbackController, OrchestratorError};
use crate::llm::LlmRequest;
use crate::memory::Message;
use crate::node_config::{ConfigCache, NODE_EVALUATOR};

/// 评估结果；score 限定在 0..=100
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(default)]
    pub feedback: String,
    #[serde(alias = "successCriteriaMet")]
    pub success_criteria_met: bool,
    #[serde(default, alias = "userInputNeeded")]
    pub user_input_needed: bool,
    #[serde(default, deserialize_with = "clamped_score")]
    pub score: u8,
}

impl EvaluationResult {
    pub fn accepted(score: u8) -> Self {
        Self {
            feedback: String::new(),
            success_criteria_met: true,
            user_input_needed: false,
            score: score.min(100),
        }
    }

    pub fn rejected(feedback: impl Into<String>, score: u8) -> Self {
        Self {
            feedback: feedback.into(),
            success_criteria_met: false,
            user_input_needed: false,
            score: score.min(100),
        }
    }

    pub fn needs_user_input(feedback: impl Into<String>) -> Self {
        Self {
            feedback: feedback.into(),
            success_criteria_met: false,
            user_input_needed: true,
            score: 0,
        }
    }
}

fn clamped_score<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
    let raw = f64::deserialize(d)?;
    Ok(raw.round().clamp(0.0, 100.0) as u8)
}

#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("Evaluator call failed: {0}")]
    Call(#[from] OrchestratorError),

    #[error("Evaluator answer is not a valid evaluation: {0}")]
    Parse(String),
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        user_id: &str,
        original_request: &str,
        output: &str,
        cancel: &CancellationToken,
    ) -> Result<EvaluationResult, EvaluatorError>;
}

/// 重试决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Accept,
    /// 停止并把结果 / 问题交给用户
    NeedsUserInput,
    /// 带着意见重试
    Retry { feedback: String },
    CeilingReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 首次尝试之外的最多重试次数
    pub max_retries: usize,
}

impl RetryPolicy {
    pub fn new(max_retries: usize) -> Self {
        Self { max_retries }
    }

    /// attempts：包括本次在内已产出的输出数（从 1 开始）
    pub fn decide(&self, evaluation: &EvaluationResult, attempts: usize) -> RetryDecision {
        if evaluation.user_input_needed {
            return RetryDecision::NeedsUserInput;
        }
        if evaluation.success_criteria_met {
            return RetryDecision::Accept;
        }
        if attempts.saturating_sub(1) < self.max_retries {
            RetryDecision::Retry {
                feedback: evaluation.feedback.clone(),
            }
        } else {
            RetryDecision::CeilingReached
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

pub const DEFAULT_EVALUATION_PROMPT: &str = "You review an assistant's answer inside a CRM application.\n\n\
User request:\n{request}\n\n\
Assistant answer:\n{output}\n\n\
Reply with a single JSON object and nothing else:\n\
{\"feedback\": \"<what to improve>\", \"success_criteria_met\": true|false, \"user_input_needed\": true|false, \"score\": 0-100}\n\
Set user_input_needed to true when the answer rightly asks the user for missing information.";

/// 文本中第一个完整的 JSON 对象（模型常在 JSON 外包一层说明或代码块）
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse_evaluation(answer: &str) -> Result<EvaluationResult, EvaluatorError> {
    let json = extract_json_object(answer)
        .ok_or_else(|| EvaluatorError::Parse(format!("no JSON object in: {}", answer.trim())))?;
    serde_json::from_str(json).map_err(|e| EvaluatorError::Parse(e.to_string()))
}

/// 由 "evaluator" 节点的模型打分
pub struct ModelEvaluator {
    cache: Arc<ConfigCache>,
    fallback: Arc<FallbackController>,
    prompt_template: String,
}

impl ModelEvaluator {
    pub fn new(cache: Arc<ConfigCache>, fallback: Arc<FallbackController>) -> Self {
        Self {
            cache,
            fallback,
            prompt_template: DEFAULT_EVALUATION_PROMPT.to_string(),
        }
    }

    /// 覆盖提示词模板（占位符 {request} / {output}）
    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }
}

#[async_trait]
impl Evaluator for ModelEvaluator {
    async fn evaluate(
        &self,
        user_id: &str,
        original_request: &str,
        output: &str,
        cancel: &CancellationToken,
    ) -> Result<EvaluationResult, EvaluatorError> {
        let prompt = self
            .prompt_template
            .replace("{request}", original_request)
            .replace("{output}", output);
        let resolved = self.cache.resolve(user_id, NODE_EVALUATOR).await;
        let request = LlmRequest::new(&resolved.model, vec![Message::user(prompt)]);
        let completion = self.fallback.execute(&resolved, request, cancel).await?;
        parse_evaluation(&completion.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ProviderRegistry, ScriptedLlmClient, ScriptedReply};
    use crate::node_config::{NodeDefaults, StaticConfigService};

    #[test]
    fn test_parse_snake_and_camel_case() {
        let snake = parse_evaluation(
            r#"{"feedback":"fine","success_criteria_met":true,"user_input_needed":false,"score":91}"#,
        )
        .unwrap();
        assert_eq!(snake, EvaluationResult { feedback: "fine".into(), ..EvaluationResult::accepted(91) });

        let camel = parse_evaluation(
            "Here you go:\n```json\n{\"feedback\": \"say {hi}\", \"successCriteriaMet\": false, \"userInputNeeded\": true, \"score\": 140}\n```",
        )
        .unwrap();
        assert!(camel.user_input_needed);
        assert_eq!(camel.feedback, "say {hi}");
        assert_eq!(camel.score, 100);
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(parse_evaluation("looks good"), Err(EvaluatorError::Parse(_))));
        assert!(matches!(parse_evaluation("{\"score\": 3"), Err(EvaluatorError::Parse(_))));
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::new(2);
        let bad = EvaluationResult::rejected("missing totals", 30);

        assert_eq!(policy.decide(&EvaluationResult::accepted(90), 1), RetryDecision::Accept);
        assert_eq!(
            policy.decide(&EvaluationResult::needs_user_input("which account?"), 1),
            RetryDecision::NeedsUserInput
        );
        assert_eq!(
            policy.decide(&bad, 1),
            RetryDecision::Retry { feedback: "missing totals".into() }
        );
        assert!(matches!(policy.decide(&bad, 2), RetryDecision::Retry { .. }));
        assert_eq!(policy.decide(&bad, 3), RetryDecision::CeilingReached);
        assert_eq!(RetryPolicy::new(0).decide(&bad, 1), RetryDecision::CeilingReached);
    }

    #[tokio::test]
    async fn test_model_evaluator_fills_template() {
        let client = Arc::new(ScriptedLlmClient::new().script(
            "gpt-4o-mini",
            ScriptedReply::Text(r#"{"feedback":"","success_criteria_met":true,"score":80}"#.into()),
        ));
        let cache = Arc::new(ConfigCache::new(
            Arc::new(StaticConfigService::new()),
            NodeDefaults::builtin("mock"),
        ));
        let fallback = Arc::new(FallbackController::new(Arc::new(ProviderRegistry::single(client.clone()))));
        let evaluator = ModelEvaluator::new(cache, fallback).with_prompt_template("Q={request} A={output}");

        let result = evaluator
            .evaluate("u1", "list deals", "no deals", &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success_criteria_met);
        assert_eq!(result.score, 80);
        let calls = client.calls();
        assert_eq!(calls[0].request.messages[0].content, "Q=list deals A=no deals");
    }
}
