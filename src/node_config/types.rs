//! 节点配置类型：NodeConfig / ModelTier / 配置服务返回的原始记录

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::GenerationSettings;

/// 用户 ID（不透明字符串）
pub type UserId = String;

/// 回退链中的一级：模型 + 首 token 最长等待时间
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTier {
    pub model: String,
    #[serde(
        rename = "first_token_timeout_ms",
        alias = "firstTokenTimeoutMs",
        alias = "timeout_ms",
        with = "duration_ms"
    )]
    pub first_token_timeout: Duration,
}

impl ModelTier {
    pub fn new(model: impl Into<String>, first_token_timeout: Duration) -> Self {
        Self {
            model: model.into(),
            first_token_timeout,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// 解析 fallbackChainJson（JSON 数组）
pub fn parse_fallback_chain(json: &str) -> Result<Vec<ModelTier>, serde_json::Error> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json)
}

/// 某用户某节点的完整配置
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub model: String,
    pub provider: String,
    pub settings: GenerationSettings,
    /// 为空表示该节点不启用分级回退
    pub fallback_chain: Vec<ModelTier>,
}

/// 配置服务返回的单节点记录
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfigRecord {
    pub node_name: String,
    pub model: String,
    pub provider: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub fallback_chain_json: Option<String>,
}

impl NodeConfigRecord {
    pub fn new(node_name: &str, model: &str, provider: &str) -> Self {
        Self {
            node_name: node_name.to_string(),
            model: model.to_string(),
            provider: provider.to_string(),
            ..Default::default()
        }
    }

    pub fn with_chain_json(mut self, json: impl Into<String>) -> Self {
        self.fallback_chain_json = Some(json.into());
        self
    }

    /// 转换为 NodeConfig；链 JSON 无法解析时记日志并视为空链
    pub fn into_node_config(self) -> (String, NodeConfig) {
        let fallback_chain = match self.fallback_chain_json.as_deref() {
            Some(json) => parse_fallback_chain(json).unwrap_or_else(|e| {
                tracing::warn!(
                    node = %self.node_name,
                    error = %e,
                    "Invalid fallback chain JSON, promotion disabled for node"
                );
                Vec::new()
            }),
            None => Vec::new(),
        };
        let config = NodeConfig {
            model: self.model,
            provider: self.provider,
            settings: GenerationSettings {
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                top_p: self.top_p,
                top_k: self.top_k,
                frequency_penalty: self.frequency_penalty,
                presence_penalty: self.presence_penalty,
            },
            fallback_chain,
        };
        (self.node_name, config)
    }
}

/// 缓存解析结果：model / provider / settings 已按需回落默认值，链不回落
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNode {
    pub node: String,
    pub model: String,
    pub provider: String,
    pub settings: GenerationSettings,
    pub fallback_chain: Vec<ModelTier>,
}
