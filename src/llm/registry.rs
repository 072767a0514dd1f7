//! Provider 注册表：provider 名 -> 客户端
//!
//! NodeConfig 里的 provider 字段在这里解析成具体客户端；未知 provider 回落到默认客户端。

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};

pub const PROVIDER_OPENAI: &str = "openai";
pub const PROVIDER_DEEPSEEK: &str = "deepseek";
pub const PROVIDER_MOCK: &str = "mock";

pub struct ProviderRegistry {
    clients: HashMap<String, Arc<dyn LlmClient>>,
    default_provider: String,
}

impl ProviderRegistry {
    pub fn new(default_provider: impl Into<String>, default_client: Arc<dyn LlmClient>) -> Self {
        let default_provider = default_provider.into().to_lowercase();
        let mut clients = HashMap::new();
        clients.insert(default_provider.clone(), default_client);
        Self {
            clients,
            default_provider,
        }
    }

    /// 单一客户端服务所有 provider（测试常用）
    pub fn single(client: Arc<dyn LlmClient>) -> Self {
        Self::new(PROVIDER_MOCK, client)
    }

    pub fn register(&mut self, provider: impl Into<String>, client: Arc<dyn LlmClient>) {
        self.clients.insert(provider.into().to_lowercase(), client);
    }

    pub fn with(mut self, provider: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        self.register(provider, client);
        self
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.clients.contains_key(&provider.to_lowercase())
    }

    /// 按 provider 名取客户端，未注册时回落到默认
    pub fn get(&self, provider: &str) -> Arc<dyn LlmClient> {
        if let Some(client) = self.clients.get(&provider.to_lowercase()) {
            return Arc::clone(client);
        }
        tracing::warn!(
            provider,
            fallback = %self.default_provider,
            "Unknown provider, using default client"
        );
        self.default_client()
    }

    pub fn default_client(&self) -> Arc<dyn LlmClient> {
        self.clients
            .get(&self.default_provider)
            .cloned()
            .unwrap_or_else(|| Arc::new(MockLlmClient))
    }

    /// 根据配置与环境变量注册后端（OpenAI 兼容 / DeepSeek / Mock）
    pub fn from_config(cfg: &AppConfig) -> Self {
        let mut registry = Self::new(PROVIDER_MOCK, Arc::new(MockLlmClient));

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            tracing::info!("Registering OpenAI provider");
            registry.register(
                PROVIDER_OPENAI,
                Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &key)),
            );
        }
        if let Ok(key) = std::env::var("DEEPSEEK_API_KEY") {
            tracing::info!("Registering DeepSeek provider");
            registry.register(PROVIDER_DEEPSEEK, Arc::new(OpenAiClient::deepseek(&key)));
        }

        let wanted = cfg.llm.provider.to_lowercase();
        if registry.contains(&wanted) {
            registry.default_provider = wanted;
        } else {
            tracing::warn!(provider = %wanted, "No API key set or provider unknown, using Mock LLM");
        }
        registry
    }
}
