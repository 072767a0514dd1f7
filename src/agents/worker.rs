//! Worker：统一的调用契约
//!
//! 路由选出一个 NodeName 后由 WorkerRegistry 找到对应 worker 调用；
//! ModelWorker 按用户解析节点配置，组装请求后交给 FallbackController 执行。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::node::{Capability, NodeName};
use crate::core::{Completion, FallbackController, OrchestratorError};
use crate::llm::LlmRequest;
use crate::memory::{render_facts, Message, UserFact};
use crate::node_config::ConfigCache;

/// 一次 worker 调用的输入
#[derive(Debug, Clone, Default)]
pub struct WorkerInvocation {
    pub user_id: String,
    pub user_message: String,
    /// 已按 token 预算截取的历史（不含本轮用户消息）
    pub history: Vec<Message>,
    pub facts: Vec<UserFact>,
    /// 评估器对上一次输出的意见（重试时）
    pub feedback: Option<String>,
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn node(&self) -> NodeName;

    fn capability(&self) -> &Capability;

    async fn invoke(
        &self,
        invocation: &WorkerInvocation,
        cancel: &CancellationToken,
    ) -> Result<Completion, OrchestratorError>;
}

/// 组装发给模型的消息：system（指令 + 用户事实 + 评估意见）→ 历史 → 本轮用户消息
pub fn build_messages(capability: &Capability, invocation: &WorkerInvocation) -> Vec<Message> {
    let mut system = capability.instructions.clone();
    if let Some(facts) = render_facts(&invocation.facts) {
        system.push_str("\n\n");
        system.push_str(&facts);
    }
    if let Some(feedback) = &invocation.feedback {
        system.push_str("\n\nA reviewer rejected your previous answer to this request:\n");
        system.push_str(feedback);
        system.push_str("\nAddress the feedback in your new answer.");
    }

    let mut messages = Vec::with_capacity(invocation.history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(invocation.history.iter().cloned());
    messages.push(Message::user(invocation.user_message.clone()));
    messages
}

/// 以模型调用实现的 worker
pub struct ModelWorker {
    node: NodeName,
    capability: Capability,
    cache: Arc<ConfigCache>,
    fallback: Arc<FallbackController>,
}

impl ModelWorker {
    pub fn new(node: NodeName, cache: Arc<ConfigCache>, fallback: Arc<FallbackController>) -> Self {
        Self {
            node,
            capability: node.capability(),
            cache,
            fallback,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }
}

#[async_trait]
impl Worker for ModelWorker {
    fn node(&self) -> NodeName {
        self.node
    }

    fn capability(&self) -> &Capability {
        &self.capability
    }

    async fn invoke(
        &self,
        invocation: &WorkerInvocation,
        cancel: &CancellationToken,
    ) -> Result<Completion, OrchestratorError> {
        let resolved = self.cache.resolve(&invocation.user_id, self.node.as_str()).await;
        tracing::debug!(
            node = %self.node,
            model = %resolved.model,
            provider = %resolved.provider,
            tiers = resolved.fallback_chain.len(),
            "Invoking worker"
        );
        let request = LlmRequest::new(&resolved.model, build_messages(&self.capability, invocation))
            .with_tools(self.capability.tools.clone());
        self.fallback.execute(&resolved, request, cancel).await
    }
}

/// NodeName -> worker
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<NodeName, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 四个内置节点全部由 ModelWorker 提供
    pub fn standard(cache: Arc<ConfigCache>, fallback: Arc<FallbackController>) -> Self {
        let mut registry = Self::new();
        for node in NodeName::ALL {
            registry.register(Arc::new(ModelWorker::new(
                node,
                Arc::clone(&cache),
                Arc::clone(&fallback),
            )));
        }
        registry
    }

    /// 注册 / 替换节点的 worker
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.node(), worker);
    }

    pub fn get(&self, node: NodeName) -> Result<Arc<dyn Worker>, OrchestratorError> {
        self.workers
            .get(&node)
            .cloned()
            .ok_or_else(|| OrchestratorError::WorkerUnavailable(node.to_string()))
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
