//! 单轮对话编排
//!
//! 一轮对话：路由选出 worker → 缓存解析该用户的节点配置 → FallbackController 调用模型
//! →（可选）评估器检查并按 RetryPolicy 重试 → 会话追加本轮 user / assistant 消息。
//!
//! 只有被接受（或需要用户补充信息）的结果才写入会话；失败、取消、重试超限都不留下记录。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agents::{
    EvaluationResult, Evaluator, EvaluatorError, KeywordRouter, ModelEvaluator, ModelRouter, NodeName,
    RetryDecision, RetryPolicy, RouteContext, Router, Worker, WorkerInvocation, WorkerRegistry,
};
use crate::config::{AppConfig, RouterStrategy};
use crate::core::{FallbackController, OrchestratorError};
use crate::llm::ProviderRegistry;
use crate::memory::{Message, SessionStore};
use crate::node_config::ConfigCache;

/// 一轮对话的结果
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub node: NodeName,
    /// 实际给出回复的模型
    pub model: String,
    /// worker 被调用的次数（含重试）
    pub attempts: usize,
    /// 最后一次评估；未启用评估器或评估失败时为 None
    pub evaluation: Option<EvaluationResult>,
}

pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    cache: Arc<ConfigCache>,
    router: Arc<dyn Router>,
    workers: WorkerRegistry,
    evaluator: Option<Arc<dyn Evaluator>>,
    retry: RetryPolicy,
    history_token_budget: usize,
}

impl Orchestrator {
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn config_cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }

    /// 处理一轮用户输入；会话不存在时自动创建
    pub async fn handle_turn(
        &self,
        session_id: &str,
        user_id: &str,
        user_message: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, OrchestratorError> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        self.ensure_session(session_id, user_id).await?;

        let history = self
            .sessions
            .get_messages(session_id, self.history_token_budget)
            .await?;
        let facts = self.sessions.get_user_memory(user_id).await;

        let context = RouteContext::new(user_id, user_message, history);
        let node = self.router.route(&context, cancel).await;
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let worker = self.workers.get(node)?;
        tracing::info!(session_id, user_id, node = %node, "Turn routed");

        let invocation = WorkerInvocation {
            user_id: user_id.to_string(),
            user_message: user_message.to_string(),
            history: context.history,
            facts,
            feedback: None,
        };
        let (completion, attempts, evaluation) =
            self.run_with_evaluation(worker.as_ref(), invocation, cancel).await?;

        self.sessions
            .add_messages(
                session_id,
                [
                    Message::user(user_message),
                    Message::assistant(completion.content.clone()),
                ],
            )
            .await?;

        tracing::info!(
            session_id,
            node = %node,
            model = %completion.model,
            attempts,
            "Turn completed"
        );
        Ok(TurnOutcome {
            response: completion.content,
            node,
            model: completion.model,
            attempts,
            evaluation,
        })
    }

    /// 调用 worker，按评估结果重试
    async fn run_with_evaluation(
        &self,
        worker: &dyn Worker,
        mut invocation: WorkerInvocation,
        cancel: &CancellationToken,
    ) -> Result<(crate::core::Completion, usize, Option<EvaluationResult>), OrchestratorError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let completion = worker.invoke(&invocation, cancel).await?;

            let Some(evaluator) = &self.evaluator else {
                return Ok((completion, attempts, None));
            };
            let evaluation = match evaluator
                .evaluate(
                    &invocation.user_id,
                    &invocation.user_message,
                    &completion.content,
                    cancel,
                )
                .await
            {
                Ok(evaluation) => evaluation,
                Err(EvaluatorError::Call(e)) if e.is_cancelled() => {
                    return Err(OrchestratorError::Cancelled);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Evaluation failed, accepting output");
                    return Ok((completion, attempts, None));
                }
            };

            match self.retry.decide(&evaluation, attempts) {
                RetryDecision::Accept | RetryDecision::NeedsUserInput => {
                    return Ok((completion, attempts, Some(evaluation)));
                }
                RetryDecision::Retry { feedback } => {
                    tracing::info!(
                        node = %worker.node(),
                        attempt = attempts,
                        score = evaluation.score,
                        "Evaluator requested retry"
                    );
                    invocation.feedback = Some(feedback);
                }
                RetryDecision::CeilingReached => {
                    tracing::warn!(node = %worker.node(), attempts, "Retry ceiling reached");
                    return Err(OrchestratorError::RetryCeilingReached {
                        attempts,
                        last_output: completion.content,
                    });
                }
            }
        }
    }

    /// 会话不存在则创建；并发创建时另一方先建好也算成功
    async fn ensure_session(&self, session_id: &str, user_id: &str) -> Result<(), OrchestratorError> {
        if self.sessions.session_exists(session_id).await {
            return Ok(());
        }
        match self.sessions.create_session(session_id, user_id).await {
            Ok(_) | Err(OrchestratorError::SessionAlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// 用户配置被外部修改后调用
    pub async fn invalidate_user_config(&self, user_id: &str) {
        self.cache.invalidate(user_id).await;
    }

    /// 滑动窗口内的会话历史
    pub async fn get_session_history(
        &self,
        session_id: &str,
        token_budget: usize,
    ) -> Result<Vec<Message>, OrchestratorError> {
        self.sessions.get_messages(session_id, token_budget).await
    }
}

/// Orchestrator 构建器
pub struct OrchestratorBuilder {
    cache: Arc<ConfigCache>,
    providers: Arc<ProviderRegistry>,
    sessions: Option<Arc<SessionStore>>,
    router: Option<Arc<dyn Router>>,
    router_strategy: RouterStrategy,
    workers: Option<WorkerRegistry>,
    evaluator: Option<Arc<dyn Evaluator>>,
    model_evaluator: bool,
    evaluation_prompt: Option<String>,
    retry: RetryPolicy,
    history_token_budget: usize,
    chars_per_token: usize,
}

impl OrchestratorBuilder {
    pub fn new(cache: Arc<ConfigCache>, providers: Arc<ProviderRegistry>) -> Self {
        let defaults = AppConfig::default();
        Self {
            cache,
            providers,
            sessions: None,
            router: None,
            router_strategy: RouterStrategy::Keyword,
            workers: None,
            evaluator: None,
            model_evaluator: false,
            evaluation_prompt: None,
            retry: RetryPolicy::new(defaults.evaluator.max_retries),
            history_token_budget: defaults.session.history_token_budget,
            chars_per_token: defaults.session.chars_per_token,
        }
    }

    /// 应用 [session] / [router] / [evaluator] 段
    pub fn with_config(mut self, cfg: &AppConfig) -> Self {
        self.history_token_budget = cfg.session.history_token_budget;
        self.chars_per_token = cfg.session.chars_per_token;
        self.router_strategy = cfg.router.strategy;
        self.model_evaluator = cfg.evaluator.enabled;
        self.retry = RetryPolicy::new(cfg.evaluator.max_retries);
        self.evaluation_prompt = cfg.evaluator.prompt_template.clone();
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_workers(mut self, workers: WorkerRegistry) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_history_token_budget(mut self, budget: usize) -> Self {
        self.history_token_budget = budget;
        self
    }

    pub fn build(self) -> Orchestrator {
        let fallback = Arc::new(FallbackController::new(Arc::clone(&self.providers)));
        let cache = self.cache;

        let router = self.router.unwrap_or_else(|| match self.router_strategy {
            RouterStrategy::Keyword => Arc::new(KeywordRouter::default()) as Arc<dyn Router>,
            RouterStrategy::Model => {
                Arc::new(ModelRouter::new(Arc::clone(&cache), Arc::clone(&fallback))) as Arc<dyn Router>
            }
        });
        let workers = self
            .workers
            .unwrap_or_else(|| WorkerRegistry::standard(Arc::clone(&cache), Arc::clone(&fallback)));

        let evaluator = self.evaluator.or_else(|| {
            self.model_evaluator.then(|| {
                let mut evaluator = ModelEvaluator::new(Arc::clone(&cache), Arc::clone(&fallback));
                if let Some(template) = self.evaluation_prompt {
                    evaluator = evaluator.with_prompt_template(template);
                }
                Arc::new(evaluator) as Arc<dyn Evaluator>
            })
        });

        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(SessionStore::new(self.chars_per_token)));

        tracing::info!(
            workers = workers.len(),
            evaluator = evaluator.is_some(),
            history_token_budget = self.history_token_budget,
            "Orchestrator ready"
        );
        Orchestrator {
            sessions,
            cache,
            router,
            workers,
            evaluator,
            retry: self.retry,
            history_token_budget: self.history_token_budget,
        }
    }
}
