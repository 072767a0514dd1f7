//! 路由：每轮对话恰好选出一个 worker
//!
//! - KeywordRouter：正则规则，按 job_search → writer_worker → crm_worker 的优先级匹配；
//!   最新消息没有命中时回看最近几条用户消息，仍无命中则 general_worker
//! - ModelRouter：先走关键词快速匹配，否则调用 "router" 节点的模型分类，失败一律 general_worker

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::node::NodeName;
use crate::core::FallbackController;
use crate::llm::LlmRequest;
use crate::memory::{Message, Role};
use crate::node_config::{ConfigCache, NODE_ROUTER};

/// 路由输入
#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    pub user_id: String,
    pub message: String,
    /// 窗口内的历史（不含本轮消息）
    pub history: Vec<Message>,
}

impl RouteContext {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            user_id: user_id.into(),
            message: message.into(),
            history,
        }
    }
}

#[async_trait]
pub trait Router: Send + Sync {
    /// 总是返回且只返回一个节点
    async fn route(&self, context: &RouteContext, cancel: &CancellationToken) -> NodeName;
}

const BUILTIN_RULES: [(NodeName, &str); 3] = [
    (
        NodeName::JobSearch,
        r"(?i)\b(jobs?|careers?|hiring|vacanc(y|ies)|openings?|positions?|recruit\w*|resumes?|cv)\b",
    ),
    (
        NodeName::WriterWorker,
        r"(?i)\b(write|draft|compose|rewrite|e-?mails?|letters?|newsletters?|follow[- ]?up)\b",
    ),
    (
        NodeName::CrmWorker,
        r"(?i)\b(contacts?|deals?|pipeline|organi[sz]ations?|compan(y|ies)|leads?|tasks?|crm|accounts?|reports?)\b",
    ),
];

const DEFAULT_LOOKBACK: usize = 2;

pub struct KeywordRouter {
    /// 按优先级排列
    rules: Vec<(NodeName, Regex)>,
    /// 最新消息未命中时回看的用户消息条数
    lookback: usize,
}

impl KeywordRouter {
    pub fn with_rules(rules: &[(NodeName, &str)]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(node, pattern)| Regex::new(pattern).map(|re| (*node, re)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            lookback: DEFAULT_LOOKBACK,
        })
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }

    /// 单条文本命中的最高优先级节点
    pub fn match_text(&self, text: &str) -> Option<NodeName> {
        self.rules
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(node, _)| *node)
    }

    pub fn classify(&self, context: &RouteContext) -> NodeName {
        if let Some(node) = self.match_text(&context.message) {
            return node;
        }
        context
            .history
            .iter()
            .rev()
            .filter(|m| m.role == Role::User)
            .take(self.lookback)
            .find_map(|m| self.match_text(&m.content))
            .unwrap_or(NodeName::GeneralWorker)
    }
}

impl Default for KeywordRouter {
    fn default() -> Self {
        Self::with_rules(&BUILTIN_RULES).unwrap_or_else(|e| {
            tracing::error!("Invalid builtin routing rule: {}", e);
            Self {
                rules: Vec::new(),
                lookback: DEFAULT_LOOKBACK,
            }
        })
    }
}

#[async_trait]
impl Router for KeywordRouter {
    async fn route(&self, context: &RouteContext, _cancel: &CancellationToken) -> NodeName {
        self.classify(context)
    }
}

const CLASSIFY_PROMPT: &str = "Classify the user's latest message in a CRM assistant. \
Answer with exactly one of: job_search, crm_worker, writer_worker, general_worker.\n\n\
Recent conversation:\n{history}\n\nLatest message:\n{message}";

/// 从模型回答中找出节点名：先整体解析，再取最早出现的节点名
pub fn parse_route_answer(answer: &str) -> Option<NodeName> {
    if let Ok(node) = answer.parse::<NodeName>() {
        return Some(node);
    }
    let lower = answer.to_lowercase();
    NodeName::ALL
        .into_iter()
        .filter_map(|node| lower.find(node.as_str()).map(|pos| (pos, node)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, node)| node)
}

/// 关键词快速路径 + 模型分类
pub struct ModelRouter {
    keywords: KeywordRouter,
    cache: Arc<ConfigCache>,
    fallback: Arc<FallbackController>,
}

impl ModelRouter {
    pub fn new(cache: Arc<ConfigCache>, fallback: Arc<FallbackController>) -> Self {
        Self {
            keywords: KeywordRouter::default(),
            cache,
            fallback,
        }
    }

    pub fn with_keywords(mut self, keywords: KeywordRouter) -> Self {
        self.keywords = keywords;
        self
    }

    fn prompt(context: &RouteContext) -> String {
        let history: Vec<String> = context
            .history
            .iter()
            .rev()
            .take(6)
            .rev()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect();
        CLASSIFY_PROMPT
            .replace("{history}", &history.join("\n"))
            .replace("{message}", &context.message)
    }
}

#[async_trait]
impl Router for ModelRouter {
    async fn route(&self, context: &RouteContext, cancel: &CancellationToken) -> NodeName {
        if let Some(node) = self.keywords.match_text(&context.message) {
            return node;
        }

        let resolved = self.cache.resolve(&context.user_id, NODE_ROUTER).await;
        let request = LlmRequest::new(&resolved.model, vec![Message::user(Self::prompt(context))]);
        match self.fallback.execute(&resolved, request, cancel).await {
            Ok(completion) => parse_route_answer(&completion.content).unwrap_or_else(|| {
                tracing::warn!(answer = %completion.content, "Unparseable route answer, using general_worker");
                NodeName::GeneralWorker
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Route classification failed, using general_worker");
                NodeName::GeneralWorker
            }
        }
    }
}
