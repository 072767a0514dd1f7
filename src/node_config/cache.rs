//! 用户节点配置缓存
//!
//! 回答「用户 U 的节点 N 该用哪个 model / provider / 参数 / 回退链」。
//!
//! - 冷用户（从未加载，或上次加载失败）任意一次未命中：向配置服务一次性加载该用户全部节点，再查一次
//! - 已加载用户的未命中：直接用默认值，不重复加载，直到 invalidate
//! - 加载失败：不报错，保留原状态并返回默认值；下一次未命中会再次尝试
//! - 同一冷用户的并发未命中只发出一次加载，其余调用等待该次加载的结果
//! - 写锁只包住写入加载结果的那一步，不跨越对配置服务的调用
//! - invalidate 递增用户代数，失效前发出的加载结果到达后被丢弃

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::defaults::NodeDefaults;
use super::service::ConfigService;
use super::types::{ModelTier, NodeConfig, ResolvedNode, UserId};
use crate::core::OrchestratorError;
use crate::llm::GenerationSettings;

#[derive(Default)]
struct CacheState {
    /// 已加载用户：节点名 -> 配置（可能为空表）
    users: HashMap<UserId, HashMap<String, NodeConfig>>,
    /// 每次 invalidate 递增
    generations: HashMap<UserId, u64>,
}

impl CacheState {
    fn generation(&self, user_id: &str) -> u64 {
        self.generations.get(user_id).copied().unwrap_or(0)
    }
}

/// 单个用户的加载槽：同一时刻只有持锁者调用配置服务
#[derive(Default)]
struct LoadSlot {
    lock: Mutex<()>,
    /// 已完成的加载次数（成功、失败或被丢弃都算）
    attempts: AtomicU64,
}

/// 节点配置缓存（进程内构造一次，注入各组件）
pub struct ConfigCache {
    service: Arc<dyn ConfigService>,
    defaults: NodeDefaults,
    state: RwLock<CacheState>,
    slots: Mutex<HashMap<UserId, Arc<LoadSlot>>>,
}

impl ConfigCache {
    pub fn new(service: Arc<dyn ConfigService>, defaults: NodeDefaults) -> Self {
        Self {
            service,
            defaults,
            state: RwLock::new(CacheState::default()),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn defaults(&self) -> &NodeDefaults {
        &self.defaults
    }

    /// 查找缓存条目，冷用户触发一次整体加载
    async fn lookup(&self, user_id: &str, node: &str) -> Option<NodeConfig> {
        let seen_generation = {
            let state = self.state.read().await;
            if let Some(nodes) = state.users.get(user_id) {
                return nodes.get(node).cloned();
            }
            state.generation(user_id)
        };

        let slot = self.slot(user_id).await;
        let seen_attempts = slot.attempts.load(Ordering::SeqCst);
        let _loading = slot.lock.lock().await;

        let generation = {
            let state = self.state.read().await;
            if let Some(nodes) = state.users.get(user_id) {
                return nodes.get(node).cloned();
            }
            state.generation(user_id)
        };
        // 等待期间同一代已完成过一次加载（失败也算）：沿用其结果，不再重复调用
        let shared = slot.attempts.load(Ordering::SeqCst) != seen_attempts && generation == seen_generation;
        if !shared && self.load_user(user_id, generation).await {
            slot.attempts.fetch_add(1, Ordering::SeqCst);
        }

        self.cached(user_id, node).await.flatten()
    }

    /// 外层 None：用户未加载；内层 None：已加载但该节点没有配置
    async fn cached(&self, user_id: &str, node: &str) -> Option<Option<NodeConfig>> {
        let state = self.state.read().await;
        state.users.get(user_id).map(|nodes| nodes.get(node).cloned())
    }

    async fn slot(&self, user_id: &str) -> Arc<LoadSlot> {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(user_id.to_string()).or_default())
    }

    /// 返回本次加载是否属于当前代（被 invalidate 取代时为 false）
    async fn load_user(&self, user_id: &str, generation: u64) -> bool {
        let loaded = match self.service.get_user_config(user_id).await {
            Ok(config) => config,
            Err(e) => {
                let err = OrchestratorError::ConfigLoadFailed {
                    user_id: user_id.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!("{}, falling back to defaults", err);
                return self.state.read().await.generation(user_id) == generation;
            }
        };

        let nodes: HashMap<String, NodeConfig> = loaded
            .nodes
            .into_iter()
            .map(|record| record.into_node_config())
            .collect();

        let mut state = self.state.write().await;
        if state.generation(user_id) != generation {
            tracing::debug!(user_id, "Discarding config load superseded by invalidation");
            return false;
        }
        tracing::debug!(user_id, nodes = nodes.len(), "User node config loaded");
        state.users.insert(user_id.to_string(), nodes);
        true
    }

    pub async fn get_model(&self, user_id: &str, node: &str) -> String {
        match self.lookup(user_id, node).await {
            Some(config) => config.model,
            None => self.defaults.get(node).model.clone(),
        }
    }

    pub async fn get_provider(&self, user_id: &str, node: &str) -> String {
        match self.lookup(user_id, node).await {
            Some(config) => config.provider,
            None => self.defaults.get(node).provider.clone(),
        }
    }

    /// 未缓存时返回空参数
    pub async fn get_settings(&self, user_id: &str, node: &str) -> GenerationSettings {
        self.lookup(user_id, node)
            .await
            .map(|config| config.settings)
            .unwrap_or_default()
    }

    /// 回退链：没有显式配置时为空（不提供默认链）
    pub async fn get_model_chain(&self, user_id: &str, node: &str) -> Vec<ModelTier> {
        self.lookup(user_id, node)
            .await
            .map(|config| config.fallback_chain)
            .unwrap_or_default()
    }

    /// 一次查找解析出节点的全部配置
    pub async fn resolve(&self, user_id: &str, node: &str) -> ResolvedNode {
        match self.lookup(user_id, node).await {
            Some(config) => ResolvedNode {
                node: node.to_string(),
                model: config.model,
                provider: config.provider,
                settings: config.settings,
                fallback_chain: config.fallback_chain,
            },
            None => {
                let default = self.defaults.get(node);
                ResolvedNode {
                    node: node.to_string(),
                    model: default.model.clone(),
                    provider: default.provider.clone(),
                    settings: GenerationSettings::default(),
                    fallback_chain: Vec::new(),
                }
            }
        }
    }

    /// 丢弃该用户全部缓存；外部更新用户配置后必须调用
    pub async fn invalidate(&self, user_id: &str) {
        let mut state = self.state.write().await;
        state.users.remove(user_id);
        *state.generations.entry(user_id.to_string()).or_insert(0) += 1;
        tracing::info!(user_id, "User node config invalidated");
    }

    /// 该用户是否已成功加载过
    pub async fn is_loaded(&self, user_id: &str) -> bool {
        self.state.read().await.users.contains_key(user_id)
    }

    pub async fn cached_users(&self) -> usize {
        self.state.read().await.users.len()
    }
}
