//! 会话存储
//!
//! 按 session_id 保存只追加的消息历史，并组合用户事实记忆。
//! 读多写少：查询走读锁，追加 / 创建只在修改期间持有写锁。

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::conversation::{Message, SessionId, SessionState};
use super::token_budget::TokenEstimator;
use super::user_memory::{UserFact, UserMemoryManager};
use crate::core::OrchestratorError;

/// 生成新的会话 ID
pub fn new_session_id() -> SessionId {
    format!("session_{}", uuid::Uuid::new_v4())
}

/// 内存会话存储
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionState>>,
    user_memory: UserMemoryManager,
    estimator: TokenEstimator,
}

impl SessionStore {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            user_memory: UserMemoryManager::new(),
            estimator: TokenEstimator::new(chars_per_token),
        }
    }

    pub fn estimator(&self) -> TokenEstimator {
        self.estimator
    }

    /// 获取会话快照
    pub async fn get_session(&self, session_id: &str) -> Result<SessionState, OrchestratorError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))
    }

    pub async fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// 创建会话；已存在时报错而不是覆盖
    pub async fn create_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<SessionState, OrchestratorError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session_id) {
            return Err(OrchestratorError::SessionAlreadyExists(session_id.to_string()));
        }
        let state = SessionState::new(session_id, user_id);
        sessions.insert(session_id.to_string(), state.clone());
        tracing::debug!(session_id, user_id, "Session created");
        Ok(state)
    }

    /// 追加一条消息
    pub async fn add_message(
        &self,
        session_id: &str,
        message: Message,
    ) -> Result<(), OrchestratorError> {
        self.add_messages(session_id, [message]).await
    }

    /// 在同一次写锁内追加多条消息，保证它们在历史中相邻
    pub async fn add_messages(
        &self,
        session_id: &str,
        messages: impl IntoIterator<Item = Message>,
    ) -> Result<(), OrchestratorError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;
        session.messages.extend(messages);
        Ok(())
    }

    /// 滑动窗口：返回能放进 token_budget 的最长后缀
    pub async fn get_messages(
        &self,
        session_id: &str,
        token_budget: usize,
    ) -> Result<Vec<Message>, OrchestratorError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;
        Ok(self.estimator.window(&session.messages, token_budget))
    }

    pub async fn get_user_memory(&self, user_id: &str) -> Vec<UserFact> {
        self.user_memory.facts(user_id).await
    }

    pub async fn add_user_fact(&self, user_id: &str, fact: UserFact) {
        self.user_memory.upsert(user_id, fact).await;
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(super::token_budget::DEFAULT_CHARS_PER_TOKEN)
    }
}
