//! 用户隔离的长期事实记忆
//!
//! 以 user_id 为作用域（跨会话），key 在同一用户内唯一：
//! 写入已存在的 key 时原位覆盖（保持顺序），否则追加。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// 单条用户事实
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFact {
    pub key: String,
    pub value: String,
}

impl UserFact {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// 用户事实存储：user_id -> 有序事实列表
#[derive(Default)]
pub struct UserMemoryManager {
    facts: RwLock<HashMap<String, Vec<UserFact>>>,
}

impl UserMemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取用户全部事实（按首次写入顺序）
    pub async fn facts(&self, user_id: &str) -> Vec<UserFact> {
        self.facts
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// upsert：同 key 原位替换，否则追加
    pub async fn upsert(&self, user_id: &str, fact: UserFact) {
        let mut facts = self.facts.write().await;
        let entries = facts.entry(user_id.to_string()).or_default();
        match entries.iter_mut().find(|f| f.key == fact.key) {
            Some(existing) => existing.value = fact.value,
            None => entries.push(fact),
        }
    }

    /// 活跃用户数
    pub async fn active_users(&self) -> usize {
        self.facts.read().await.len()
    }

    /// 清理指定用户的事实
    pub async fn clear_user(&self, user_id: &str) -> bool {
        self.facts.write().await.remove(user_id).is_some()
    }
}

/// 把事实渲染成 system prompt 片段；没有事实时返回 None
pub fn render_facts(facts: &[UserFact]) -> Option<String> {
    if facts.is_empty() {
        return None;
    }
    let lines: Vec<String> = facts
        .iter()
        .map(|f| format!("- {}: {}", f.key, f.value))
        .collect();
    Some(format!("Known facts about the user:\n{}", lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let manager = UserMemoryManager::new();
        manager.upsert("u1", UserFact::new("city", "Berlin")).await;
        manager.upsert("u1", UserFact::new("role", "sales")).await;
        manager.upsert("u1", UserFact::new("city", "Paris")).await;

        let facts = manager.facts("u1").await;
        assert_eq!(
            facts,
            vec![UserFact::new("city", "Paris"), UserFact::new("role", "sales")]
        );
    }

    #[tokio::test]
    async fn test_user_isolation() {
        let manager = UserMemoryManager::new();
        manager.upsert("user_a", UserFact::new("k", "a")).await;
        manager.upsert("user_b", UserFact::new("k", "b")).await;

        assert_eq!(manager.active_users().await, 2);
        assert_eq!(manager.facts("user_a").await[0].value, "a");
        assert!(manager.facts("nobody").await.is_empty());

        assert!(manager.clear_user("user_a").await);
        assert_eq!(manager.active_users().await, 1);
    }

    #[test]
    fn test_render_facts() {
        assert!(render_facts(&[]).is_none());
        let text = render_facts(&[UserFact::new("name", "Ada")]).unwrap();
        assert!(text.contains("- name: Ada"));
    }
}
