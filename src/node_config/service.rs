//! 配置服务：用户节点配置的权威来源（比缓存慢）
//!
//! - StaticConfigService：内存实现，可在运行时更新（测试与演示用）
//! - FileConfigService：从目录读取 `<user>.json`，文件不存在视为没有自定义配置

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use super::types::NodeConfigRecord;

#[derive(Error, Debug)]
pub enum ConfigServiceError {
    #[error("Config service unavailable: {0}")]
    Unavailable(String),

    #[error("Config read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse failed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 某用户全部节点的配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub nodes: Vec<NodeConfigRecord>,
}

impl UserConfig {
    pub fn with_node(mut self, record: NodeConfigRecord) -> Self {
        self.nodes.push(record);
        self
    }
}

/// 配置服务接口
#[async_trait]
pub trait ConfigService: Send + Sync {
    /// 一次返回该用户所有节点的配置
    async fn get_user_config(&self, user_id: &str) -> Result<UserConfig, ConfigServiceError>;
}

/// 内存配置服务
#[derive(Default)]
pub struct StaticConfigService {
    configs: RwLock<HashMap<String, UserConfig>>,
    loads: AtomicUsize,
}

impl StaticConfigService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入 / 替换用户配置；调用方随后应让缓存失效
    pub async fn set_user_config(&self, user_id: &str, config: UserConfig) {
        self.configs.write().await.insert(user_id.to_string(), config);
    }

    /// 累计被加载次数
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigService for StaticConfigService {
    async fn get_user_config(&self, user_id: &str) -> Result<UserConfig, ConfigServiceError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .configs
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// 目录型配置服务：`<dir>/<user>.json`
pub struct FileConfigService {
    dir: PathBuf,
}

impl FileConfigService {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_user_id(user_id)))
    }
}

#[async_trait]
impl ConfigService for FileConfigService {
    async fn get_user_config(&self, user_id: &str) -> Result<UserConfig, ConfigServiceError> {
        let path = self.path_for(user_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UserConfig::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 清理 user_id 中的特殊字符用于文件名
fn sanitize_user_id(user_id: &str) -> String {
    user_id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_service_counts_loads() {
        let service = StaticConfigService::new();
        service
            .set_user_config("u1", UserConfig::default().with_node(NodeConfigRecord::new("crm_worker", "m", "p")))
            .await;
        assert_eq!(service.get_user_config("u1").await.unwrap().nodes.len(), 1);
        assert!(service.get_user_config("u2").await.unwrap().nodes.is_empty());
        assert_eq!(service.load_count(), 2);
    }

    #[tokio::test]
    async fn test_file_service_reads_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("user_example_com.json"),
            r#"{"nodes":[{"nodeName":"writer_worker","model":"gpt-4o","provider":"openai"}]}"#,
        )
        .unwrap();

        let service = FileConfigService::new(dir.path());
        let config = service.get_user_config("user@example.com").await.unwrap();
        assert_eq!(config.nodes[0].node_name, "writer_worker");

        let missing = service.get_user_config("nobody").await.unwrap();
        assert!(missing.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_file_service_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("u1.json"), "{ broken").unwrap();
        let service = FileConfigService::new(dir.path());
        assert!(matches!(
            service.get_user_config("u1").await,
            Err(ConfigServiceError::Parse(_))
        ));
    }

    #[test]
    fn test_sanitize_user_id() {
        assert_eq!(sanitize_user_id("user@example.com"), "user_example_com");
        assert_eq!(sanitize_user_id("user-123_abc"), "user-123_abc");
    }
}
