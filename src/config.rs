//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CRM_AGENT__*` 覆盖
//! （双下划线表示嵌套，如 `CRM_AGENT__LLM__PROVIDER=deepseek`）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub session: SessionSection,
    pub router: RouterSection,
    pub evaluator: EvaluatorSection,
    pub scheduler: SchedulerSection,
    /// [nodes.<name>] 段：覆盖内置的节点默认模型 / provider
    pub nodes: HashMap<String, NodeDefaultSection>,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 用户节点配置目录（每用户一个 <user>.json）；未设置时使用内存配置服务
    pub user_config_dir: Option<PathBuf>,
}

/// [llm] 段：默认后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock；没有对应 API Key 时回落到 mock
    pub provider: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: None,
        }
    }
}

/// [session] 段：滑动窗口参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub chars_per_token: usize,
    /// 每轮送入 worker 的历史 token 预算
    pub history_token_budget: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            chars_per_token: crate::memory::DEFAULT_CHARS_PER_TOKEN,
            history_token_budget: 2000,
        }
    }
}

/// 路由策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterStrategy {
    /// 只用关键词规则
    #[default]
    Keyword,
    /// 关键词未命中时调用 "router" 节点的模型分类
    Model,
}

/// [router] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub strategy: RouterStrategy,
}

/// [evaluator] 段：输出质量门
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluatorSection {
    pub enabled: bool,
    /// 首次尝试之外最多重试次数
    pub max_retries: usize,
    /// 可选：覆盖内置评估提示词（占位符 {request} / {output}）
    pub prompt_template: Option<String>,
}

impl Default for EvaluatorSection {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 2,
            prompt_template: None,
        }
    }
}

/// [scheduler] 段：自动化检查与每日摘要
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub enabled: bool,
    pub automation_interval_secs: u64,
    /// 每日摘要发送时刻（UTC 小时，0-23）
    pub digest_hour_utc: u32,
    pub digest_check_interval_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            automation_interval_secs: 60,
            digest_hour_utc: 8,
            digest_check_interval_secs: 60,
        }
    }
}

impl SchedulerSection {
    pub fn automation_interval(&self) -> Duration {
        Duration::from_secs(self.automation_interval_secs.max(1))
    }

    pub fn digest_check_interval(&self) -> Duration {
        Duration::from_secs(self.digest_check_interval_secs.max(1))
    }
}

/// [nodes.<name>] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeDefaultSection {
    pub model: Option<String>,
    pub provider: Option<String>,
}

/// 从 config 目录加载配置，环境变量 CRM_AGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CRM_AGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CRM_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
