//! 节点配置：用户级 model / provider / 参数 / 回退链，带缓存

pub mod cache;
pub mod defaults;
pub mod service;
pub mod types;

pub use cache::ConfigCache;
pub use defaults::{NodeDefault, NodeDefaults, NODE_EVALUATOR, NODE_ROUTER};
pub use service::{
    ConfigService, ConfigServiceError, FileConfigService, StaticConfigService, UserConfig,
};
pub use types::{
    parse_fallback_chain, ModelTier, NodeConfig, NodeConfigRecord, ResolvedNode, UserId,
};
