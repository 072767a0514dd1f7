//! 节点内置默认值
//!
//! 用户没有自定义配置时使用；provider 默认跟随注册表的默认后端，可被 [nodes.<name>] 覆盖。

use std::collections::HashMap;

use crate::config::NodeDefaultSection;

pub const NODE_ROUTER: &str = "router";
pub const NODE_EVALUATOR: &str = "evaluator";

const FALLBACK_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDefault {
    pub model: String,
    pub provider: String,
}

/// 节点名 -> 默认 model / provider
#[derive(Debug, Clone)]
pub struct NodeDefaults {
    table: HashMap<String, NodeDefault>,
    fallback: NodeDefault,
}

impl NodeDefaults {
    /// 内置默认表
    pub fn builtin(default_provider: &str) -> Self {
        let entry = |model: &str| NodeDefault {
            model: model.to_string(),
            provider: default_provider.to_string(),
        };
        let table = HashMap::from([
            ("job_search".to_string(), entry("gpt-4o-mini")),
            ("crm_worker".to_string(), entry("gpt-4o")),
            ("writer_worker".to_string(), entry("gpt-4o")),
            ("general_worker".to_string(), entry("gpt-4o-mini")),
            (NODE_ROUTER.to_string(), entry("gpt-4o-mini")),
            (NODE_EVALUATOR.to_string(), entry("gpt-4o-mini")),
        ]);
        Self {
            table,
            fallback: entry(FALLBACK_MODEL),
        }
    }

    /// 叠加配置文件中的 [nodes.<name>]
    pub fn with_overrides(mut self, overrides: &HashMap<String, NodeDefaultSection>) -> Self {
        for (node, section) in overrides {
            let current = self.get(node).clone();
            self.table.insert(
                node.clone(),
                NodeDefault {
                    model: section.model.clone().unwrap_or(current.model),
                    provider: section.provider.clone().unwrap_or(current.provider),
                },
            );
        }
        self
    }

    pub fn get(&self, node: &str) -> &NodeDefault {
        self.table.get(node).unwrap_or(&self.fallback)
    }
}
