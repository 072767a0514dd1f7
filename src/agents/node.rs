//! Worker 身份：封闭的节点集合 + 各自的能力描述

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 可被路由选中的 worker 节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeName {
    /// 职位搜索
    JobSearch,
    /// 联系人 / 组织 / 商机 / 任务等 CRM 数据
    CrmWorker,
    /// 邮件、跟进消息等文案撰写
    WriterWorker,
    /// 其余闲聊与问答
    GeneralWorker,
}

impl NodeName {
    pub const ALL: [NodeName; 4] = [
        NodeName::JobSearch,
        NodeName::CrmWorker,
        NodeName::WriterWorker,
        NodeName::GeneralWorker,
    ];

    /// 配置服务与缓存中使用的节点名
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeName::JobSearch => "job_search",
            NodeName::CrmWorker => "crm_worker",
            NodeName::WriterWorker => "writer_worker",
            NodeName::GeneralWorker => "general_worker",
        }
    }

    /// 内置能力：指令 + 允许使用的工具子集
    pub fn capability(&self) -> Capability {
        let (instructions, tools): (&str, &[&str]) = match self {
            NodeName::JobSearch => (
                "You help the user find job openings. Ask for missing criteria such as role, \
                 location or seniority, then summarise matching positions.",
                &["search_jobs", "save_job"],
            ),
            NodeName::CrmWorker => (
                "You manage the user's CRM records: contacts, organizations, deals and tasks. \
                 Answer from the records and describe any change you make.",
                &[
                    "search_contacts",
                    "update_contact",
                    "list_deals",
                    "update_deal",
                    "create_task",
                ],
            ),
            NodeName::WriterWorker => (
                "You draft emails, follow-ups and other messages for the user in a concise, \
                 professional tone.",
                &["search_contacts", "draft_email"],
            ),
            NodeName::GeneralWorker => (
                "You are a helpful assistant inside a CRM application. Answer briefly.",
                &[],
            ),
        };
        Capability {
            instructions: instructions.to_string(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown node: {0}")]
pub struct UnknownNode(pub String);

impl FromStr for NodeName {
    type Err = UnknownNode;

    /// 宽松解析：忽略大小写，接受 `-` / 空格分隔
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        NodeName::ALL
            .into_iter()
            .find(|n| n.as_str() == normalized)
            .ok_or_else(|| UnknownNode(s.to_string()))
    }
}

/// Worker 能力集
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub instructions: String,
    pub tools: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip_and_variants() {
        for node in NodeName::ALL {
            assert_eq!(node.as_str().parse::<NodeName>(), Ok(node));
        }
        assert_eq!("Writer-Worker".parse::<NodeName>(), Ok(NodeName::WriterWorker));
        assert_eq!(" job search ".parse::<NodeName>(), Ok(NodeName::JobSearch));
        assert!("billing".parse::<NodeName>().is_err());
    }

    #[test]
    fn test_unknown_node_error_message() {
        let err = "billing".parse::<NodeName>().unwrap_err();
        assert_eq!(err, UnknownNode("billing".into()));
        assert_eq!(err.to_string(), "unknown node: billing");
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_general_worker_has_no_tools() {
        assert!(NodeName::GeneralWorker.capability().tools.is_empty());
        assert!(NodeName::CrmWorker.capability().tools.contains(&"list_deals".to_string()));
    }

    #[test]
    fn test_serde_uses_node_names() {
        let json = serde_json::to_string(&NodeName::CrmWorker).unwrap();
        assert_eq!(json, "\"crm_worker\"");
    }
}
