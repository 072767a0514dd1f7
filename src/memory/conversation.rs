//! 对话消息与会话状态
//!
//! 会话只追加 user / assistant 消息；System 仅用于拼装发往模型的请求。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// 字符数（按 Unicode 标量计），用于 token 估算
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// 会话 ID
pub type SessionId = String;

/// 单个会话：消息只追加、不删除
#[derive(Clone, Debug)]
pub struct SessionState {
    pub session_id: SessionId,
    pub user_id: String,
    pub messages: Vec<Message>,
}

impl SessionState {
    pub fn new(session_id: impl Into<SessionId>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
