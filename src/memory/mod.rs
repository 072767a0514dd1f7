//! 记忆层：会话消息历史（滑动窗口）与用户级长期事实

pub mod conversation;
pub mod session_store;
pub mod token_budget;
pub mod user_memory;

pub use conversation::{Message, Role, SessionId, SessionState};
pub use session_store::{new_session_id, SessionStore};
pub use token_budget::{TokenEstimator, DEFAULT_CHARS_PER_TOKEN};
pub use user_memory::{render_facts, UserFact, UserMemoryManager};
