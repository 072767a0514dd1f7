//! Token 预算：固定字符/token 比例的估算与滑动窗口
//!
//! 窗口严格按时间倒序取后缀：从最新消息往前累加字符数，
//! 一旦加入某条消息会超出预算就停止（该条及更早的全部排除），不拆分消息。

use super::conversation::Message;

/// 默认 4 字符 ≈ 1 token
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Token 估算器（固定比例的字符计数近似）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimator {
    chars_per_token: usize,
}

impl TokenEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }

    /// 预算对应的字符上限
    pub fn char_budget(&self, token_budget: usize) -> usize {
        token_budget.saturating_mul(self.chars_per_token)
    }

    /// 估算文本 token 数（向上取整）
    pub fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    /// 返回能放进 token_budget 的最长消息后缀的起始下标
    pub fn window_start(&self, messages: &[Message], token_budget: usize) -> usize {
        let limit = self.char_budget(token_budget);
        let mut used = 0usize;
        let mut start = messages.len();

        for (idx, message) in messages.iter().enumerate().rev() {
            let next = used.saturating_add(message.char_len());
            if next > limit {
                break;
            }
            used = next;
            start = idx;
        }

        start
    }

    /// 取滑动窗口（拷贝后缀）
    pub fn window(&self, messages: &[Message], token_budget: usize) -> Vec<Message> {
        let start = self.window_start(messages, token_budget);
        messages[start..].to_vec()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}
