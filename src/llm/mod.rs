//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）及 provider 注册表

pub mod mock;
pub mod openai;
pub mod registry;
pub mod traits;

pub use mock::{MockLlmClient, ScriptedCall, ScriptedLlmClient, ScriptedReply};
pub use openai::{OpenAiClient, DEEPSEEK_BASE_URL};
pub use registry::{ProviderRegistry, PROVIDER_DEEPSEEK, PROVIDER_MOCK, PROVIDER_OPENAI};
pub use traits::{collect_stream, GenerationSettings, LlmClient, LlmError, LlmRequest, TokenStream};
