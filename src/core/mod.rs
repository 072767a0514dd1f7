//! 核心编排层：错误、分级回退、调度器、关闭信号、单轮对话编排

pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod scheduler;
pub mod shutdown;

pub use error::{OrchestratorError, TierFailure, TierFailureReason};
pub use fallback::{Completion, FallbackController};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, TurnOutcome};
pub use scheduler::{
    AutomationProcessor, Clock, DigestSchedule, DigestSender, Scheduler, SchedulerSettings,
};
pub use shutdown::{ShutdownManager, ShutdownReason};
