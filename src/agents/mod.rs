//! Worker 层：节点身份、worker 调用、路由与评估

pub mod evaluator;
pub mod node;
pub mod router;
pub mod worker;

pub use evaluator::{
    extract_json_object, parse_evaluation, EvaluationResult, Evaluator, EvaluatorError, ModelEvaluator,
    RetryDecision, RetryPolicy, DEFAULT_EVALUATION_PROMPT,
};
pub use node::{Capability, NodeName, UnknownNode};
pub use router::{parse_route_answer, KeywordRouter, ModelRouter, RouteContext, Router};
pub use worker::{build_messages, ModelWorker, Worker, WorkerInvocation, WorkerRegistry};
