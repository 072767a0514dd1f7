//! 可观测性：tracing 订阅器
//!
//! 默认 info 级别，RUST_LOG 可覆盖（如 `RUST_LOG=crm_agent=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 构造日志过滤器：RUST_LOG 优先，未设置或无法解析时回落到 default_directive
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// 安装全局订阅器；重复调用不会 panic
pub fn init() {
    let installed = tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(fmt::layer().with_target(true))
        .try_init();
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
