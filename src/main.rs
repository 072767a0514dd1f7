//! CRM Agent 演示入口
//!
//! 初始化日志与配置，装配 provider 注册表、节点配置缓存、编排器与调度器，
//! 然后在标准输入上逐行对话。命令：/history、/invalidate、/remember key=value、/quit。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crm_agent::config::{load_config, AppConfig};
use crm_agent::core::{
    AutomationProcessor, DigestSender, Scheduler, SchedulerSettings, ShutdownManager, ShutdownReason,
};
use crm_agent::llm::ProviderRegistry;
use crm_agent::memory::{new_session_id, UserFact};
use crm_agent::node_config::{ConfigCache, ConfigService, FileConfigService, NodeDefaults, StaticConfigService};
use crm_agent::{observability, OrchestratorBuilder};

/// 演示用自动化处理：只记录 tick
struct LoggingAutomation;

#[async_trait]
impl AutomationProcessor for LoggingAutomation {
    async fn process_due(&self, now: DateTime<Utc>, _cancel: CancellationToken) -> anyhow::Result<()> {
        tracing::debug!(%now, "Checking due automations");
        Ok(())
    }
}

struct LoggingDigest;

#[async_trait]
impl DigestSender for LoggingDigest {
    async fn send_daily_digest(&self, date: NaiveDate, _cancel: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(%date, "Daily digest dispatched");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let providers = Arc::new(ProviderRegistry::from_config(&cfg));
    let service: Arc<dyn ConfigService> = match &cfg.app.user_config_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "Using file config service");
            Arc::new(FileConfigService::new(dir))
        }
        None => Arc::new(StaticConfigService::new()),
    };
    let defaults = NodeDefaults::builtin(providers.default_provider()).with_overrides(&cfg.nodes);
    let cache = Arc::new(ConfigCache::new(service, defaults));
    let orchestrator = OrchestratorBuilder::new(cache, providers)
        .with_config(&cfg)
        .build();

    let scheduler = cfg.scheduler.enabled.then(|| {
        Scheduler::new(
            Arc::new(LoggingAutomation),
            Arc::new(LoggingDigest),
            SchedulerSettings::from(&cfg.scheduler),
        )
    });
    if let Some(scheduler) = &scheduler {
        scheduler.start().await;
    }

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let user_id = std::env::var("CRM_AGENT_USER").unwrap_or_else(|_| "demo-user".to_string());
    let session_id = new_session_id();
    println!(
        "{} ready (user {}, session {}). Type /quit to exit.",
        cfg.app.name.as_deref().unwrap_or("crm-agent"),
        user_id,
        session_id
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            shutdown.shutdown(ShutdownReason::InputClosed);
            break;
        };
        let input = line.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => {
                shutdown.shutdown(ShutdownReason::UserInitiated);
                break;
            }
            "/history" => match orchestrator
                .get_session_history(&session_id, cfg.session.history_token_budget)
                .await
            {
                Ok(messages) => {
                    for m in messages {
                        println!("{:?}: {}", m.role, m.content);
                    }
                }
                Err(e) => println!("(no history: {})", e),
            },
            "/invalidate" => {
                orchestrator.invalidate_user_config(&user_id).await;
                println!("Config cache cleared for {}", user_id);
            }
            _ if input.starts_with("/remember ") => {
                match input["/remember ".len()..].split_once('=') {
                    Some((key, value)) => {
                        orchestrator
                            .sessions()
                            .add_user_fact(&user_id, UserFact::new(key.trim(), value.trim()))
                            .await;
                        println!("Remembered {}", key.trim());
                    }
                    None => println!("Usage: /remember key=value"),
                }
            }
            _ => {
                let turn = shutdown.token().child_token();
                match orchestrator.handle_turn(&session_id, &user_id, input, &turn).await {
                    Ok(outcome) => println!("[{} | {}] {}", outcome.node, outcome.model, outcome.response),
                    Err(e) => println!("Error: {}", e),
                }
            }
        }
    }

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    tracing::info!(reason = ?shutdown.reason(), "Bye");
    Ok(())
}
