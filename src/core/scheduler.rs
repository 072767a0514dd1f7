//! 后台调度：到期自动化检查 + 每日摘要
//!
//! 两个独立循环各跑在自己的任务上，互不阻塞，也不阻塞对话处理。
//! 每次 tick 的工作在单独任务中执行并被等待：出错或 panic 只记日志，不影响后续 tick；
//! 上一次 tick 未结束时到期的 tick 直接跳过（MissedTickBehavior::Skip）。
//! stop() 发出关闭信号并等待进行中的 tick 结束。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerSection;

/// 到期自动化处理方
#[async_trait]
pub trait AutomationProcessor: Send + Sync {
    /// 处理 now 时刻所有到期的自动化；cancel 在调度器关闭时触发
    async fn process_due(&self, now: DateTime<Utc>, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// 每日摘要发送方
#[async_trait]
pub trait DigestSender: Send + Sync {
    async fn send_daily_digest(&self, date: NaiveDate, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// 时钟（测试可注入固定时间）
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// 每日摘要时刻表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestSchedule {
    pub hour_utc: u32,
}

impl DigestSchedule {
    pub fn new(hour_utc: u32) -> Self {
        Self {
            hour_utc: hour_utc.min(23),
        }
    }

    /// 当天已到发送时刻且当天还没发过
    pub fn is_due(&self, now: DateTime<Utc>, last_sent: Option<NaiveDate>) -> bool {
        now.hour() >= self.hour_utc && last_sent != Some(now.date_naive())
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub automation_interval: Duration,
    pub digest: DigestSchedule,
    pub digest_check_interval: Duration,
}

impl From<&SchedulerSection> for SchedulerSettings {
    fn from(section: &SchedulerSection) -> Self {
        Self {
            automation_interval: section.automation_interval(),
            digest: DigestSchedule::new(section.digest_hour_utc),
            digest_check_interval: section.digest_check_interval(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerSection::default())
    }
}

struct Running {
    shutdown: CancellationToken,
    loops: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    automation: Arc<dyn AutomationProcessor>,
    digest: Arc<dyn DigestSender>,
    settings: SchedulerSettings,
    clock: Clock,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(
        automation: Arc<dyn AutomationProcessor>,
        digest: Arc<dyn DigestSender>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            automation,
            digest,
            settings,
            clock: Arc::new(Utc::now),
            running: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// 启动两个循环；已在运行时忽略
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::warn!("Scheduler already running");
            return;
        }

        let shutdown = CancellationToken::new();
        let automation = tokio::spawn(automation_loop(
            Arc::clone(&self.automation),
            self.settings.automation_interval,
            Arc::clone(&self.clock),
            shutdown.clone(),
        ));
        let digest = tokio::spawn(digest_loop(
            Arc::clone(&self.digest),
            self.settings.digest,
            self.settings.digest_check_interval,
            Arc::clone(&self.clock),
            shutdown.clone(),
        ));

        tracing::info!(
            automation_interval_secs = self.settings.automation_interval.as_secs_f64(),
            digest_hour_utc = self.settings.digest.hour_utc,
            "Scheduler started"
        );
        *running = Some(Running {
            shutdown,
            loops: vec![automation, digest],
        });
    }

    /// 发出关闭信号，等待进行中的 tick 完成
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.shutdown.cancel();
        for handle in running.loops {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler loop ended abnormally: {}", e);
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn automation_loop(
    processor: Arc<dyn AutomationProcessor>,
    period: Duration,
    clock: Clock,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let processor = Arc::clone(&processor);
        let now = clock();
        let cancel = shutdown.child_token();
        run_tick("automation", async move { processor.process_due(now, cancel).await }).await;
    }
}

async fn digest_loop(
    sender: Arc<dyn DigestSender>,
    schedule: DigestSchedule,
    period: Duration,
    clock: Clock,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_sent: Option<NaiveDate> = None;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let now = clock();
        if !schedule.is_due(now, last_sent) {
            continue;
        }
        let date = now.date_naive();
        // 失败也记为当天已尝试，不在同一天反复发送
        last_sent = Some(date);
        let sender = Arc::clone(&sender);
        let cancel = shutdown.child_token();
        run_tick("daily_digest", async move { sender.send_daily_digest(date, cancel).await }).await;
    }
}

/// 在独立任务中执行一次 tick，隔离错误与 panic
async fn run_tick<F>(name: &'static str, work: F)
where
    F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(Ok(())) => tracing::debug!(tick = name, "Scheduler tick completed"),
        Ok(Err(e)) => tracing::warn!(tick = name, error = %e, "Scheduler tick failed"),
        Err(e) if e.is_panic() => tracing::error!(tick = name, "Scheduler tick panicked"),
        Err(e) => tracing::warn!(tick = name, error = %e, "Scheduler tick aborted"),
    }
}
