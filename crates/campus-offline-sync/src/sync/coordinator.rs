//! 同步协调器
//!
//! 三种自动触发（网络恢复、后台唤醒、启动时已在线）和手动触发共用同一个
//! 「排空 + 清理」流程，由 `sync_in_progress` 保证同一时刻最多一次排空。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{OfflineSyncError, Result};
use crate::network::NetworkMonitor;
use crate::storage::QueueManager;
use crate::sync::{SyncOutcome, SyncReport, SyncTrigger, WakeSignal, DEFAULT_SYNC_TAG};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// 识别的唤醒标签
    pub sync_tag: String,
    /// 启动时已在线的延迟排空
    pub initial_sync_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sync_tag: DEFAULT_SYNC_TAG.to_string(),
            initial_sync_delay: Duration::from_millis(2000),
        }
    }
}

/// 排空期间持有，离开作用域时复位标志（包括 panic 路径）
struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct SyncCoordinator {
    queue: Arc<QueueManager>,
    monitor: Option<Arc<NetworkMonitor>>,
    config: CoordinatorConfig,
    sync_in_progress: AtomicBool,
    shut_down: AtomicBool,
    wake_tx: mpsc::UnboundedSender<WakeSignal>,
    wake_rx: Mutex<Option<mpsc::UnboundedReceiver<WakeSignal>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    last_report: RwLock<Option<SyncReport>>,
}

impl SyncCoordinator {
    /// `monitor` 为空表示无法观察网络状态：只响应唤醒信号和手动触发
    pub fn new(
        queue: Arc<QueueManager>,
        monitor: Option<Arc<NetworkMonitor>>,
        config: CoordinatorConfig,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        Self::with_wake_channel(queue, monitor, config, wake_tx, wake_rx)
    }

    /// 使用外部创建的唤醒通道（队列的后台同步注册需要先拿到发送端）
    pub fn with_wake_channel(
        queue: Arc<QueueManager>,
        monitor: Option<Arc<NetworkMonitor>>,
        config: CoordinatorConfig,
        wake_tx: mpsc::UnboundedSender<WakeSignal>,
        wake_rx: mpsc::UnboundedReceiver<WakeSignal>,
    ) -> Self {
        Self {
            queue,
            monitor,
            config,
            sync_in_progress: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
            tasks: Mutex::new(Vec::new()),
            last_report: RwLock::new(None),
        }
    }

    /// 启动所有监听任务
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(OfflineSyncError::ShuttingDown);
        }

        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            debug!("同步协调器已启动");
            return Ok(());
        }

        if let Some(monitor) = &self.monitor {
            tasks.push(self.spawn_online_listener(monitor.subscribe()));

            if monitor.is_online().await {
                tasks.push(self.spawn_startup_sync());
            }
        } else {
            info!("ℹ️ 无法观察网络状态，仅响应唤醒信号和手动同步");
        }

        if let Some(wake_rx) = self.wake_rx.lock().await.take() {
            tasks.push(self.spawn_wake_listener(wake_rx));
        }

        info!("🚀 同步协调器已启动 (tag: {})", self.config.sync_tag);
        Ok(())
    }

    fn spawn_online_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<crate::network::NetworkStatusEvent>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.is_online_transition() => {
                        info!("📶 网络已恢复 ({:?} -> {:?})，触发同步", event.old_status, event.new_status);
                        if !spawn_sync(&weak, SyncTrigger::Online) {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("⚠️ 网络事件积压，跳过 {} 条", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_wake_listener(
        self: &Arc<Self>,
        mut wake_rx: mpsc::UnboundedReceiver<WakeSignal>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let sync_tag = self.config.sync_tag.clone();
        tokio::spawn(async move {
            while let Some(signal) = wake_rx.recv().await {
                if signal.tag != sync_tag {
                    debug!("忽略未识别的唤醒标签: {}", signal.tag);
                    continue;
                }

                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                if let Some(monitor) = &coordinator.monitor {
                    if !monitor.is_online().await {
                        debug!("收到唤醒信号但当前离线，等待网络恢复");
                        continue;
                    }
                }

                info!("⏰ 收到后台唤醒信号: {}", signal.tag);
                tokio::spawn(async move {
                    coordinator.run_sync(SyncTrigger::Wake(signal.tag)).await;
                });
            }
        })
    }

    fn spawn_startup_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let delay = self.config.initial_sync_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(coordinator) = weak.upgrade() {
                info!("🔄 启动时在线，执行初始同步");
                coordinator.run_sync(SyncTrigger::Startup).await;
            }
        })
    }

    /// 执行一次「排空 + 清理」；已有排空在运行时直接返回 `Skipped`
    pub async fn run_sync(&self, trigger: SyncTrigger) -> SyncOutcome {
        if self
            .sync_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("同步正在进行，忽略触发: {:?}", trigger);
            return SyncOutcome::Skipped;
        }
        let _guard = InProgressGuard(&self.sync_in_progress);

        let results = self.queue.drain().await;
        let cleaned = match self.queue.cleanup().await {
            Ok(cleaned) => cleaned,
            Err(e) => {
                warn!("⚠️ 清理已完成操作失败: {}", e);
                0
            }
        };

        let report = SyncReport {
            trigger,
            results,
            cleaned,
            finished_at: chrono::Utc::now().timestamp_millis(),
        };
        info!(
            "✅ 同步完成 ({:?}): 成功 {}，失败 {}，清理 {}",
            report.trigger,
            report.succeeded(),
            report.failed(),
            report.cleaned
        );

        *self.last_report.write().await = Some(report.clone());
        SyncOutcome::Completed(report)
    }

    /// 手动触发同步
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(OfflineSyncError::ShuttingDown);
        }
        Ok(self.run_sync(SyncTrigger::Manual).await)
    }

    /// 后台工作者投递唤醒信号的通道
    pub fn wake_sender(&self) -> mpsc::UnboundedSender<WakeSignal> {
        self.wake_tx.clone()
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_in_progress.load(Ordering::Acquire)
    }

    pub async fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().await.clone()
    }

    /// 停止所有监听任务（可重复调用）
    pub async fn teardown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("🛑 同步协调器已停止");
    }
}

/// 在独立任务中执行一次同步；协调器已释放时返回 false
fn spawn_sync(weak: &Weak<SyncCoordinator>, trigger: SyncTrigger) -> bool {
    match weak.upgrade() {
        Some(coordinator) => {
            tokio::spawn(async move {
                coordinator.run_sync(trigger).await;
            });
            true
        }
        None => false,
    }
}
