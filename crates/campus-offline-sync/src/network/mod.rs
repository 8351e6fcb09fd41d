//! 网络状态 - 连接状态的观察与广播
//!
//! 平台层实现 [`NetworkStatusListener`] 上报连接变化，[`NetworkMonitor`] 维护当前状态，
//! 并把变化广播给网关和同步协调器。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;

/// 网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
    /// 连接中
    Connecting,
    /// 网络受限
    Limited,
}

impl NetworkStatus {
    /// 是否可以发出网络请求
    pub fn is_connected(self) -> bool {
        matches!(self, NetworkStatus::Online | NetworkStatus::Limited)
    }
}

/// 网络状态变化事件
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    /// 毫秒时间戳
    pub timestamp: i64,
}

impl NetworkStatusEvent {
    pub fn new(old_status: NetworkStatus, new_status: NetworkStatus) -> Self {
        Self {
            old_status,
            new_status,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 从不可用变为可用
    pub fn is_online_transition(&self) -> bool {
        !self.old_status.is_connected() && self.new_status.is_connected()
    }
}

/// 网络状态监听器trait（由平台层实现，如 Android/iOS/浏览器）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn get_current_status(&self) -> NetworkStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 由宿主直接设置状态的监听器
///
/// 没有系统级网络回调的平台（或测试）使用它，调用 [`StaticNetworkListener::set`] 上报变化。
#[derive(Debug)]
pub struct StaticNetworkListener {
    status: RwLock<NetworkStatus>,
    sender: broadcast::Sender<NetworkStatusEvent>,
}

impl StaticNetworkListener {
    pub fn new(initial: NetworkStatus) -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            status: RwLock::new(initial),
            sender,
        }
    }

    /// 更新状态；状态未变化时不产生事件
    pub async fn set(&self, new_status: NetworkStatus) {
        let old_status = {
            let mut status = self.status.write().await;
            let old = *status;
            *status = new_status;
            old
        };

        if old_status != new_status {
            let _ = self.sender.send(NetworkStatusEvent::new(old_status, new_status));
        }
    }
}

impl Default for StaticNetworkListener {
    fn default() -> Self {
        Self::new(NetworkStatus::Online)
    }
}

#[async_trait]
impl NetworkStatusListener for StaticNetworkListener {
    async fn get_current_status(&self) -> NetworkStatus {
        *self.status.read().await
    }

    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>> {
        Ok(self.sender.subscribe())
    }

    async fn stop_monitoring(&self) {
        debug!("StaticNetworkListener 停止监听");
    }
}

/// 网络监控管理器
#[derive(Debug)]
pub struct NetworkMonitor {
    listener: Arc<dyn NetworkStatusListener>,
    status_sender: broadcast::Sender<NetworkStatusEvent>,
    current_status: Arc<RwLock<NetworkStatus>>,
    forward_task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new(listener: Arc<dyn NetworkStatusListener>) -> Self {
        let (status_sender, _) = broadcast::channel(100);

        Self {
            listener,
            status_sender,
            current_status: Arc::new(RwLock::new(NetworkStatus::Offline)),
            forward_task: Mutex::new(None),
        }
    }

    /// 启动网络监控：读取当前状态，并转发监听器上报的变化
    pub async fn start(&self) -> Result<()> {
        let mut forward_task = self.forward_task.lock().await;
        if forward_task.is_some() {
            debug!("网络监控已启动");
            return Ok(());
        }

        let mut receiver = self.listener.start_monitoring().await?;
        let initial = self.listener.get_current_status().await;
        self.set_status(initial).await;
        info!("📡 网络监控已启动，当前状态: {:?}", initial);

        let status_sender = self.status_sender.clone();
        let current_status = self.current_status.clone();

        *forward_task = Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let old_status = {
                            let mut status = current_status.write().await;
                            let old = *status;
                            *status = event.new_status;
                            old
                        };
                        if old_status == event.new_status {
                            continue;
                        }
                        info!("📡 网络状态变化: {:?} -> {:?}", old_status, event.new_status);
                        let _ = status_sender.send(NetworkStatusEvent {
                            old_status,
                            new_status: event.new_status,
                            timestamp: event.timestamp,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("⚠️ 网络状态事件积压，跳过 {} 条", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        Ok(())
    }

    /// 停止网络监控
    pub async fn stop(&self) {
        if let Some(task) = self.forward_task.lock().await.take() {
            task.abort();
            self.listener.stop_monitoring().await;
            info!("📡 网络监控已停止");
        }
    }

    /// 获取当前网络状态
    pub async fn get_status(&self) -> NetworkStatus {
        *self.current_status.read().await
    }

    /// 手动设置网络状态；状态未变化时不广播
    pub async fn set_status(&self, new_status: NetworkStatus) {
        let old_status = {
            let mut status = self.current_status.write().await;
            let old = *status;
            *status = new_status;
            old
        };

        if old_status != new_status {
            let _ = self
                .status_sender
                .send(NetworkStatusEvent::new(old_status, new_status));
        }
    }

    /// 订阅网络状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.status_sender.subscribe()
    }

    pub async fn is_online(&self) -> bool {
        self.get_status().await.is_connected()
    }
}
