//! 后台同步注册
//!
//! 平台提供「注册一个命名的后台同步事件」的能力时（如 Service Worker 的 Background Sync），
//! 入队后会尝试注册，以便应用不在前台时也能触发排空。该能力是可选的：
//! 没有平台支持时使用 [`NoopRegistrar`]。

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{OfflineSyncError, Result};
use crate::sync::WakeSignal;

/// 后台同步注册能力（由平台层实现）
#[async_trait]
pub trait BackgroundSyncRegistrar: std::fmt::Debug + Send + Sync {
    async fn register(&self, tag: &str) -> Result<()>;
}

/// 空实现
#[derive(Debug, Default, Clone)]
pub struct NoopRegistrar;

#[async_trait]
impl BackgroundSyncRegistrar for NoopRegistrar {
    async fn register(&self, tag: &str) -> Result<()> {
        debug!("平台不支持后台同步，跳过注册: {}", tag);
        Ok(())
    }
}

/// 进程内实现：注册即向唤醒通道投递同名信号
///
/// 协调器收到带有已识别标签的唤醒信号后，按「网络恢复」同样的流程排空队列。
#[derive(Debug, Clone)]
pub struct WakeRegistrar {
    sender: mpsc::UnboundedSender<WakeSignal>,
}

impl WakeRegistrar {
    pub fn new(sender: mpsc::UnboundedSender<WakeSignal>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl BackgroundSyncRegistrar for WakeRegistrar {
    async fn register(&self, tag: &str) -> Result<()> {
        self.sender
            .send(WakeSignal::new(tag))
            .map_err(|_| OfflineSyncError::ShuttingDown)
    }
}
