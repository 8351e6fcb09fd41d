//! 离线同步模块
//!
//! 职责：
//! - 网络恢复时自动排空同步队列
//! - 响应后台唤醒信号（按标签识别）
//! - 启动时若已在线，延迟一次排空
//! - 保证同一时刻只有一次排空在运行

pub mod background;
pub mod coordinator;

pub use background::{BackgroundSyncRegistrar, NoopRegistrar, WakeRegistrar};
pub use coordinator::{CoordinatorConfig, SyncCoordinator};

use crate::storage::DrainResult;

/// 默认的后台同步标签
pub const DEFAULT_SYNC_TAG: &str = "sync-offline-data";

/// 后台唤醒信号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeSignal {
    pub tag: String,
}

impl WakeSignal {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

/// 触发排空的来源
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum SyncTrigger {
    /// 网络恢复
    Online,
    /// 后台唤醒
    Wake(String),
    /// 启动时已在线
    Startup,
    /// 手动触发
    Manual,
}

/// 一次排空的结果
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub results: Vec<DrainResult>,
    /// 本次清理掉的 completed 记录数
    pub cleaned: usize,
    /// 毫秒时间戳
    pub finished_at: i64,
}

impl SyncReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// 已有排空在运行，本次触发被忽略
    Skipped,
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, SyncOutcome::Skipped)
    }
}
