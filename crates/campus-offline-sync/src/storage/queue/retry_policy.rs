use serde::{Deserialize, Serialize};

use crate::error::OfflineSyncError;
use crate::storage::SyncStatus;

/// 重放失败原因分类
///
/// 只用于生成 `lastError` 和日志，不影响尝试次数的累计：任何失败都算一次。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FailureReason {
    /// 网络超时
    Timeout,
    /// 网络不可用（连接失败）
    NetworkUnavailable,
    /// 服务端错误 5xx
    ServerError(u16),
    /// 客户端错误 4xx（或其他非 2xx）
    ClientError(u16),
    /// 未知错误
    Unknown(String),
}

impl FailureReason {
    /// 渲染为存储在记录上的 `lastError`
    pub fn describe(&self, detail: &str) -> String {
        let kind = match self {
            FailureReason::Timeout => "timeout".to_string(),
            FailureReason::NetworkUnavailable => "network unavailable".to_string(),
            FailureReason::ServerError(code) => format!("server error {}", code),
            FailureReason::ClientError(code) => format!("client error {}", code),
            FailureReason::Unknown(_) => "unknown".to_string(),
        };
        format!("{}: {}", kind, detail)
    }
}

/// 从错误转换为失败原因
impl From<&OfflineSyncError> for FailureReason {
    fn from(error: &OfflineSyncError) -> Self {
        match error {
            OfflineSyncError::Network {
                status: Some(code), ..
            } => {
                if (500..600).contains(code) {
                    FailureReason::ServerError(*code)
                } else {
                    FailureReason::ClientError(*code)
                }
            }
            OfflineSyncError::Network {
                status: None,
                message,
            } => {
                if message.contains("timeout") {
                    FailureReason::Timeout
                } else if message.contains("unavailable") || message.contains("connection") {
                    FailureReason::NetworkUnavailable
                } else {
                    FailureReason::Unknown(message.clone())
                }
            }
            other => FailureReason::Unknown(other.to_string()),
        }
    }
}

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// 累计失败达到该次数后标记为 failed，不再自动重放
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// 根据失败后的累计尝试次数给出下一个状态
    pub fn next_status(&self, attempts_after_failure: u32) -> SyncStatus {
        if attempts_after_failure >= self.max_attempts {
            SyncStatus::Failed
        } else {
            SyncStatus::Pending
        }
    }
}
