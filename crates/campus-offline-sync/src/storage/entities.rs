//! 数据实体定义
//!
//! - `SyncOperation`：同步队列中的一条待重放写操作（`syncQueue` 表）
//! - `CacheEntry`：一条 GET 响应缓存（`offlineData` 表）

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OfflineSyncError, Result};

/// HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }

    /// 是否为写操作（只有写操作会进入同步队列，GET 只走缓存）
    pub fn is_mutating(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Get
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = OfflineSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            other => Err(OfflineSyncError::InvalidArgument(format!(
                "不支持的 HTTP 方法: {}",
                other
            ))),
        }
    }
}

/// 同步操作状态
///
/// 状态机：`pending → completed`，`pending → pending | failed`。
/// `completed` 与 `failed` 都是终态，不会被自动恢复。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        matches!(
            (self, next),
            (SyncStatus::Pending, SyncStatus::Pending)
                | (SyncStatus::Pending, SyncStatus::Completed)
                | (SyncStatus::Pending, SyncStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Pending)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Completed => write!(f, "completed"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 同步队列中的一条写操作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    /// 由存储层自增分配，入队前为 0
    #[serde(default)]
    pub id: u64,
    pub url: String,
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// 从 URL 推导的分类标签，仅用于日志和分组
    pub entity_type: String,
    /// 入队时间（UTC 毫秒时间戳）
    pub enqueued_at: i64,
    pub attempts: u32,
    pub status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncOperation {
    pub fn new(
        url: impl Into<String>,
        method: HttpMethod,
        payload: Option<Value>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            url: url.into(),
            method,
            payload,
            entity_type: entity_type.into(),
            enqueued_at: Utc::now().timestamp_millis(),
            attempts: 0,
            status: SyncStatus::Pending,
            completed_at: None,
            last_error: None,
        }
    }

    /// 重放成功
    pub fn mark_completed(&mut self) {
        if !self.status.can_transition_to(SyncStatus::Completed) {
            return;
        }
        self.status = SyncStatus::Completed;
        self.completed_at = Some(Utc::now().timestamp_millis());
    }

    /// 重放失败：尝试次数只增不减，状态由调用方按重试策略给出
    pub fn record_failure(&mut self, error: impl Into<String>, next_status: SyncStatus) {
        if !self.status.can_transition_to(next_status) {
            return;
        }
        self.attempts = self.attempts.saturating_add(1);
        self.status = next_status;
        self.last_error = Some(error.into());
    }

    pub fn is_pending(&self) -> bool {
        self.status == SyncStatus::Pending
    }
}

/// GET 响应缓存条目（按请求 URL 作为主键，最后写入者胜出，无过期）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub data: Value,
    /// 写入时间（UTC 毫秒时间戳）
    pub timestamp: i64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, data: Value) -> Self {
        Self {
            key: key.into(),
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}
