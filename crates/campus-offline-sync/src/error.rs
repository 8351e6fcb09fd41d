use thiserror::Error;

/// 离线同步引擎的统一错误类型
#[derive(Debug, Error)]
pub enum OfflineSyncError {
    /// 本地持久化存储不可用（未能打开或当前环境不支持）
    ///
    /// 调用方应视为「离线功能已禁用」，而不是致命错误。
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// 已打开的存储在读写时失败
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 网络请求失败或返回了非成功状态码
    #[error("Network error{}: {message}", status_suffix(.status))]
    Network {
        status: Option<u16>,
        message: String,
    },

    /// 离线且没有缓存
    #[error("no cached data available and you are offline: {url}")]
    NoCachedData { url: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Config error: {0}")]
    Config(String),

    /// 同步协调器已关闭
    #[error("Shutting down")]
    ShuttingDown,
}

impl From<serde_json::Error> for OfflineSyncError {
    fn from(error: serde_json::Error) -> Self {
        OfflineSyncError::Serialization(error.to_string())
    }
}

impl From<sled::Error> for OfflineSyncError {
    fn from(error: sled::Error) -> Self {
        OfflineSyncError::Storage(error.to_string())
    }
}

impl From<std::io::Error> for OfflineSyncError {
    fn from(error: std::io::Error) -> Self {
        OfflineSyncError::Storage(error.to_string())
    }
}

impl OfflineSyncError {
    /// 构造网络错误
    pub fn network(status: Option<u16>, message: impl Into<String>) -> Self {
        OfflineSyncError::Network {
            status,
            message: message.into(),
        }
    }

    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, OfflineSyncError::StorageUnavailable(_))
    }

    pub fn is_network(&self) -> bool {
        matches!(self, OfflineSyncError::Network { .. })
    }

    /// 获取 HTTP 状态码（仅网络错误且服务端有响应时存在）
    pub fn http_status(&self) -> Option<u16> {
        match self {
            OfflineSyncError::Network { status, .. } => *status,
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" [{}]", s)).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, OfflineSyncError>;
