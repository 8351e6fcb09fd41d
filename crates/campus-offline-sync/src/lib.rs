//! Campus Offline Sync - 校园应用的离线数据同步引擎
//!
//! 本库让客户端在网络不稳定时仍然可用：
//! - 📦 本地持久化：带版本号的 sled 数据库，保存同步队列和响应缓存
//! - 📥 离线写入：写操作在离线时入队，网络恢复后按顺序重放
//! - 🔁 有限重试：每个操作最多尝试 3 次，失败记录保留以供排查
//! - 📡 网络感知：读请求离线时回退到最后一次成功的响应
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use campus_offline_sync::{OfflineSync, OfflineSyncConfig, RequestOptions, StaticNetworkListener};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OfflineSyncConfig::builder()
//!         .data_dir("/path/to/data")
//!         .base_url("https://campus.example.edu")
//!         .build();
//!
//!     let listener = Arc::new(StaticNetworkListener::default());
//!     let sync = OfflineSync::initialize(config, Some(listener)).await?;
//!
//!     // 读：在线走网络并写缓存，离线读缓存
//!     let events = sync.request("/api/events", RequestOptions::get()).await?;
//!     println!("{}", events.into_json());
//!
//!     // 写：离线时入队，返回「已排队」确认
//!     sync.request("/api/notes", RequestOptions::post(json!({"title": "x"}))).await?;
//!
//!     sync.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod gateway;
pub mod http_client;
pub mod logging;
pub mod network;
pub mod sdk;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;

// 重新导出核心类型，方便使用
pub use error::{OfflineSyncError, Result};
pub use gateway::{derive_entity_type, GatewayResponse, QueuedAck, RequestGateway, RequestOptions};
pub use http_client::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use logging::init_tracing;
pub use network::{NetworkMonitor, NetworkStatus, NetworkStatusEvent, NetworkStatusListener, StaticNetworkListener};
pub use sdk::{HttpClientConfig, OfflineSync, OfflineSyncConfig, OfflineSyncConfigBuilder, OfflineSyncParts};
pub use storage::queue::{FailureReason, RetryPolicy};
pub use storage::{
    CacheEntry, CacheManager, DrainResult, HttpMethod, KvStore, MemoryStore, QueueManager, QueueStats,
    StorageAdapter, SyncOperation, SyncStatus, Table, UnavailableStore,
};
pub use sync::{
    BackgroundSyncRegistrar, NoopRegistrar, SyncCoordinator, SyncOutcome, SyncReport, SyncTrigger,
    WakeRegistrar, WakeSignal, DEFAULT_SYNC_TAG,
};
