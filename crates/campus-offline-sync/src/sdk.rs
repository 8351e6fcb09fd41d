//! 离线同步入口
//!
//! [`OfflineSync`] 把存储、缓存、同步队列、请求网关和同步协调器组装在一起，
//! 应用只需要 `initialize` 一次，之后通过 `request` 访问网络。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{OfflineSyncError, Result};
use crate::gateway::{GatewayResponse, RequestGateway, RequestOptions};
use crate::http_client::{HttpTransport, ReqwestTransport};
use crate::network::{NetworkMonitor, NetworkStatus, NetworkStatusListener};
use crate::storage::queue::RetryPolicy;
use crate::storage::{
    CacheManager, KvStore, QueueManager, QueueStats, StorageAdapter, Table, UnavailableStore,
};
use crate::sync::{
    BackgroundSyncRegistrar, CoordinatorConfig, SyncCoordinator, SyncOutcome, SyncReport,
    WakeRegistrar, WakeSignal, DEFAULT_SYNC_TAG,
};

/// HTTP 客户端配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒），None 表示不限制
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(15),
            request_timeout_secs: None,
        }
    }
}

/// 离线同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineSyncConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 数据库名称
    pub database_name: String,
    /// 相对 URL 的服务端地址，例如 https://campus.example.edu
    pub base_url: Option<String>,
    /// 重试配置
    pub retry: RetryPolicy,
    /// 启动时已在线，延迟多久执行首次同步（毫秒）
    pub initial_sync_delay_ms: u64,
    /// 后台同步标签
    pub sync_tag: String,
    /// HTTP 客户端配置
    pub http: HttpClientConfig,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for OfflineSyncConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            database_name: "campus-offline".to_string(),
            base_url: None,
            retry: RetryPolicy::default(),
            initial_sync_delay_ms: 2000,
            sync_tag: DEFAULT_SYNC_TAG.to_string(),
            http: HttpClientConfig::default(),
            debug_mode: false,
        }
    }
}

/// 获取默认数据目录 ~/.campus-sync/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".campus-sync")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".campus-sync")
    } else {
        PathBuf::from("./campus_sync_data")
    }
}

impl OfflineSyncConfig {
    pub fn builder() -> OfflineSyncConfigBuilder {
        OfflineSyncConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(OfflineSyncError::Config("数据目录不能为空".to_string()));
        }

        if self.database_name.trim().is_empty() {
            return Err(OfflineSyncError::Config("数据库名称不能为空".to_string()));
        }

        if self.sync_tag.trim().is_empty() {
            return Err(OfflineSyncError::Config("后台同步标签不能为空".to_string()));
        }

        if self.retry.max_attempts == 0 {
            return Err(OfflineSyncError::Config("最大尝试次数不能为0".to_string()));
        }

        Ok(())
    }

    fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            sync_tag: self.sync_tag.clone(),
            initial_sync_delay: Duration::from_millis(self.initial_sync_delay_ms),
        }
    }
}

/// 离线同步配置构建器
#[derive(Debug, Default)]
pub struct OfflineSyncConfigBuilder {
    config: OfflineSyncConfig,
}

impl OfflineSyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: OfflineSyncConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn database_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.database_name = name.into();
        self
    }

    pub fn base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.retry = RetryPolicy::new(max_attempts);
        self
    }

    pub fn initial_sync_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.initial_sync_delay_ms = delay_ms;
        self
    }

    pub fn sync_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.config.sync_tag = tag.into();
        self
    }

    /// 设置 HTTP 客户端配置
    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http = config;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> OfflineSyncConfig {
        self.config
    }
}

/// 自定义组件（测试或嵌入方使用）
#[derive(Debug)]
pub struct OfflineSyncParts {
    pub store: Arc<dyn StorageAdapter>,
    pub transport: Arc<dyn HttpTransport>,
    /// 为空表示无法观察网络状态
    pub listener: Option<Arc<dyn NetworkStatusListener>>,
    /// 为空时使用进程内唤醒通道
    pub registrar: Option<Arc<dyn BackgroundSyncRegistrar>>,
}

#[derive(Debug)]
pub struct OfflineSync {
    config: OfflineSyncConfig,
    store: Arc<dyn StorageAdapter>,
    queue: Arc<QueueManager>,
    gateway: RequestGateway,
    monitor: Option<Arc<NetworkMonitor>>,
    coordinator: Arc<SyncCoordinator>,
    shutting_down: AtomicBool,
}

impl OfflineSync {
    /// 初始化：打开本地数据库、创建 HTTP 客户端并启动同步协调器
    ///
    /// 数据库打不开时不会失败：离线功能被禁用，在线请求照常透传。
    pub async fn initialize(
        config: OfflineSyncConfig,
        listener: Option<Arc<dyn NetworkStatusListener>>,
    ) -> Result<Arc<Self>> {
        info!("正在初始化离线同步...");
        config.validate()?;

        let store = open_store(&config).await;
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(
            &config.http,
            config.base_url.as_deref(),
        )?);

        Self::with_parts(
            config,
            OfflineSyncParts {
                store,
                transport,
                listener,
                registrar: None,
            },
        )
        .await
    }

    pub async fn with_parts(config: OfflineSyncConfig, parts: OfflineSyncParts) -> Result<Arc<Self>> {
        config.validate()?;

        // 调试模式下安装 debug 级别的日志订阅者；宿主已安装时保持不变
        if config.debug_mode && crate::logging::init_tracing(true) {
            debug!("🐛 调试模式已开启");
        }

        let monitor = match parts.listener {
            Some(listener) => {
                let monitor = Arc::new(NetworkMonitor::new(listener));
                monitor.start().await?;
                Some(monitor)
            }
            None => None,
        };

        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let registrar = parts
            .registrar
            .unwrap_or_else(|| Arc::new(WakeRegistrar::new(wake_tx.clone())));

        let queue = Arc::new(
            QueueManager::new(parts.store.clone(), parts.transport.clone(), config.retry.clone())
                .with_registrar(registrar, config.sync_tag.clone()),
        );
        let cache = CacheManager::new(parts.store.clone());
        let gateway = RequestGateway::new(parts.transport, cache, queue.clone(), monitor.clone());

        let coordinator = Arc::new(SyncCoordinator::with_wake_channel(
            queue.clone(),
            monitor.clone(),
            config.coordinator_config(),
            wake_tx,
            wake_rx,
        ));
        coordinator.start().await?;

        info!("✅ 离线同步初始化完成");
        Ok(Arc::new(Self {
            config,
            store: parts.store,
            queue,
            gateway,
            monitor,
            coordinator,
            shutting_down: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &OfflineSyncConfig {
        &self.config
    }

    /// 发出请求（在线、缓存或入队，由网关决定）
    pub async fn request(&self, url: &str, options: RequestOptions) -> Result<GatewayResponse> {
        self.check_running()?;
        self.gateway.request(url, options).await
    }

    /// 队列中的记录数，用于 UI 提示；读取失败时返回 0
    pub async fn pending_count(&self) -> usize {
        match self.queue.pending_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!("⚠️ 读取待同步数量失败: {}", e);
                0
            }
        }
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    /// 手动同步
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        self.check_running()?;
        self.coordinator.sync_now().await
    }

    pub async fn last_sync_report(&self) -> Option<SyncReport> {
        self.coordinator.last_report().await
    }

    /// 后台工作者投递唤醒信号的通道
    pub fn wake_sender(&self) -> mpsc::UnboundedSender<WakeSignal> {
        self.coordinator.wake_sender()
    }

    /// 由平台层推送网络状态
    pub async fn set_network_status(&self, status: NetworkStatus) {
        match &self.monitor {
            Some(monitor) => monitor.set_status(status).await,
            None => debug!("未启用网络监控，忽略网络状态: {:?}", status),
        }
    }

    pub async fn network_status(&self) -> Option<NetworkStatus> {
        match &self.monitor {
            Some(monitor) => Some(monitor.get_status().await),
            None => None,
        }
    }

    pub async fn storage_version(&self) -> Result<u32> {
        self.store.version().await
    }

    /// 关闭：停止所有监听（可重复调用）
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("正在关闭离线同步...");
        self.coordinator.teardown().await;
        if let Some(monitor) = &self.monitor {
            monitor.stop().await;
        }
        info!("离线同步关闭完成");
    }

    fn check_running(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(OfflineSyncError::ShuttingDown);
        }
        Ok(())
    }
}

/// 打开数据库并在启动时建好两张表；失败时退化为不可用存储
async fn open_store(config: &OfflineSyncConfig) -> Arc<dyn StorageAdapter> {
    let store = KvStore::new(&config.data_dir, &config.database_name);

    if let Err(e) = store.open().await {
        warn!("⚠️ 本地数据库不可用，离线功能已禁用: {}", e);
        return Arc::new(UnavailableStore::new(e.to_string()));
    }

    match store.ensure_tables(&Table::ALL).await {
        Ok(version) => info!("📦 本地数据库已就绪: {:?} (version {})", store.path(), version),
        Err(e) => warn!("⚠️ 创建数据表失败，将在首次使用时重试: {}", e),
    }

    Arc::new(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::StaticNetworkListener;
    use crate::storage::{MemoryStore, SyncStatus};
    use crate::testing::MockTransport;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(dir: &Path) -> OfflineSyncConfig {
        OfflineSyncConfig::builder()
            .data_dir(dir)
            .initial_sync_delay_ms(10)
            .build()
    }

    #[test]
    fn test_default_config() {
        let config = OfflineSyncConfig::default();
        assert_eq!(config.database_name, "campus-offline");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.initial_sync_delay_ms, 2000);
        assert_eq!(config.sync_tag, "sync-offline-data");
        assert_eq!(config.http.request_timeout_secs, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let config = OfflineSyncConfig::builder().max_attempts(0).build();
        assert!(matches!(config.validate(), Err(OfflineSyncError::Config(_))));

        let config = OfflineSyncConfig::builder().database_name(" ").build();
        assert!(config.validate().is_err());

        let config = OfflineSyncConfig::builder().sync_tag("").build();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_debug_mode_enables_debug_logging() {
        let temp_dir = TempDir::new().unwrap();
        let config = OfflineSyncConfig::builder()
            .data_dir(temp_dir.path())
            .debug_mode(true)
            .build();

        let sync = OfflineSync::with_parts(
            config,
            OfflineSyncParts {
                store: Arc::new(MemoryStore::new()),
                transport: Arc::new(MockTransport::new()),
                listener: None,
                registrar: None,
            },
        )
        .await
        .unwrap();

        assert!(sync.config().debug_mode);
        // 全局订阅者已安装，再次安装失败
        assert!(!crate::logging::init_tracing(false));
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(tracing::enabled!(tracing::Level::DEBUG));
        }
        sync.shutdown().await;
    }

    #[tokio::test]
    async fn test_offline_writes_survive_restart() {
        let temp_dir = TempDir::new().unwrap();

        {
            let listener = Arc::new(StaticNetworkListener::new(NetworkStatus::Offline));
            let sync = OfflineSync::initialize(test_config(temp_dir.path()), Some(listener))
                .await
                .unwrap();
            assert_eq!(sync.storage_version().await.unwrap(), 2);

            let response = sync
                .request("/api/notes", RequestOptions::post(json!({"title": "x"})))
                .await
                .unwrap();
            assert!(response.is_queued());
            assert_eq!(sync.pending_count().await, 1);
            sync.shutdown().await;
        }

        let listener = Arc::new(StaticNetworkListener::new(NetworkStatus::Offline));
        let sync = OfflineSync::initialize(test_config(temp_dir.path()), Some(listener))
            .await
            .unwrap();
        assert_eq!(sync.pending_count().await, 1);
        assert_eq!(sync.queue_stats().await.unwrap().pending, 1);
        sync.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnect_drains_queue() {
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let listener = Arc::new(StaticNetworkListener::new(NetworkStatus::Offline));
        let sync = OfflineSync::with_parts(
            test_config(temp_dir.path()),
            OfflineSyncParts {
                store: Arc::new(MemoryStore::new()),
                transport: transport.clone(),
                listener: Some(listener),
                registrar: None,
            },
        )
        .await
        .unwrap();

        sync.request("/api/rooms/12", RequestOptions::patch(json!({"booked": true})))
            .await
            .unwrap();
        assert_eq!(sync.pending_count().await, 1);

        sync.set_network_status(NetworkStatus::Online).await;
        for _ in 0..100 {
            if sync.pending_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sync.pending_count().await, 0);
        assert_eq!(transport.request_count(), 1);

        sync.shutdown().await;
        sync.shutdown().await;
        assert!(matches!(sync.sync_now().await, Err(OfflineSyncError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_unavailable_storage_still_passes_through_online() {
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::always(200, json!({"events": []})));
        let sync = OfflineSync::with_parts(
            test_config(temp_dir.path()),
            OfflineSyncParts {
                store: Arc::new(UnavailableStore::new("private browsing")),
                transport: transport.clone(),
                listener: Some(Arc::new(StaticNetworkListener::new(NetworkStatus::Online))),
                registrar: None,
            },
        )
        .await
        .unwrap();

        let response = sync.request("/api/events", RequestOptions::get()).await.unwrap();
        assert_eq!(response.into_json(), json!({"events": [], "fromCache": false}));
        assert_eq!(sync.pending_count().await, 0);

        sync.set_network_status(NetworkStatus::Offline).await;
        let err = sync
            .request("/api/notes", RequestOptions::post(json!({})))
            .await
            .unwrap_err();
        assert!(err.is_storage_unavailable());
        sync.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_operations_are_kept_after_sync() {
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::always(500, json!({"message": "down"})));
        let sync = OfflineSync::with_parts(
            OfflineSyncConfig::builder()
                .data_dir(temp_dir.path())
                .max_attempts(1)
                .build(),
            OfflineSyncParts {
                store: Arc::new(MemoryStore::new()),
                transport,
                listener: Some(Arc::new(StaticNetworkListener::new(NetworkStatus::Offline))),
                registrar: None,
            },
        )
        .await
        .unwrap();

        sync.request("/api/notes", RequestOptions::post(json!({"title": "x"})))
            .await
            .unwrap();
        let outcome = sync.sync_now().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.results[0].status, SyncStatus::Failed);

        let stats = sync.queue_stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(sync.pending_count().await, 1);
        sync.shutdown().await;
    }
}
