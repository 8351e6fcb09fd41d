//! 同步队列 - `syncQueue` 表中 `SyncOperation` 的完整生命周期
//!
//! - 入队：离线时的写操作持久化为 pending 记录
//! - 排空：逐条重放 pending 记录，成功标记 completed，失败累计尝试次数
//! - 清理：只删除 completed 记录，failed 记录保留以供排查

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{OfflineSyncError, Result};
use crate::http_client::{HttpRequest, HttpTransport};
use crate::storage::{HttpMethod, RecordKey, StorageAdapter, SyncOperation, SyncStatus, Table};
use crate::sync::background::BackgroundSyncRegistrar;
use crate::sync::DEFAULT_SYNC_TAG;

pub mod retry_policy;

pub use retry_policy::{FailureReason, RetryPolicy};

/// 单条操作的重放结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainResult {
    pub id: u64,
    pub success: bool,
    /// 服务端返回的状态码（传输层失败时为空）
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub attempts: u32,
    pub status: SyncStatus,
}

/// 队列统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct QueueManager {
    store: Arc<dyn StorageAdapter>,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    registrar: Option<Arc<dyn BackgroundSyncRegistrar>>,
    sync_tag: String,
}

impl QueueManager {
    pub fn new(
        store: Arc<dyn StorageAdapter>,
        transport: Arc<dyn HttpTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            transport,
            policy,
            registrar: None,
            sync_tag: DEFAULT_SYNC_TAG.to_string(),
        }
    }

    /// 设置后台同步注册能力
    pub fn with_registrar(
        mut self,
        registrar: Arc<dyn BackgroundSyncRegistrar>,
        sync_tag: impl Into<String>,
    ) -> Self {
        self.registrar = Some(registrar);
        self.sync_tag = sync_tag.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 写操作入队，返回存储分配的 id
    pub async fn enqueue(
        &self,
        url: &str,
        method: HttpMethod,
        payload: Option<serde_json::Value>,
        entity_type: &str,
    ) -> Result<u64> {
        if !method.is_mutating() {
            return Err(OfflineSyncError::InvalidArgument(
                "GET 请求不进入同步队列".to_string(),
            ));
        }

        let operation = SyncOperation::new(url, method, payload, entity_type);
        let id = self
            .store
            .add(Table::SyncQueue, serde_json::to_value(&operation)?)
            .await?;

        info!("📥 写操作已入队: id={}, {} {} ({})", id, method, url, entity_type);

        if let Some(registrar) = &self.registrar {
            if let Err(e) = registrar.register(&self.sync_tag).await {
                warn!("⚠️ 注册后台同步失败: {}", e);
            }
        }

        Ok(id)
    }

    /// 读取队列中的全部操作（插入顺序）
    pub async fn list(&self) -> Result<Vec<SyncOperation>> {
        let rows = self.store.get_all(Table::SyncQueue).await?;
        let mut operations = Vec::with_capacity(rows.len());

        for (key, record) in rows {
            match serde_json::from_value::<SyncOperation>(record) {
                Ok(mut operation) => {
                    if let Some(id) = key.as_id() {
                        operation.id = id;
                    }
                    operations.push(operation);
                }
                Err(e) => warn!("⚠️ 跳过无法解析的同步记录 {:?}: {}", key, e),
            }
        }

        Ok(operations)
    }

    /// 排空队列：逐条重放所有 pending 操作
    ///
    /// 单条失败不会中断后续操作，也不会向外抛出错误。
    pub async fn drain(&self) -> Vec<DrainResult> {
        let operations = match self.list().await {
            Ok(operations) => operations,
            Err(e) => {
                warn!("⚠️ 读取同步队列失败，跳过本次排空: {}", e);
                return Vec::new();
            }
        };

        let pending: Vec<SyncOperation> = operations.into_iter().filter(|op| op.is_pending()).collect();
        if pending.is_empty() {
            debug!("同步队列没有待处理操作");
            return Vec::new();
        }

        info!("🔄 开始重放 {} 个待处理操作", pending.len());

        let mut results = Vec::with_capacity(pending.len());
        for operation in pending {
            results.push(self.replay(operation).await);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(
            "✅ 重放结束: 成功 {}，失败 {}",
            succeeded,
            results.len() - succeeded
        );
        results
    }

    async fn replay(&self, mut operation: SyncOperation) -> DrainResult {
        let body = if operation.method.is_mutating() {
            operation.payload.clone()
        } else {
            None
        };
        let request = HttpRequest::new(operation.method, operation.url.clone(), body);

        let (status_code, outcome) = match self.transport.send(&request).await {
            Ok(response) => (Some(response.status), response.into_result().map(|_| ())),
            Err(e) => (e.http_status(), Err(e)),
        };

        let mut error = None;
        match outcome {
            Ok(()) => {
                operation.mark_completed();
                debug!("操作 {} 重放成功", operation.id);
            }
            Err(e) => {
                let reason = FailureReason::from(&e);
                let message = reason.describe(&e.to_string());
                let next_status = self.policy.next_status(operation.attempts.saturating_add(1));
                operation.record_failure(message.clone(), next_status);
                warn!(
                    "❌ 操作 {} 重放失败 (attempts={}, status={}): {}",
                    operation.id, operation.attempts, operation.status, message
                );
                error = Some(message);
            }
        }

        if let Err(e) = self.persist(&operation).await {
            warn!("⚠️ 保存操作 {} 的同步状态失败: {}", operation.id, e);
            return DrainResult {
                id: operation.id,
                success: false,
                status_code,
                error: Some(format!("保存同步状态失败: {}", e)),
                attempts: operation.attempts,
                status: operation.status,
            };
        }

        DrainResult {
            id: operation.id,
            success: error.is_none(),
            status_code,
            error,
            attempts: operation.attempts,
            status: operation.status,
        }
    }

    async fn persist(&self, operation: &SyncOperation) -> Result<()> {
        self.store
            .put(
                Table::SyncQueue,
                &RecordKey::Id(operation.id),
                serde_json::to_value(operation)?,
            )
            .await
    }

    /// 删除所有 completed 记录，返回删除数量；failed 记录保留
    pub async fn cleanup(&self) -> Result<usize> {
        let operations = self.list().await?;
        let mut removed = 0;

        for operation in operations
            .iter()
            .filter(|op| op.status == SyncStatus::Completed)
        {
            match self
                .store
                .delete(Table::SyncQueue, &RecordKey::Id(operation.id))
                .await
            {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("⚠️ 删除已完成操作 {} 失败: {}", operation.id, e),
            }
        }

        if removed > 0 {
            info!("🧹 已清理 {} 个已完成操作", removed);
        }
        Ok(removed)
    }

    /// 队列总行数（包含 failed，仅作为 UI 提示）
    pub async fn pending_count(&self) -> Result<usize> {
        self.store.count(Table::SyncQueue).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let operations = self.list().await?;
        let mut stats = QueueStats {
            total: operations.len(),
            ..QueueStats::default()
        };

        for operation in &operations {
            match operation.status {
                SyncStatus::Pending => stats.pending += 1,
                SyncStatus::Completed => stats.completed += 1,
                SyncStatus::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, UnavailableStore};
    use crate::sync::background::WakeRegistrar;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn queue_with(transport: Arc<MockTransport>) -> QueueManager {
        QueueManager::new(Arc::new(MemoryStore::new()), transport, RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_operation() {
        let queue = queue_with(Arc::new(MockTransport::new()));

        let id = queue
            .enqueue("/api/notes", HttpMethod::Post, Some(json!({"title": "x"})), "api")
            .await
            .unwrap();

        let operations = queue.list().await.unwrap();
        assert_eq!(operations.len(), 1);
        let op = &operations[0];
        assert_eq!(op.id, id);
        assert_eq!(op.url, "/api/notes");
        assert_eq!(op.method, HttpMethod::Post);
        assert_eq!(op.payload, Some(json!({"title": "x"})));
        assert_eq!(op.status, SyncStatus::Pending);
        assert_eq!(op.attempts, 0);
    }

    #[tokio::test]
    async fn test_enqueue_ids_strictly_increase() {
        let queue = queue_with(Arc::new(MockTransport::new()));

        let mut ids = Vec::new();
        for i in 0..10 {
            let method = if i % 2 == 0 { HttpMethod::Put } else { HttpMethod::Delete };
            ids.push(queue.enqueue("/api/rooms/1", method, None, "rooms").await.unwrap());
        }

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_get() {
        let queue = queue_with(Arc::new(MockTransport::new()));
        let err = queue
            .enqueue("/api/events", HttpMethod::Get, None, "api")
            .await
            .unwrap_err();
        assert!(matches!(err, OfflineSyncError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_drain_success_then_cleanup() {
        let transport = Arc::new(MockTransport::new());
        let queue = queue_with(transport.clone());
        queue
            .enqueue("/api/notes", HttpMethod::Post, Some(json!({"title": "x"})), "api")
            .await
            .unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 1);

        let results = queue.drain().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].status, SyncStatus::Completed);
        assert_eq!(results[0].status_code, Some(200));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].url, "/api/notes");
        assert_eq!(requests[0].body, Some(json!({"title": "x"})));

        let op = &queue.list().await.unwrap()[0];
        assert_eq!(op.status, SyncStatus::Completed);
        assert!(op.completed_at.is_some());

        assert_eq!(queue.cleanup().await.unwrap(), 1);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_three_failures_mark_failed_and_stop_replay() {
        let transport = Arc::new(MockTransport::always(500, json!({"message": "boom"})));
        let queue = queue_with(transport.clone());
        queue
            .enqueue("/api/notes", HttpMethod::Post, Some(json!({"title": "x"})), "api")
            .await
            .unwrap();

        for expected_attempts in 1..=3u32 {
            let results = queue.drain().await;
            assert_eq!(results.len(), 1);
            assert!(!results[0].success);
            assert_eq!(results[0].attempts, expected_attempts);
        }

        let op = &queue.list().await.unwrap()[0];
        assert_eq!(op.status, SyncStatus::Failed);
        assert_eq!(op.attempts, 3);
        assert!(op.last_error.as_deref().unwrap_or_default().contains("500"));

        // failed 不再自动重放
        assert!(queue.drain().await.is_empty());
        assert_eq!(transport.request_count(), 3);

        // failed 在清理后保留
        assert_eq!(queue.cleanup().await.unwrap(), 0);
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_later_operations() {
        let transport = Arc::new(MockTransport::new());
        transport.push_status(200, json!({}));
        transport.push_error("connection unavailable: refused");
        transport.push_status(201, json!({}));
        transport.push_status(204, json!(null));
        let queue = queue_with(transport.clone());

        for i in 0..4 {
            queue
                .enqueue(&format!("/api/notes/{}", i), HttpMethod::Put, Some(json!({"n": i})), "notes")
                .await
                .unwrap();
        }

        let results = queue.drain().await;
        assert_eq!(results.len(), 4);
        assert_eq!(
            results.iter().map(|r| r.success).collect::<Vec<_>>(),
            vec![true, false, true, true]
        );
        assert_eq!(results[1].status_code, None);
        assert_eq!(results[1].status, SyncStatus::Pending);

        // 按插入顺序重放
        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["/api/notes/0", "/api/notes/1", "/api/notes/2", "/api/notes/3"]);
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_completed() {
        let transport = Arc::new(MockTransport::new());
        let queue = QueueManager::new(
            Arc::new(MemoryStore::new()),
            transport.clone(),
            RetryPolicy::new(1),
        );

        transport.push_status(200, json!({}));
        transport.push_status(500, json!({}));
        transport.push_error("connection unavailable");
        for url in ["/api/a/1", "/api/b/2", "/api/c/3"] {
            queue.enqueue(url, HttpMethod::Post, None, "x").await.unwrap();
        }
        queue.drain().await;
        // 再入队一个不重放的 pending
        queue.enqueue("/api/d/4", HttpMethod::Patch, None, "d").await.unwrap();

        let before = queue.stats().await.unwrap();
        assert_eq!(before, QueueStats { total: 4, pending: 1, completed: 1, failed: 2 });

        assert_eq!(queue.cleanup().await.unwrap(), 1);
        let after = queue.stats().await.unwrap();
        assert_eq!(after, QueueStats { total: 3, pending: 1, completed: 0, failed: 2 });
    }

    #[tokio::test]
    async fn test_drain_with_unavailable_storage_is_empty() {
        let queue = QueueManager::new(
            Arc::new(UnavailableStore::new("unsupported")),
            Arc::new(MockTransport::new()),
            RetryPolicy::default(),
        );
        assert!(queue.drain().await.is_empty());
        assert!(queue.pending_count().await.unwrap_err().is_storage_unavailable());
    }

    #[tokio::test]
    async fn test_enqueue_registers_background_sync() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let queue = queue_with(Arc::new(MockTransport::new()))
            .with_registrar(Arc::new(WakeRegistrar::new(tx)), "campus-sync");

        queue.enqueue("/api/notes", HttpMethod::Post, None, "api").await.unwrap();
        assert_eq!(rx.recv().await.map(|s| s.tag), Some("campus-sync".to_string()));
    }

    #[tokio::test]
    async fn test_registration_failure_is_not_fatal() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let queue = queue_with(Arc::new(MockTransport::new()))
            .with_registrar(Arc::new(WakeRegistrar::new(tx)), "campus-sync");

        assert!(queue.enqueue("/api/notes", HttpMethod::Post, None, "api").await.is_ok());
    }
}
