//! 响应缓存 - `offlineData` 表
//!
//! 只保存每个 URL 最后一次成功的 GET 响应，没有过期和淘汰策略。

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::storage::entities::CacheEntry;
use crate::storage::{RecordKey, StorageAdapter, Table};

#[derive(Debug, Clone)]
pub struct CacheManager {
    store: Arc<dyn StorageAdapter>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn StorageAdapter>) -> Self {
        Self { store }
    }

    /// 写入（覆盖）缓存
    pub async fn store(&self, key: &str, data: Value) -> Result<()> {
        let entry = CacheEntry::new(key, data);
        let record = serde_json::to_value(&entry)?;
        self.store
            .put(Table::OfflineData, &RecordKey::from(key), record)
            .await?;
        debug!("缓存已更新: {}", key);
        Ok(())
    }

    /// 读取缓存数据；不存在时返回 `None`
    pub async fn fetch(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entry(key).await?.map(|entry| entry.data))
    }

    /// 读取完整缓存条目（包含写入时间）
    pub async fn entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        match self.store.get(Table::OfflineData, &RecordKey::from(key)).await? {
            Some(record) => Ok(Some(serde_json::from_value(record)?)),
            None => Ok(None),
        }
    }
}
