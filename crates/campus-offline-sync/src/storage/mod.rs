//! 存储模块 - 离线同步的本地持久化层
//!
//! 一个带版本号的本地数据库，包含两张逻辑表：
//! - `syncQueue`：待重放的写操作，自增主键 `id`
//! - `offlineData`：GET 响应缓存，显式主键 `key`（请求 URL）
//!
//! 上层只通过 [`StorageAdapter`] 访问存储，不接触 sled 等底层细节。

use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{OfflineSyncError, Result};

pub mod cache;
pub mod entities;
pub mod kv;
pub mod memory;
pub mod queue;

pub use cache::CacheManager;
pub use entities::{CacheEntry, HttpMethod, SyncOperation, SyncStatus};
pub use kv::KvStore;
pub use memory::MemoryStore;
pub use queue::{DrainResult, QueueManager, QueueStats};

/// 逻辑表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    SyncQueue,
    OfflineData,
}

impl Table {
    pub const ALL: [Table; 2] = [Table::SyncQueue, Table::OfflineData];

    pub fn name(&self) -> &'static str {
        match self {
            Table::SyncQueue => "syncQueue",
            Table::OfflineData => "offlineData",
        }
    }

    /// 是否使用自增主键
    pub fn auto_increment(&self) -> bool {
        matches!(self, Table::SyncQueue)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 记录主键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    /// 自增主键（syncQueue）
    Id(u64),
    /// 显式主键（offlineData 的 URL）
    Name(String),
}

impl RecordKey {
    /// 编码为存储键；自增主键用大端序，保证全表扫描按插入顺序返回
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            RecordKey::Id(id) => id.to_be_bytes().to_vec(),
            RecordKey::Name(name) => name.as_bytes().to_vec(),
        }
    }

    pub fn from_bytes(table: Table, bytes: &[u8]) -> Result<Self> {
        if table.auto_increment() {
            let raw: [u8; 8] = bytes.try_into().map_err(|_| {
                OfflineSyncError::Storage(format!("{} 表主键长度异常: {}", table, bytes.len()))
            })?;
            Ok(RecordKey::Id(u64::from_be_bytes(raw)))
        } else {
            let name = String::from_utf8(bytes.to_vec())
                .map_err(|e| OfflineSyncError::Storage(format!("{} 表主键不是 UTF-8: {}", table, e)))?;
            Ok(RecordKey::Name(name))
        }
    }

    pub fn as_id(&self) -> Option<u64> {
        match self {
            RecordKey::Id(id) => Some(*id),
            RecordKey::Name(_) => None,
        }
    }
}

impl From<u64> for RecordKey {
    fn from(id: u64) -> Self {
        RecordKey::Id(id)
    }
}

impl From<&str> for RecordKey {
    fn from(name: &str) -> Self {
        RecordKey::Name(name.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(name: String) -> Self {
        RecordKey::Name(name)
    }
}

/// 本地持久化存储适配器
///
/// 所有方法都是异步的；实现方必须把底层不可用统一转换为
/// [`OfflineSyncError::StorageUnavailable`]，不能直接 panic。
#[async_trait]
pub trait StorageAdapter: Debug + Send + Sync {
    /// 幂等地打开（首次使用时创建）数据库
    async fn open(&self) -> Result<()>;

    /// 确保给定的表都存在；有缺失时升级数据库版本并创建，返回当前版本
    async fn ensure_tables(&self, tables: &[Table]) -> Result<u32>;

    /// 当前数据库版本
    async fn version(&self) -> Result<u32>;

    /// 插入记录并返回自增主键（仅自增表）；主键会写回记录的 `id` 字段
    async fn add(&self, table: Table, record: Value) -> Result<u64>;

    /// 按显式主键写入（存在则覆盖）
    async fn put(&self, table: Table, key: &RecordKey, record: Value) -> Result<()>;

    async fn get(&self, table: Table, key: &RecordKey) -> Result<Option<Value>>;

    /// 全表读取，按主键顺序（自增表即插入顺序）
    async fn get_all(&self, table: Table) -> Result<Vec<(RecordKey, Value)>>;

    /// 删除记录，返回记录之前是否存在
    async fn delete(&self, table: Table, key: &RecordKey) -> Result<bool>;

    async fn count(&self, table: Table) -> Result<usize>;
}

/// 不可用的存储（当前环境不支持本地持久化，或数据库打不开）
///
/// 每个操作都返回 `StorageUnavailable`，上层据此降级为「直连网络」。
#[derive(Debug, Clone)]
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> OfflineSyncError {
        OfflineSyncError::StorageUnavailable(self.reason.clone())
    }
}

#[async_trait]
impl StorageAdapter for UnavailableStore {
    async fn open(&self) -> Result<()> {
        Err(self.error())
    }

    async fn ensure_tables(&self, _tables: &[Table]) -> Result<u32> {
        Err(self.error())
    }

    async fn version(&self) -> Result<u32> {
        Err(self.error())
    }

    async fn add(&self, _table: Table, _record: Value) -> Result<u64> {
        Err(self.error())
    }

    async fn put(&self, _table: Table, _key: &RecordKey, _record: Value) -> Result<()> {
        Err(self.error())
    }

    async fn get(&self, _table: Table, _key: &RecordKey) -> Result<Option<Value>> {
        Err(self.error())
    }

    async fn get_all(&self, _table: Table) -> Result<Vec<(RecordKey, Value)>> {
        Err(self.error())
    }

    async fn delete(&self, _table: Table, _key: &RecordKey) -> Result<bool> {
        Err(self.error())
    }

    async fn count(&self, _table: Table) -> Result<usize> {
        Err(self.error())
    }
}

/// 把自增主键写回记录的 `id` 字段
pub(crate) fn stamp_id(record: &mut Value, id: u64) -> Result<()> {
    match record {
        Value::Object(map) => {
            map.insert("id".to_string(), Value::from(id));
            Ok(())
        }
        _ => Err(OfflineSyncError::InvalidArgument(
            "自增表的记录必须是 JSON 对象".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_encoding_preserves_order() {
        let a = RecordKey::Id(9).to_bytes();
        let b = RecordKey::Id(10).to_bytes();
        let c = RecordKey::Id(256).to_bytes();
        assert!(a < b && b < c);

        let decoded = RecordKey::from_bytes(Table::SyncQueue, &c).unwrap();
        assert_eq!(decoded, RecordKey::Id(256));
    }

    #[test]
    fn test_record_key_name_roundtrip() {
        let key = RecordKey::from("/api/events?page=2");
        let decoded = RecordKey::from_bytes(Table::OfflineData, &key.to_bytes()).unwrap();
        assert_eq!(decoded, key);
        assert!(RecordKey::from_bytes(Table::SyncQueue, b"short").is_err());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_operation() {
        let store = UnavailableStore::new("no durable storage in this context");
        assert!(store.open().await.unwrap_err().is_storage_unavailable());
        assert!(store
            .count(Table::SyncQueue)
            .await
            .unwrap_err()
            .is_storage_unavailable());
        assert!(store
            .get(Table::OfflineData, &RecordKey::from("/api/events"))
            .await
            .unwrap_err()
            .is_storage_unavailable());
    }
}
