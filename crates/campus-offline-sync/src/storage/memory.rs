//! 基于内存的存储实现（非持久化，用于测试或显式的临时模式）

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{OfflineSyncError, Result};
use crate::storage::{stamp_id, RecordKey, StorageAdapter, Table};

#[derive(Debug)]
struct MemoryInner {
    version: u32,
    tables: HashMap<Table, BTreeMap<RecordKey, Value>>,
    next_id: u64,
}

#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                version: 1,
                tables: HashMap::new(),
                next_id: 0,
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInner {
    fn ensure(&mut self, tables: &[Table]) -> u32 {
        let missing: Vec<Table> = tables
            .iter()
            .copied()
            .filter(|t| !self.tables.contains_key(t))
            .collect();
        if !missing.is_empty() {
            for table in missing {
                self.tables.insert(table, BTreeMap::new());
            }
            self.version += 1;
        }
        self.version
    }

    fn table_mut(&mut self, table: Table) -> &mut BTreeMap<RecordKey, Value> {
        self.ensure(&[table]);
        self.tables.entry(table).or_default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStore {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_tables(&self, tables: &[Table]) -> Result<u32> {
        Ok(self.inner.lock().await.ensure(tables))
    }

    async fn version(&self) -> Result<u32> {
        Ok(self.inner.lock().await.version)
    }

    async fn add(&self, table: Table, mut record: Value) -> Result<u64> {
        if !table.auto_increment() {
            return Err(OfflineSyncError::InvalidArgument(format!(
                "{} 表使用显式主键，请使用 put",
                table
            )));
        }

        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        stamp_id(&mut record, id)?;
        inner.table_mut(table).insert(RecordKey::Id(id), record);
        Ok(id)
    }

    async fn put(&self, table: Table, key: &RecordKey, record: Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.table_mut(table).insert(key.clone(), record);
        Ok(())
    }

    async fn get(&self, table: Table, key: &RecordKey) -> Result<Option<Value>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.table_mut(table).get(key).cloned())
    }

    async fn get_all(&self, table: Table) -> Result<Vec<(RecordKey, Value)>> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .table_mut(table)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete(&self, table: Table, key: &RecordKey) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.table_mut(table).remove(key).is_some())
    }

    async fn count(&self, table: Table) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        Ok(inner.table_mut(table).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.ensure_tables(&Table::ALL).await.unwrap(), 2);

        let first = store.add(Table::SyncQueue, json!({"url": "/api/notes"})).await.unwrap();
        let second = store.add(Table::SyncQueue, json!({"url": "/api/rooms"})).await.unwrap();
        assert!(second > first);

        let row = store
            .get(Table::SyncQueue, &RecordKey::Id(first))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["id"], json!(first));

        assert!(store.delete(Table::SyncQueue, &RecordKey::Id(first)).await.unwrap());
        assert_eq!(store.count(Table::SyncQueue).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_lazy_table_upgrade() {
        let store = MemoryStore::new();
        store.ensure_tables(&[Table::SyncQueue]).await.unwrap();
        assert_eq!(store.version().await.unwrap(), 2);

        store
            .put(Table::OfflineData, &RecordKey::from("/api/books"), json!({"data": []}))
            .await
            .unwrap();
        assert_eq!(store.version().await.unwrap(), 3);
    }
}
