//! KV 存储模块 - 基于 sled 的本地持久化数据库
//!
//! 本模块提供：
//! - 命名数据库（`<data_dir>/<database_name>`），幂等打开
//! - 每张逻辑表对应一个 sled Tree
//! - `__meta` Tree 记录数据库版本和已创建的表
//! - 表缺失时显式升级版本并创建，调用方无需单独迁移

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use sled::{Db, Tree};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{OfflineSyncError, Result};
use crate::storage::{stamp_id, RecordKey, StorageAdapter, Table};

const META_TREE: &str = "__meta";
const VERSION_KEY: &[u8] = b"version";
const TABLE_KEY_PREFIX: &str = "table:";

/// sled 存储组件
#[derive(Debug)]
pub struct KvStore {
    path: PathBuf,
    db: RwLock<Option<Db>>,
    /// 串行化版本升级，避免两条升级路径竞争同一个版本号
    upgrade_lock: Mutex<()>,
}

impl KvStore {
    /// 创建存储实例（不立即打开，首次使用或调用 `open()` 时打开）
    pub fn new(base_path: &Path, database_name: &str) -> Self {
        Self {
            path: base_path.join(database_name),
            db: RwLock::new(None),
            upgrade_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open_db(&self) -> Result<Db> {
        tokio::fs::create_dir_all(&self.path).await.map_err(|e| {
            OfflineSyncError::StorageUnavailable(format!("创建数据库目录失败: {}", e))
        })?;

        // 上一个实例可能刚释放文件锁，带退避重试
        const MAX_OPEN_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 100;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&self.path) {
                Ok(db) => return Ok(db),
                Err(e) => {
                    let msg = e.to_string();
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        debug!("数据库被占用，{}ms 后重试打开", delay_ms);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }

        Err(OfflineSyncError::StorageUnavailable(
            last_err
                .map(|e| format!("打开 sled 数据库失败: {}", e))
                .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
        ))
    }

    /// 获取已打开的数据库句柄，未打开时先打开
    async fn db(&self) -> Result<Db> {
        if let Some(db) = self.db.read().await.as_ref() {
            return Ok(db.clone());
        }

        let mut guard = self.db.write().await;
        if let Some(db) = guard.as_ref() {
            return Ok(db.clone());
        }

        let db = self.open_db().await?;
        let meta = open_tree(&db, META_TREE)?;
        if meta.get(VERSION_KEY)?.is_none() {
            meta.insert(VERSION_KEY, &1u32.to_be_bytes()[..])?;
            meta.flush_async().await?;
            info!("✅ 本地数据库已创建: {} (version=1)", self.path.display());
        } else {
            info!("✅ 本地数据库已打开: {}", self.path.display());
        }

        *guard = Some(db.clone());
        Ok(db)
    }

    fn read_version(meta: &Tree) -> Result<u32> {
        match meta.get(VERSION_KEY)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_ref().try_into().map_err(|_| {
                    OfflineSyncError::Storage("数据库版本号格式错误".to_string())
                })?;
                Ok(u32::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn table_marker(table: Table) -> String {
        format!("{}{}", TABLE_KEY_PREFIX, table.name())
    }

    /// 获取表对应的 Tree；表尚未创建时走升级路径后继续
    async fn table(&self, table: Table) -> Result<Tree> {
        let db = self.db().await?;
        let meta = open_tree(&db, META_TREE)?;
        if !meta.contains_key(Self::table_marker(table))? {
            debug!("表 {} 不存在，按需升级数据库", table);
            self.ensure_tables(&[table]).await?;
        }
        open_tree(&db, table.name())
    }
}

fn open_tree(db: &Db, name: &str) -> Result<Tree> {
    db.open_tree(name)
        .map_err(|e| OfflineSyncError::Storage(format!("打开 Tree {} 失败: {}", name, e)))
}

fn encode(record: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(record)
        .map_err(|e| OfflineSyncError::Serialization(format!("序列化记录失败: {}", e)))
}

fn decode(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| OfflineSyncError::Serialization(format!("反序列化记录失败: {}", e)))
}

#[async_trait]
impl StorageAdapter for KvStore {
    async fn open(&self) -> Result<()> {
        self.db().await.map(|_| ())
    }

    async fn ensure_tables(&self, tables: &[Table]) -> Result<u32> {
        let db = self.db().await?;
        let _upgrade = self.upgrade_lock.lock().await;
        let meta = open_tree(&db, META_TREE)?;

        let mut missing = Vec::new();
        for table in tables.iter().copied() {
            if !meta.contains_key(Self::table_marker(table))? {
                missing.push(table);
            }
        }

        let current = Self::read_version(&meta)?;
        if missing.is_empty() {
            return Ok(current);
        }

        let next = current + 1;
        for table in &missing {
            open_tree(&db, table.name())?;
            meta.insert(Self::table_marker(*table), &[1u8][..])?;
        }
        meta.insert(VERSION_KEY, &next.to_be_bytes()[..])?;
        meta.flush_async().await?;

        info!(
            "🔄 数据库版本升级 {} -> {}，新建表: {:?}",
            current,
            next,
            missing.iter().map(|t| t.name()).collect::<Vec<_>>()
        );
        Ok(next)
    }

    async fn version(&self) -> Result<u32> {
        let db = self.db().await?;
        let meta = open_tree(&db, META_TREE)?;
        Self::read_version(&meta)
    }

    async fn add(&self, table: Table, mut record: Value) -> Result<u64> {
        if !table.auto_increment() {
            return Err(OfflineSyncError::InvalidArgument(format!(
                "{} 表使用显式主键，请使用 put",
                table
            )));
        }

        let tree = self.table(table).await?;
        let db = self.db().await?;
        // generate_id 跨重启单调递增，+1 让主键从 1 开始
        let id = db.generate_id()? + 1;
        stamp_id(&mut record, id)?;

        tree.insert(RecordKey::Id(id).to_bytes(), encode(&record)?)?;
        tree.flush_async().await?;

        debug!("{} 新增记录 id={}", table, id);
        Ok(id)
    }

    async fn put(&self, table: Table, key: &RecordKey, record: Value) -> Result<()> {
        let tree = self.table(table).await?;
        tree.insert(key.to_bytes(), encode(&record)?)?;
        tree.flush_async().await?;
        Ok(())
    }

    async fn get(&self, table: Table, key: &RecordKey) -> Result<Option<Value>> {
        let tree = self.table(table).await?;
        match tree.get(key.to_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self, table: Table) -> Result<Vec<(RecordKey, Value)>> {
        let tree = self.table(table).await?;
        let mut rows = Vec::with_capacity(tree.len());

        for item in tree.iter() {
            let (key, bytes) = item?;
            match decode(&bytes) {
                Ok(value) => rows.push((RecordKey::from_bytes(table, &key)?, value)),
                Err(e) => warn!("⚠️ 跳过无法解析的 {} 记录: {}", table, e),
            }
        }

        Ok(rows)
    }

    async fn delete(&self, table: Table, key: &RecordKey) -> Result<bool> {
        let tree = self.table(table).await?;
        let removed = tree.remove(key.to_bytes())?;
        tree.flush_async().await?;
        Ok(removed.is_some())
    }

    async fn count(&self, table: Table) -> Result<usize> {
        let tree = self.table(table).await?;
        Ok(tree.len())
    }
}
