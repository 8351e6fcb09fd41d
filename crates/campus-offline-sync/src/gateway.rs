//! 请求网关 - 应用访问网络的唯一入口
//!
//! 每次请求在「实时网络 / 本地缓存 / 同步队列」之间选择：
//! - 无法观察网络状态：直接发请求，失败原样返回
//! - 在线：发请求；GET 成功写缓存，GET 失败回退缓存，写操作失败原样返回
//! - 离线：GET 读缓存（无缓存时报错）；写操作入队并返回「已排队」确认

use std::sync::Arc;

use reqwest::Url;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{OfflineSyncError, Result};
use crate::http_client::{HttpRequest, HttpTransport};
use crate::network::NetworkMonitor;
use crate::storage::{CacheManager, HttpMethod, QueueManager};

/// 入队确认中给用户看的提示
pub const QUEUED_MESSAGE: &str =
    "You are offline. Your change has been saved and will sync automatically when the connection is restored.";

/// 请求参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub body: Option<Value>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
        }
    }

    pub fn put(body: Value) -> Self {
        Self {
            method: HttpMethod::Put,
            body: Some(body),
        }
    }

    pub fn patch(body: Value) -> Self {
        Self {
            method: HttpMethod::Patch,
            body: Some(body),
        }
    }

    pub fn delete() -> Self {
        Self {
            method: HttpMethod::Delete,
            body: None,
        }
    }
}

/// 离线写操作的确认：调用方应视为「暂时成功」
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAck {
    pub success: bool,
    pub queued: bool,
    pub operation_id: u64,
    pub message: String,
}

impl QueuedAck {
    pub fn new(operation_id: u64) -> Self {
        Self {
            success: true,
            queued: true,
            operation_id,
            message: QUEUED_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayResponse {
    /// 来自网络
    Live(Value),
    /// 来自本地缓存
    Cached(Value),
    /// 已进入同步队列
    Queued(QueuedAck),
}

impl GatewayResponse {
    pub fn from_cache(&self) -> bool {
        matches!(self, GatewayResponse::Cached(_))
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, GatewayResponse::Queued(_))
    }

    /// 响应数据（入队确认没有数据）
    pub fn data(&self) -> Option<&Value> {
        match self {
            GatewayResponse::Live(data) | GatewayResponse::Cached(data) => Some(data),
            GatewayResponse::Queued(_) => None,
        }
    }

    /// 渲染为带 `fromCache` 标记的 JSON
    pub fn into_json(self) -> Value {
        match self {
            GatewayResponse::Live(data) => with_cache_marker(data, false),
            GatewayResponse::Cached(data) => with_cache_marker(data, true),
            GatewayResponse::Queued(ack) => json!({
                "success": ack.success,
                "queued": ack.queued,
                "operationId": ack.operation_id,
                "message": ack.message,
            }),
        }
    }
}

fn with_cache_marker(data: Value, from_cache: bool) -> Value {
    match data {
        Value::Object(mut map) => {
            map.insert("fromCache".to_string(), Value::Bool(from_cache));
            Value::Object(map)
        }
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map.insert("fromCache".to_string(), Value::Bool(from_cache));
            Value::Object(map)
        }
    }
}

/// 从 URL 路径推导实体类型：倒数第二个路径段，不足两段时为 `unknown`
pub fn derive_entity_type(url: &str) -> String {
    let strip = |raw: &str| raw.split(['?', '#']).next().unwrap_or_default().to_string();
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => strip(url),
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() >= 2 {
        segments[segments.len() - 2].to_string()
    } else {
        "unknown".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct RequestGateway {
    transport: Arc<dyn HttpTransport>,
    cache: CacheManager,
    queue: Arc<QueueManager>,
    /// 为空表示无法观察网络状态
    monitor: Option<Arc<NetworkMonitor>>,
}

impl RequestGateway {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        cache: CacheManager,
        queue: Arc<QueueManager>,
        monitor: Option<Arc<NetworkMonitor>>,
    ) -> Self {
        Self {
            transport,
            cache,
            queue,
            monitor,
        }
    }

    pub async fn request(&self, url: &str, options: RequestOptions) -> Result<GatewayResponse> {
        let Some(monitor) = &self.monitor else {
            return self.send_live(url, &options).await.map(GatewayResponse::Live);
        };

        if monitor.is_online().await {
            self.request_online(url, options).await
        } else {
            self.request_offline(url, options).await
        }
    }

    async fn send_live(&self, url: &str, options: &RequestOptions) -> Result<Value> {
        let body = if options.method.is_mutating() {
            options.body.clone()
        } else {
            None
        };
        let request = HttpRequest::new(options.method, url, body);
        self.transport.send(&request).await?.into_result()
    }

    async fn request_online(&self, url: &str, options: RequestOptions) -> Result<GatewayResponse> {
        match self.send_live(url, &options).await {
            Ok(data) => {
                if !options.method.is_mutating() {
                    if let Err(e) = self.cache.store(url, data.clone()).await {
                        warn!("⚠️ 写入缓存失败 {}: {}", url, e);
                    }
                }
                Ok(GatewayResponse::Live(data))
            }
            Err(e) if !options.method.is_mutating() => match self.cached(url).await {
                Some(data) => {
                    info!("📦 网络请求失败，返回缓存: {} ({})", url, e);
                    Ok(GatewayResponse::Cached(data))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn request_offline(&self, url: &str, options: RequestOptions) -> Result<GatewayResponse> {
        if !options.method.is_mutating() {
            return match self.cached(url).await {
                Some(data) => {
                    debug!("离线读取缓存: {}", url);
                    Ok(GatewayResponse::Cached(data))
                }
                None => Err(OfflineSyncError::NoCachedData {
                    url: url.to_string(),
                }),
            };
        }

        let entity_type = derive_entity_type(url);
        let id = self
            .queue
            .enqueue(url, options.method, options.body, &entity_type)
            .await?;
        Ok(GatewayResponse::Queued(QueuedAck::new(id)))
    }

    /// 读缓存；读取失败按未命中处理
    async fn cached(&self, url: &str) -> Option<Value> {
        match self.cache.fetch(url).await {
            Ok(data) => data,
            Err(e) => {
                warn!("⚠️ 读取缓存失败 {}: {}", url, e);
                None
            }
        }
    }
}
