//! HTTP 客户端模块 - 网络请求抽象
//!
//! 网关和同步队列只依赖 [`HttpTransport`]：一次请求由 方法 + URL + 可选 JSON 请求体 描述。
//! 默认实现 [`ReqwestTransport`] 使用 reqwest 作为底层 HTTP 客户端。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{OfflineSyncError, Result};
use crate::sdk::HttpClientConfig;
use crate::storage::HttpMethod;

/// 一次网络操作
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            url: url.into(),
            body,
        }
    }
}

/// 网络响应（已解析的响应体）
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// 唯一的成功判定：2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 非 2xx 转为网络错误
    pub fn into_result(self) -> Result<Value> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(OfflineSyncError::network(
                Some(self.status),
                error_message(self.status, &self.body),
            ))
        }
    }
}

fn error_message(status: u16, body: &Value) -> String {
    let detail = body
        .get("message")
        .or_else(|| body.get("error"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| body.as_str().map(str::to_string));

    match detail {
        Some(detail) if !detail.is_empty() => format!("HTTP {}: {}", status, detail),
        _ => format!("HTTP {}", status),
    }
}

/// 网络传输层（可注入，用于测试）
#[async_trait]
pub trait HttpTransport: std::fmt::Debug + Send + Sync {
    /// 发送请求；只有传输层失败（连接不上、超时等）才返回错误，
    /// 非 2xx 状态码作为正常响应返回，由调用方判定
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// 基于 reqwest 的默认传输层
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Option<Url>,
}

impl ReqwestTransport {
    pub fn new(config: &HttpClientConfig, base_url: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| OfflineSyncError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        let base_url = base_url
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| OfflineSyncError::Config(format!("无效的 base_url {}: {}", raw, e)))
            })
            .transpose()?;

        info!("✅ HTTP 客户端已创建 (base_url: {:?})", base_url.as_ref().map(|u| u.as_str()));

        Ok(Self { client, base_url })
    }

    /// 相对 URL 基于 base_url 解析；绝对 URL 原样使用
    pub fn resolve(&self, url: &str) -> Result<Url> {
        if let Ok(absolute) = Url::parse(url) {
            return Ok(absolute);
        }
        match &self.base_url {
            Some(base) => base
                .join(url)
                .map_err(|e| OfflineSyncError::InvalidArgument(format!("无法解析 URL {}: {}", url, e))),
            None => Err(OfflineSyncError::InvalidArgument(format!(
                "相对 URL 需要配置 base_url: {}",
                url
            ))),
        }
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Patch => Method::PATCH,
    }
}

/// 响应体解析：空 → Null，非 JSON → 字符串
pub(crate) fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = self.resolve(&request.url)?;
        debug!("🌐 {} {}", request.method, url);

        let mut builder = self.client.request(to_reqwest_method(request.method), url);
        if request.method.is_mutating() {
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
        }

        let response = builder.send().await.map_err(|e| {
            warn!("❌ 请求失败 {} {}: {}", request.method, request.url, e);
            let message = if e.is_timeout() {
                format!("request timeout: {}", e)
            } else if e.is_connect() {
                format!("connection unavailable: {}", e)
            } else {
                e.to_string()
            };
            OfflineSyncError::network(None, message)
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| OfflineSyncError::network(Some(status), format!("读取响应失败: {}", e)))?;

        Ok(HttpResponse::new(status, parse_body(&text)))
    }
}
