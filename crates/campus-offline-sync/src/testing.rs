//! 测试辅助：可编排响应的传输层

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{OfflineSyncError, Result};
use crate::http_client::{HttpRequest, HttpResponse, HttpTransport};

#[derive(Debug, Clone)]
pub enum MockReply {
    Status(u16, Value),
    TransportError(String),
    /// 发送时 panic
    Panic,
}

/// 按顺序返回预设响应；预设用完后返回 `fallback`（默认 200 `{}`）
#[derive(Debug)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: MockReply::Status(200, json!({})),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// 每次都返回同一状态码
    pub fn always(status: u16, body: Value) -> Self {
        Self {
            fallback: MockReply::Status(status, body),
            ..Self::new()
        }
    }

    /// 每次都返回传输层错误
    pub fn unreachable() -> Self {
        Self {
            fallback: MockReply::TransportError("connection unavailable: refused".to_string()),
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_status(&self, status: u16, body: Value) {
        self.replies.lock().unwrap().push_back(MockReply::Status(status, body));
    }

    pub fn push_error(&self, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(MockReply::TransportError(message.to_string()));
    }

    pub fn push_panic(&self) {
        self.replies.lock().unwrap().push_back(MockReply::Panic);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            MockReply::Status(status, body) => Ok(HttpResponse::new(status, body)),
            MockReply::TransportError(message) => Err(OfflineSyncError::network(None, message)),
            MockReply::Panic => panic!("transport panicked on {} {}", request.method, request.url),
        }
    }
}
