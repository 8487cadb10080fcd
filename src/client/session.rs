use crate::config::{Endpoint, ServerConfig};
use crate::error::{Result, SdError};
use crate::transport::{HttpRequest, HttpResponse, Method, Transport};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

const MAX_ECHOED_BODY: usize = 8 * 1024;

/// Transport plus configuration, shared by the sub-clients of one `SdClient`.
pub(crate) struct Session {
    transport: Arc<dyn Transport>,
    config: RwLock<ServerConfig>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, config: ServerConfig) -> Self {
        Self {
            transport,
            config: RwLock::new(config),
        }
    }

    pub fn config(&self) -> RwLockReadGuard<'_, ServerConfig> {
        match self.config.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn config_mut(&self) -> RwLockWriteGuard<'_, ServerConfig> {
        match self.config.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn build(
        &self,
        method: Method,
        endpoint: Endpoint,
        body: Option<String>,
    ) -> (HttpRequest, Option<Duration>) {
        let config = self.config();
        let request = HttpRequest {
            method,
            url: config.url(endpoint),
            headers: config.headers(),
            body,
        };
        (request, config.timeout)
    }

    /// Sends a request and returns the body of a 2xx response.
    pub async fn call(&self, method: Method, endpoint: Endpoint, body: Option<String>) -> Result<String> {
        let (request, timeout) = self.build(method, endpoint, body);
        let url = request.url.clone();
        let sent_body = request.body.clone();

        log::debug!("{:?} {}", method, url);
        let pending = self.transport.send(request);
        let response: HttpResponse = match timeout {
            Some(limit) => tokio::time::timeout(limit, pending).await.map_err(|_| {
                log::error!("{} did not answer within {:?}", url, limit);
                SdError::Timeout(limit)
            })??,
            None => pending.await?,
        };

        if !response.is_success() {
            log::error!("{} answered HTTP {}: {}", url, response.status, response.body);
            return Err(SdError::BackendUnavailable {
                endpoint: url,
                status: Some(response.status),
                message: summarize(&response.body),
                request_body: sent_body.map(|body| truncate(body, MAX_ECHOED_BODY)),
            });
        }

        Ok(response.body)
    }
}

fn summarize(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        "empty response body".to_string()
    } else {
        truncate(body.to_string(), 512)
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let total = text.len();
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(&format!("... ({} bytes)", total));
    text
}
