//! Executes `HttpRequest` values against the network.

use tracing::debug;

use crate::error::StoreError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Performs one HTTP exchange.
///
/// Implementations return non-2xx responses as data: status interpretation
/// belongs to `PostgrestClient`. Only failures that produce no response at all
/// are errors.
pub trait Transport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, StoreError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, StoreError> {
        (**self).execute(request)
    }
}

/// Blocking transport backed by `ureq`.
///
/// No retry and no explicit timeout: the host's network deadline applies.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, StoreError> {
        debug!(method = request.method.as_str(), path = %request.path, "postgrest request");

        let body = request.body.unwrap_or_default();
        let result = match request.method {
            HttpMethod::Get => {
                let mut builder = self.agent.get(&request.path);
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.call()
            }
            HttpMethod::Post => {
                let mut builder = self.agent.post(&request.path);
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.send(body.as_bytes())
            }
            HttpMethod::Patch => {
                let mut builder = self.agent.patch(&request.path);
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.send(body.as_bytes())
            }
        };
        let mut response = result.map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        debug!(status, "postgrest response");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
