//! Pooled upstream HTTP client with a per-call deadline.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

/// Failure modes of an upstream call.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream call exceeded {0:?}")]
    Timeout(Duration),

    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// A hyper client with a bounded idle-connection pool.
///
/// The deadline covers connection setup through response headers; body
/// streaming afterwards is bounded by the server's write budget, not by
/// this client.
pub struct UpstreamClient {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeout: Duration, max_idle_per_host: usize) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .build_http();
        Self { client, timeout }
    }

    /// Issue the request, bounding the wait for response headers.
    pub async fn send(
        &self,
        req: http::Request<Full<Bytes>>,
    ) -> Result<http::Response<Incoming>, UpstreamError> {
        tokio::time::timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))?
            .map_err(|e| UpstreamError::Transport(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
