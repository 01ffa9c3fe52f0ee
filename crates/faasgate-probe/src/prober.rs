//! Readiness probing with TTL-cached outcomes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::Full;
use tracing::debug;

use faasgate_core::FunctionTarget;
use faasgate_proxy::{BaseUrlResolver, PathTransformer, UpstreamClient};
use faasgate_scaling::CachedQuery;

/// Annotation opting a function into HTTP readiness checks.
const READY_HTTP_ANNOTATION: &str = "com.openfaas.ready.http";
/// Annotation overriding the readiness path (default `/_/ready`).
const READY_PATH_ANNOTATION: &str = "com.openfaas.ready.http.path";
const DEFAULT_READY_PATH: &str = "/_/ready";

/// TTL cache of probe outcomes. Both `ready` and `not ready` results
/// are cached so a failing function is not probed on every invocation.
pub struct ProbeCache {
    entries: RwLock<HashMap<String, (bool, Instant)>>,
    ttl: Duration,
}

impl ProbeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// The cached outcome, if one exists and has not expired.
    pub fn get(&self, target: &FunctionTarget) -> Option<bool> {
        let entries = self.entries.read().expect("probe cache lock");
        entries.get(&target.key()).and_then(|(ready, at)| {
            (at.elapsed() < self.ttl).then_some(*ready)
        })
    }

    pub fn set(&self, target: &FunctionTarget, ready: bool) {
        let mut entries = self.entries.write().expect("probe cache lock");
        entries.insert(target.key(), (ready, Instant::now()));
    }
}

/// Confirms an upstream function instance will actually accept traffic.
///
/// Runs after the scaler, so at least one replica is declared running;
/// the probe verifies the instance answers HTTP before the forward.
pub struct FunctionProber {
    cache: ProbeCache,
    query: CachedQuery,
    resolver: Arc<dyn BaseUrlResolver>,
    transformer: Arc<dyn PathTransformer>,
    client: Arc<UpstreamClient>,
}

impl FunctionProber {
    pub fn new(
        cache: ProbeCache,
        query: CachedQuery,
        resolver: Arc<dyn BaseUrlResolver>,
        transformer: Arc<dyn PathTransformer>,
        client: Arc<UpstreamClient>,
    ) -> Self {
        Self {
            cache,
            query,
            resolver,
            transformer,
            client,
        }
    }

    /// Whether the function currently accepts traffic.
    pub async fn probe(&self, target: &FunctionTarget) -> bool {
        if let Some(ready) = self.cache.get(target) {
            return ready;
        }

        let ready = self.check(target).await;
        self.cache.set(target, ready);
        ready
    }

    async fn check(&self, target: &FunctionTarget) -> bool {
        // A function may declare an HTTP readiness endpoint through
        // annotations; without one, a HEAD to the root must answer.
        let annotations = match self.query.status(target).await {
            Ok(status) => status.annotations,
            Err(err) => {
                debug!(function = %target, error = %err, "probe metadata lookup failed");
                HashMap::new()
            }
        };

        let declares_ready_http = annotations
            .get(READY_HTTP_ANNOTATION)
            .is_some_and(|v| v == "true");
        let (method, probe_path) = if declares_ready_http {
            let path = annotations
                .get(READY_PATH_ANNOTATION)
                .map(String::as_str)
                .unwrap_or(DEFAULT_READY_PATH);
            (http::Method::GET, path)
        } else {
            (http::Method::HEAD, "/")
        };

        let Some(url) = self.probe_url(target, probe_path) else {
            return false;
        };

        let request = http::Request::builder()
            .method(method)
            .uri(&url)
            .body(Full::new(Bytes::new()));
        let request = match request {
            Ok(req) => req,
            Err(_) => return false,
        };

        match self.client.send(request).await {
            Ok(resp) => {
                let code = resp.status().as_u16();
                let ready = (200..400).contains(&code);
                debug!(function = %target, %url, code, ready, "probed function");
                ready
            }
            Err(err) => {
                debug!(function = %target, %url, error = %err, "probe failed");
                false
            }
        }
    }

    /// Build the probe URL through the same resolution the proxy uses,
    /// so provider mode goes via the provider and direct mode hits the
    /// function host.
    fn probe_url(&self, target: &FunctionTarget, probe_path: &str) -> Option<String> {
        let path = format!("/function/{target}{probe_path}");
        let parts = http::Request::builder()
            .uri(&path)
            .body(())
            .ok()?
            .into_parts()
            .0;
        let base = self.resolver.resolve(&parts);
        Some(format!("{base}{}", self.transformer.transform(&path)))
    }
}
