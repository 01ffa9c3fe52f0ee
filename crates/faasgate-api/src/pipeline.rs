//! The invocation pipeline.
//!
//! A request to `/function/{name}` passes through an ordered list of
//! stages, assembled once at startup and immutable thereafter:
//!
//! ```text
//! CallId → [Scale →] [Probe →] Forward
//! ```
//!
//! Each stage either short-circuits with a response or hands the
//! invocation to the next stage. Scaling strictly precedes probing:
//! a probe against a function with zero replicas would only ever fail.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http::HeaderValue;
use tracing::error;
use uuid::Uuid;

use faasgate_core::FunctionTarget;
use faasgate_probe::FunctionProber;
use faasgate_proxy::forwarder::CALL_ID_HEADER;
use faasgate_proxy::ForwardingProxy;
use faasgate_scaling::{FunctionScaler, ScaleError};

/// A buffered invocation travelling through the pipeline.
pub struct Invocation {
    pub target: FunctionTarget,
    /// Empty until the call-ID stage runs.
    pub call_id: String,
    pub parts: http::request::Parts,
    pub body: Bytes,
}

/// One pipeline stage: `(invocation, next) → response`.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn handle(&self, invocation: Invocation, next: Next<'_>) -> Response;
}

/// The remainder of the pipeline after the current stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
}

impl Next<'_> {
    pub async fn run(self, invocation: Invocation) -> Response {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(invocation, Next { stages: rest }).await,
            None => {
                error!("invocation pipeline ran out of stages before a terminal");
                plain(http::StatusCode::INTERNAL_SERVER_ERROR, "no handler".into())
            }
        }
    }
}

/// The assembled, immutable stage list.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub async fn run(&self, invocation: Invocation) -> Response {
        Next {
            stages: &self.stages,
        }
        .run(invocation)
        .await
    }
}

/// The call ID from the request headers, or a fresh one.
pub fn ensure_call_id(headers: &http::HeaderMap) -> String {
    headers
        .get(CALL_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Trusts an inbound `X-Call-Id` or mints one, stamps it on the
/// outgoing upstream request, and guarantees it on the response even
/// when a later stage short-circuits.
pub struct CallIdStage;

#[async_trait]
impl Stage for CallIdStage {
    async fn handle(&self, mut invocation: Invocation, next: Next<'_>) -> Response {
        let call_id = ensure_call_id(&invocation.parts.headers);
        invocation.call_id = call_id.clone();
        if let Ok(value) = HeaderValue::from_str(&call_id) {
            invocation.parts.headers.insert(CALL_ID_HEADER, value);
        }

        let mut response = next.run(invocation).await;

        if !response.headers().contains_key(CALL_ID_HEADER) {
            if let Ok(value) = HeaderValue::from_str(&call_id) {
                response.headers_mut().insert(CALL_ID_HEADER, value);
            }
        }
        response
    }
}

/// Blocks the invocation until the function has an available replica.
pub struct ScaleStage {
    scaler: Arc<FunctionScaler>,
}

impl ScaleStage {
    pub fn new(scaler: Arc<FunctionScaler>) -> Self {
        Self { scaler }
    }
}

#[async_trait]
impl Stage for ScaleStage {
    async fn handle(&self, invocation: Invocation, next: Next<'_>) -> Response {
        match self.scaler.scale(&invocation.target).await {
            Ok(()) => next.run(invocation).await,
            Err(ScaleError::NotFound) => plain(
                http::StatusCode::NOT_FOUND,
                format!("function {} not found", invocation.target),
            ),
            Err(err @ ScaleError::Timeout(_)) => plain(
                http::StatusCode::BAD_GATEWAY,
                format!("unable to scale function {}: {err}", invocation.target),
            ),
            Err(ScaleError::Unavailable(msg)) => plain(
                http::StatusCode::BAD_GATEWAY,
                format!("unable to scale function {}: {msg}", invocation.target),
            ),
        }
    }
}

/// Verifies the function instance answers HTTP before the forward.
pub struct ProbeStage {
    prober: Arc<FunctionProber>,
}

impl ProbeStage {
    pub fn new(prober: Arc<FunctionProber>) -> Self {
        Self { prober }
    }
}

#[async_trait]
impl Stage for ProbeStage {
    async fn handle(&self, invocation: Invocation, next: Next<'_>) -> Response {
        if self.prober.probe(&invocation.target).await {
            next.run(invocation).await
        } else {
            plain(
                http::StatusCode::BAD_GATEWAY,
                format!("function {} is not ready to accept traffic", invocation.target),
            )
        }
    }
}

/// Terminal stage: hand the invocation to the forwarding proxy.
pub struct ForwardStage {
    proxy: Arc<ForwardingProxy>,
}

impl ForwardStage {
    pub fn new(proxy: Arc<ForwardingProxy>) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl Stage for ForwardStage {
    async fn handle(&self, invocation: Invocation, _next: Next<'_>) -> Response {
        self.proxy
            .forward(
                Some(&invocation.target),
                &invocation.call_id,
                &invocation.parts,
                invocation.body,
            )
            .await
    }
}

fn plain(status: http::StatusCode, message: String) -> Response {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn invocation() -> Invocation {
        let (parts, _) = http::Request::builder()
            .method(http::Method::POST)
            .uri("/function/echo")
            .body(())
            .unwrap()
            .into_parts();
        Invocation {
            target: FunctionTarget::parse("echo", "fn").unwrap(),
            call_id: String::new(),
            parts,
            body: Bytes::from("hi"),
        }
    }

    fn invocation_with_call_id(call_id: &str) -> Invocation {
        let mut inv = invocation();
        inv.parts
            .headers
            .insert(CALL_ID_HEADER, HeaderValue::from_str(call_id).unwrap());
        inv
    }

    struct RecordingStage {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Stage for RecordingStage {
        async fn handle(&self, invocation: Invocation, next: Next<'_>) -> Response {
            self.log.lock().unwrap().push(self.name);
            next.run(invocation).await
        }
    }

    struct TerminalStage {
        reached: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Stage for TerminalStage {
        async fn handle(&self, invocation: Invocation, _next: Next<'_>) -> Response {
            self.reached.store(true, Ordering::SeqCst);
            let mut response = Response::new(Body::from(invocation.call_id.clone()));
            *response.status_mut() = http::StatusCode::OK;
            response
        }
    }

    struct RejectingStage;

    #[async_trait]
    impl Stage for RejectingStage {
        async fn handle(&self, _invocation: Invocation, _next: Next<'_>) -> Response {
            plain(http::StatusCode::NOT_FOUND, "nope".into())
        }
    }

    #[tokio::test]
    async fn stages_run_in_declared_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reached = Arc::new(AtomicBool::new(false));

        let pipeline = Pipeline::new(vec![
            Arc::new(RecordingStage {
                name: "scale",
                log: log.clone(),
            }),
            Arc::new(RecordingStage {
                name: "probe",
                log: log.clone(),
            }),
            Arc::new(TerminalStage {
                reached: reached.clone(),
            }),
        ]);

        let response = pipeline.run(invocation()).await;
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(*log.lock().unwrap(), vec!["scale", "probe"]);
        assert!(reached.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn short_circuit_skips_later_stages() {
        let reached = Arc::new(AtomicBool::new(false));
        let pipeline = Pipeline::new(vec![
            Arc::new(RejectingStage),
            Arc::new(TerminalStage {
                reached: reached.clone(),
            }),
        ]);

        let response = pipeline.run(invocation()).await;
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
        assert!(!reached.load(Ordering::SeqCst), "terminal must not run");
    }

    #[tokio::test]
    async fn call_id_stage_trusts_the_client() {
        let pipeline = Pipeline::new(vec![
            Arc::new(CallIdStage),
            Arc::new(TerminalStage {
                reached: Arc::new(AtomicBool::new(false)),
            }),
        ]);

        let response = pipeline.run(invocation_with_call_id("client-id-1")).await;
        assert_eq!(
            response.headers().get(CALL_ID_HEADER).unwrap(),
            "client-id-1"
        );
    }

    #[tokio::test]
    async fn call_id_stage_mints_when_absent() {
        let pipeline = Pipeline::new(vec![
            Arc::new(CallIdStage),
            Arc::new(TerminalStage {
                reached: Arc::new(AtomicBool::new(false)),
            }),
        ]);

        let response = pipeline.run(invocation()).await;
        let header = response
            .headers()
            .get(CALL_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(!header.is_empty());

        // The terminal echoes the invocation's call ID in its body; it
        // must match the response header.
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(body.as_ref(), header.as_bytes());
    }

    #[tokio::test]
    async fn call_id_stage_stamps_short_circuit_responses() {
        let pipeline = Pipeline::new(vec![Arc::new(CallIdStage), Arc::new(RejectingStage)]);

        let response = pipeline.run(invocation_with_call_id("cid-9")).await;
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get(CALL_ID_HEADER).unwrap(), "cid-9");
    }
}
