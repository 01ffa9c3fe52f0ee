//! faasgate-api — the gateway's HTTP surface.
//!
//! Builds two axum routers: the public surface on port 8080 (function
//! invocations, system pass-throughs, the alert webhook, the async
//! path, the UI) and the private metrics surface on port 8082.
//!
//! All dependencies live in a [`GatewayContext`] constructed once at
//! startup and threaded through as shared state; there is no
//! process-global registry or router.

pub mod alert;
pub mod handlers;
pub mod middleware;
pub mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{DefaultBodyLimit, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;

use faasgate_core::GatewayConfig;
use faasgate_metrics::GatewayMetrics;
use faasgate_proxy::{ForwardingProxy, HttpNotifier, NotifierPhase, RequestEvent, UpstreamClient};
use faasgate_queue::Queue;
use faasgate_scaling::{CachedQuery, ProviderQuery};

use crate::middleware::{external_auth, write_deadline, ExternalAuth, WriteDeadline};
use crate::pipeline::Pipeline;

/// Everything the handlers need, assembled once at startup.
pub struct GatewayContext {
    pub config: GatewayConfig,
    pub metrics: Arc<GatewayMetrics>,
    /// The invocation pipeline for `/function/...`.
    pub pipeline: Pipeline,
    /// Forwarder for `/system/...` pass-throughs (provider mode, auth
    /// injected).
    pub system_proxy: Arc<ForwardingProxy>,
    /// Forwarder for `/system/logs` (log provider, streaming).
    pub logs_proxy: Arc<ForwardingProxy>,
    /// Async queue; `None` disables the `/async-function` surface.
    pub queue: Option<Arc<dyn Queue>>,
    /// Cached provider view for existence checks.
    pub cached_query: CachedQuery,
    /// Uncached provider access for the alert handler.
    pub provider_query: Arc<dyn ProviderQuery>,
    /// Notifiers fed by the non-proxy handlers (alert, async).
    pub service_notifiers: Vec<Arc<dyn HttpNotifier>>,
    /// Root of the static UI assets.
    pub assets_dir: PathBuf,
}

/// Build the public router (port 8080).
pub fn public_router(ctx: Arc<GatewayContext>) -> Router {
    let mut system = Router::new()
        .route("/system/info", get(handlers::forward_system))
        .route("/system/alert", post(handle_alert))
        .route("/system/function/{name}", get(handlers::forward_system))
        .route(
            "/system/functions",
            get(handlers::forward_system)
                .post(handlers::forward_system)
                .put(handlers::forward_system)
                .delete(handlers::forward_system),
        )
        .route(
            "/system/scale-function/{name}",
            post(handlers::forward_system),
        )
        .route(
            "/system/secrets",
            get(handlers::forward_system)
                .post(handlers::forward_system)
                .put(handlers::forward_system)
                .delete(handlers::forward_system),
        )
        .route("/system/logs", get(handlers::stream_logs))
        .route("/system/namespaces", get(handlers::forward_system));

    if ctx.config.use_external_auth() {
        let auth = Arc::new(ExternalAuth {
            client: Arc::new(UpstreamClient::new(ctx.config.upstream_timeout, 4)),
            url: ctx.config.auth_proxy_url.clone(),
            pass_body: ctx.config.auth_proxy_pass_body,
        });
        system = system.route_layer(axum::middleware::from_fn_with_state(auth, external_auth));
    }

    let mut router = Router::new()
        .route("/function/{name}", any(handlers::invoke_function))
        .route("/function/{name}/", any(handlers::invoke_function))
        .route("/function/{name}/{*rest}", any(handlers::invoke_function))
        .merge(system)
        .route("/healthz", get(handlers::healthz))
        .route("/ui/", get(handlers::serve_ui))
        .route("/ui/{*path}", get(handlers::serve_ui))
        .route("/", get(handlers::root_redirect));

    if ctx.queue.is_some() {
        router = router
            .route("/async-function/{name}", post(handlers::enqueue_function))
            .route("/async-function/{name}/", post(handlers::enqueue_function))
            .route(
                "/async-function/{name}/{*rest}",
                post(handlers::enqueue_function),
            );
    }

    router
        .layer(axum::middleware::from_fn_with_state(
            WriteDeadline(ctx.config.write_timeout),
            write_deadline,
        ))
        .layer(CatchPanicLayer::new())
        .layer(DefaultBodyLimit::disable())
        .with_state(ctx)
}

/// Build the private metrics router (port 8082).
pub fn metrics_router(metrics: Arc<GatewayMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .route("/healthz", get(handlers::healthz))
        .layer(CatchPanicLayer::new())
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<GatewayMetrics>>) -> Response {
    match metrics.render() {
        Ok(body) => (
            [(
                http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(err) => (
            http::StatusCode::INTERNAL_SERVER_ERROR,
            err.to_string(),
        )
            .into_response(),
    }
}

/// POST `/system/alert` — apply AlertManager scaling decisions.
async fn handle_alert(
    State(ctx): State<Arc<GatewayContext>>,
    Json(payload): Json<alert::AlertPayload>,
) -> Response {
    let started = Instant::now();
    emit_alert_event(&ctx, NotifierPhase::Started, 0, Duration::ZERO);

    let errors = alert::apply_alerts(
        ctx.provider_query.as_ref(),
        &ctx.config.default_namespace,
        &payload,
    )
    .await;

    let response = if errors.is_empty() {
        http::StatusCode::OK.into_response()
    } else {
        (
            http::StatusCode::INTERNAL_SERVER_ERROR,
            errors.join("\n"),
        )
            .into_response()
    };

    emit_alert_event(
        &ctx,
        NotifierPhase::Completed,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

fn emit_alert_event(ctx: &GatewayContext, phase: NotifierPhase, status: u16, duration: Duration) {
    let event = RequestEvent {
        phase,
        method: http::Method::POST,
        path: "/system/alert".to_string(),
        function: None,
        status,
        call_id: String::new(),
        duration,
    };
    faasgate_proxy::fan_out(&ctx.service_notifiers, &event);
}
