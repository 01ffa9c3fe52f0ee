//! Route handlers outside the invocation pipeline: system forwards,
//! the async enqueue path, the log stream proxy, liveness, and the UI.

use std::collections::HashMap;
use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::HeaderValue;
use tracing::error;

use faasgate_core::FunctionTarget;
use faasgate_proxy::forwarder::CALL_ID_HEADER;
use faasgate_proxy::{fan_out, NotifierPhase, RequestEvent};
use faasgate_queue::QueuedInvocation;
use faasgate_scaling::QueryError;

use crate::pipeline::{ensure_call_id, Invocation};
use crate::GatewayContext;

/// Header naming where a queue worker should POST the async result.
const CALLBACK_URL_HEADER: &str = "x-callback-url";
/// Origin the UI is allowed to fetch the function store from.
const ALLOWED_CORS_ORIGIN: &str = "https://raw.githubusercontent.com";

/// `/function/{name}[/...]` — run the invocation pipeline.
pub async fn invoke_function(
    State(ctx): State<Arc<GatewayContext>>,
    request: Request,
) -> Response {
    let path = request.uri().path().to_string();
    let Some(raw_name) = segment_after(&path, "/function/") else {
        return plain(http::StatusCode::BAD_REQUEST, "missing function name".into());
    };
    let Some(target) = FunctionTarget::parse(raw_name, &ctx.config.default_namespace) else {
        return plain(
            http::StatusCode::BAD_REQUEST,
            format!("invalid function name: {raw_name}"),
        );
    };

    let (parts, body) = request.into_parts();
    let body = match read_body(body, ctx.config.read_timeout).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    ctx.pipeline
        .run(Invocation {
            target,
            call_id: String::new(),
            parts,
            body,
        })
        .await
}

/// `/async-function/{name}[/...]` — validate, enqueue, 202.
pub async fn enqueue_function(
    State(ctx): State<Arc<GatewayContext>>,
    request: Request,
) -> Response {
    let Some(queue) = ctx.queue.clone() else {
        return plain(
            http::StatusCode::NOT_FOUND,
            "async invocations are not enabled".into(),
        );
    };

    let path = request.uri().path().to_string();
    let Some(raw_name) = segment_after(&path, "/async-function/") else {
        return plain(http::StatusCode::BAD_REQUEST, "missing function name".into());
    };
    let Some(target) = FunctionTarget::parse(raw_name, &ctx.config.default_namespace) else {
        return plain(
            http::StatusCode::BAD_REQUEST,
            format!("invalid function name: {raw_name}"),
        );
    };

    // Reject unknown functions before touching the queue.
    match ctx.cached_query.status(&target).await {
        Ok(_) => {}
        Err(QueryError::NotFound) => {
            return plain(
                http::StatusCode::NOT_FOUND,
                format!("function {target} not found"),
            )
        }
        Err(err) => {
            return plain(
                http::StatusCode::BAD_GATEWAY,
                format!("provider unavailable: {err}"),
            )
        }
    }

    let (parts, body) = request.into_parts();
    let body = match read_body(body, ctx.config.read_timeout).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let call_id = ensure_call_id(&parts.headers);
    let started = Instant::now();
    notify(&ctx, &parts, Some(&target), &call_id, NotifierPhase::Started, 0, Duration::ZERO);

    let invocation = QueuedInvocation {
        id: call_id.clone(),
        name: target.name.clone(),
        namespace: target.namespace.clone(),
        path: parts.uri.path().to_string(),
        method: parts.method.to_string(),
        query_string: parts.uri.query().unwrap_or_default().to_string(),
        body: body.to_vec(),
        headers: header_multimap(&parts.headers),
        callback_url: parts
            .headers
            .get(CALLBACK_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let mut response = match queue.enqueue(invocation).await {
        Ok(()) => {
            ctx.metrics.observe_enqueue(&target.to_string());
            plain(http::StatusCode::ACCEPTED, String::new())
        }
        Err(err) => {
            error!(function = %target, error = %err, "async enqueue failed");
            plain(
                http::StatusCode::INTERNAL_SERVER_ERROR,
                "failed to enqueue invocation".into(),
            )
        }
    };

    notify(
        &ctx,
        &parts,
        Some(&target),
        &call_id,
        NotifierPhase::Completed,
        response.status().as_u16(),
        started.elapsed(),
    );

    if let Ok(value) = HeaderValue::from_str(&call_id) {
        response.headers_mut().insert(CALL_ID_HEADER, value);
    }
    response
}

/// `/system/...` pass-throughs to the provider.
pub async fn forward_system(
    State(ctx): State<Arc<GatewayContext>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match read_body(body, ctx.config.read_timeout).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let call_id = ensure_call_id(&parts.headers);
    ctx.system_proxy.forward(None, &call_id, &parts, body).await
}

/// `/system/logs` — forward to the log provider and stream the body.
pub async fn stream_logs(State(ctx): State<Arc<GatewayContext>>, request: Request) -> Response {
    let (parts, _) = request.into_parts();
    let call_id = ensure_call_id(&parts.headers);
    ctx.logs_proxy
        .forward(None, &call_id, &parts, Bytes::new())
        .await
}

/// Gateway liveness.
pub async fn healthz() -> &'static str {
    "OK"
}

/// `/` → the UI, as a 301.
pub async fn root_redirect() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = http::StatusCode::MOVED_PERMANENTLY;
    response
        .headers_mut()
        .insert(http::header::LOCATION, HeaderValue::from_static("/ui/"));
    response
}

/// `/ui/{*path}` — static assets with a restrictive CORS header.
pub async fn serve_ui(State(ctx): State<Arc<GatewayContext>>, request: Request) -> Response {
    let rel = request
        .uri()
        .path()
        .strip_prefix("/ui/")
        .unwrap_or_default();
    let rel = if rel.is_empty() || rel.ends_with('/') {
        format!("{rel}index.html")
    } else {
        rel.to_string()
    };

    let Some(file) = safe_asset_path(&ctx.assets_dir, &rel) else {
        return plain(http::StatusCode::NOT_FOUND, "not found".into());
    };

    match tokio::fs::read(&file).await {
        Ok(contents) => {
            let mut response = Response::new(Body::from(contents));
            response.headers_mut().insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static(content_type_for(&rel)),
            );
            response.headers_mut().insert(
                http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static(ALLOWED_CORS_ORIGIN),
            );
            response
        }
        Err(_) => plain(http::StatusCode::NOT_FOUND, "not found".into()),
    }
}

/// Join a relative asset path onto the asset root, rejecting any form
/// of traversal.
fn safe_asset_path(root: &FsPath, rel: &str) -> Option<PathBuf> {
    let rel = FsPath::new(rel);
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(rel))
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// Buffer a request body within the read budget.
async fn read_body(body: Body, read_timeout: Duration) -> Result<Bytes, Response> {
    match tokio::time::timeout(read_timeout, axum::body::to_bytes(body, usize::MAX)).await {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(_)) => Err(plain(
            http::StatusCode::BAD_REQUEST,
            "failed to read request body".into(),
        )),
        Err(_) => Err(plain(
            http::StatusCode::REQUEST_TIMEOUT,
            "timed out reading request body".into(),
        )),
    }
}

/// The `{name}` segment directly after `prefix`.
fn segment_after<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    let name = rest.split('/').next().unwrap_or(rest);
    (!name.is_empty()).then_some(name)
}

fn header_multimap(headers: &http::HeaderMap) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.entry(name.to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    map
}

fn notify(
    ctx: &GatewayContext,
    parts: &http::request::Parts,
    function: Option<&FunctionTarget>,
    call_id: &str,
    phase: NotifierPhase,
    status: u16,
    duration: Duration,
) {
    let event = RequestEvent {
        phase,
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        function: function.cloned(),
        status,
        call_id: call_id.to_string(),
        duration,
    };
    fan_out(&ctx.service_notifiers, &event);
}

pub(crate) fn plain(status: http::StatusCode, message: String) -> Response {
    (status, message).into_response()
}
