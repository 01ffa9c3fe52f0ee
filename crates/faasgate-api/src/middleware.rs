//! Cross-cutting request middleware: the response write deadline and
//! the external authentication decoration.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use http_body_util::Full;
use tracing::{debug, warn};

use faasgate_proxy::UpstreamClient;

/// Budget for producing the full response to the client. Exceeding it
/// turns into a 504 rather than a silently truncated body.
#[derive(Clone, Copy)]
pub struct WriteDeadline(pub Duration);

pub async fn write_deadline(
    State(WriteDeadline(deadline)): State<WriteDeadline>,
    request: Request,
    next: Next,
) -> Response {
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(?deadline, "response deadline exceeded");
            plain(
                http::StatusCode::GATEWAY_TIMEOUT,
                "response deadline exceeded",
            )
        }
    }
}

/// Delegated authentication: replay the request line and headers
/// (optionally the body) against an auth proxy; anything but 2xx is a
/// 401 to the caller.
pub struct ExternalAuth {
    pub client: Arc<UpstreamClient>,
    pub url: String,
    pub pass_body: bool,
}

pub async fn external_auth(
    State(auth): State<Arc<ExternalAuth>>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return plain(http::StatusCode::BAD_REQUEST, "failed to read request body"),
    };

    let probe_body = if auth.pass_body {
        bytes.clone()
    } else {
        Bytes::new()
    };
    if !authorized(&auth, &parts, probe_body).await {
        return plain(http::StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    next.run(request).await
}

async fn authorized(auth: &ExternalAuth, parts: &http::request::Parts, body: Bytes) -> bool {
    let mut builder = http::Request::builder()
        .method(parts.method.clone())
        .uri(&auth.url);
    for (name, value) in &parts.headers {
        if name == &http::header::HOST {
            continue;
        }
        builder = builder.header(name, value);
    }

    let request = match builder.body(Full::new(body)) {
        Ok(request) => request,
        Err(_) => return false,
    };

    match auth.client.send(request).await {
        Ok(response) => response.status().is_success(),
        Err(err) => {
            debug!(error = %err, "auth proxy unreachable");
            false
        }
    }
}

fn plain(status: http::StatusCode, message: &'static str) -> Response {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}
