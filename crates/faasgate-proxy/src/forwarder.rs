//! The forwarding proxy: copy a request upstream, stream the response
//! back, stamp tracing headers, and fan events out to notifiers.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue};
use http_body_util::Full;
use hyper::body::Incoming;

use faasgate_core::{BasicAuthCredentials, FunctionTarget};

use crate::client::{UpstreamClient, UpstreamError};
use crate::notifier::{fan_out, HttpNotifier, NotifierPhase, RequestEvent};
use crate::resolver::{BaseUrlResolver, PathTransformer};

/// Call tracing header (`X-Call-Id`), trusted inbound and always
/// present outbound.
pub const CALL_ID_HEADER: &str = "x-call-id";
/// Unix-nanosecond timestamp (`X-Start-Time`) of when the gateway began
/// the forward.
pub const START_TIME_HEADER: &str = "x-start-time";
/// Wall-clock seconds (`X-Duration-Seconds`) the forward took.
pub const DURATION_HEADER: &str = "x-duration-seconds";

/// Headers that describe the connection rather than the request; they
/// must not travel through a proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Base reverse-proxy handler: URL resolution, header hygiene, bounded
/// upstream call, notifier fan-out.
pub struct ForwardingProxy {
    client: Arc<UpstreamClient>,
    resolver: Arc<dyn BaseUrlResolver>,
    transformer: Arc<dyn PathTransformer>,
    auth: Option<BasicAuthCredentials>,
    notifiers: Vec<Arc<dyn HttpNotifier>>,
}

impl ForwardingProxy {
    pub fn new(
        client: Arc<UpstreamClient>,
        resolver: Arc<dyn BaseUrlResolver>,
        transformer: Arc<dyn PathTransformer>,
        auth: Option<BasicAuthCredentials>,
        notifiers: Vec<Arc<dyn HttpNotifier>>,
    ) -> Self {
        Self {
            client,
            resolver,
            transformer,
            auth,
            notifiers,
        }
    }

    /// Forward a buffered request upstream and stream the response back.
    ///
    /// Notifiers observe the start and the completion regardless of the
    /// outcome; error outcomes become 502/504 responses here so callers
    /// never see a transport error.
    pub async fn forward(
        &self,
        function: Option<&FunctionTarget>,
        call_id: &str,
        parts: &Parts,
        body: Bytes,
    ) -> Response {
        let started = Instant::now();
        let start_unix_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        self.emit(NotifierPhase::Started, function, call_id, parts, 0, Duration::ZERO);

        let mut response = match self.send_upstream(call_id, parts, body).await {
            Ok(upstream) => into_response(upstream),
            Err(UpstreamError::Timeout(limit)) => plain_response(
                http::StatusCode::GATEWAY_TIMEOUT,
                format!("upstream request exceeded {limit:?}"),
            ),
            Err(UpstreamError::Transport(msg)) => plain_response(
                http::StatusCode::BAD_GATEWAY,
                format!("upstream unavailable: {msg}"),
            ),
        };

        let duration = started.elapsed();
        self.emit(
            NotifierPhase::Completed,
            function,
            call_id,
            parts,
            response.status().as_u16(),
            duration,
        );

        let headers = response.headers_mut();
        insert_str(headers, CALL_ID_HEADER, call_id);
        insert_str(headers, START_TIME_HEADER, &start_unix_ns.to_string());
        insert_str(
            headers,
            DURATION_HEADER,
            &format!("{:.6}", duration.as_secs_f64()),
        );

        response
    }

    async fn send_upstream(
        &self,
        call_id: &str,
        parts: &Parts,
        body: Bytes,
    ) -> Result<http::Response<Incoming>, UpstreamError> {
        let base = self.resolver.resolve(parts);
        let path = self.transformer.transform(parts.uri.path());
        let url = match parts.uri.query() {
            Some(query) => format!("{base}{path}?{query}"),
            None => format!("{base}{path}"),
        };

        let mut builder = http::Request::builder()
            .method(parts.method.clone())
            .uri(&url);

        for (name, value) in &parts.headers {
            if is_managed_header(name) {
                continue;
            }
            builder = builder.header(name, value);
        }
        if let Some(host) = parts.headers.get(http::header::HOST) {
            builder = builder.header("X-Forwarded-Host", host);
        }
        builder = builder.header(CALL_ID_HEADER, call_id);
        if let Some(creds) = &self.auth {
            builder = builder.header(http::header::AUTHORIZATION, creds.header_value());
        }

        let req = builder
            .body(Full::new(body))
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        self.client.send(req).await
    }

    fn emit(
        &self,
        phase: NotifierPhase,
        function: Option<&FunctionTarget>,
        call_id: &str,
        parts: &Parts,
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
        fan_out(&self.notifiers, &event);
    }
}

/// Headers the proxy owns or that must not cross it.
fn is_managed_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.eq_ignore_ascii_case("host")
        || name.eq_ignore_ascii_case(CALL_ID_HEADER)
        || HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn into_response(upstream: http::Response<Incoming>) -> Response {
    let (parts, body) = upstream.into_parts();
    let mut response = Response::new(Body::new(body));
    *response.status_mut() = parts.status;
    for (name, value) in &parts.headers {
        if HOP_BY_HOP.iter().any(|h| name.as_str().eq_ignore_ascii_case(h)) {
            continue;
        }
        response.headers_mut().append(name, value.clone());
    }
    response
}

fn plain_response(status: http::StatusCode, message: String) -> Response {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

fn insert_str(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::LoggingNotifier;
    use crate::resolver::{SingleHostResolver, TransparentPathTransformer};
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn proxy_to(base_url: &str, notifiers: Vec<Arc<dyn HttpNotifier>>) -> ForwardingProxy {
        ForwardingProxy::new(
            Arc::new(UpstreamClient::new(Duration::from_secs(1), 4)),
            Arc::new(SingleHostResolver::new(base_url)),
            Arc::new(TransparentPathTransformer),
            None,
            notifiers,
        )
    }

    fn parts(method: http::Method, uri: &str) -> Parts {
        let (parts, _) = http::Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Test", "1")
            .header("Connection", "keep-alive")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[tokio::test]
    async fn round_trips_body_and_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/function/echo")
            .match_body("hi")
            .match_header("x-test", "1")
            .match_header("x-call-id", "cid-1")
            .with_status(201)
            .with_body("echoed")
            .create_async()
            .await;

        let proxy = proxy_to(&server.url(), vec![Arc::new(LoggingNotifier)]);
        let response = proxy
            .forward(
                None,
                "cid-1",
                &parts(http::Method::POST, "/function/echo"),
                Bytes::from("hi"),
            )
            .await;

        mock.assert_async().await;
        assert_eq!(response.status(), 201);
        assert!(response.headers().contains_key(DURATION_HEADER));
        assert!(response.headers().contains_key(START_TIME_HEADER));
        assert_eq!(
            response.headers().get(CALL_ID_HEADER).unwrap(),
            "cid-1"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"echoed");
    }

    #[tokio::test]
    async fn hop_by_hop_headers_do_not_cross() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/function/echo")
            .match_header("connection", mockito::Matcher::Missing)
            .with_status(200)
            .create_async()
            .await;

        let proxy = proxy_to(&server.url(), Vec::new());
        let response = proxy
            .forward(
                None,
                "cid-2",
                &parts(http::Method::GET, "/function/echo"),
                Bytes::new(),
            )
            .await;

        mock.assert_async().await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn query_string_is_preserved() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/function/echo")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .create_async()
            .await;

        let proxy = proxy_to(&server.url(), Vec::new());
        proxy
            .forward(
                None,
                "cid-3",
                &parts(http::Method::GET, "/function/echo?page=2"),
                Bytes::new(),
            )
            .await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_upstream_yields_502() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let proxy = proxy_to(&format!("http://{addr}"), Vec::new());
        let response = proxy
            .forward(
                None,
                "cid-4",
                &parts(http::Method::GET, "/function/echo"),
                Bytes::new(),
            )
            .await;

        assert_eq!(response.status(), http::StatusCode::BAD_GATEWAY);
    }

    struct RecordingNotifier {
        events: Mutex<Vec<(NotifierPhase, u16)>>,
        count: AtomicU32,
    }

    impl HttpNotifier for RecordingNotifier {
        fn notify(&self, event: &RequestEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.events
                .lock()
                .unwrap()
                .push((event.phase, event.status));
        }
    }

    #[tokio::test]
    async fn notifiers_observe_failures_too() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let recorder = Arc::new(RecordingNotifier {
            events: Mutex::new(Vec::new()),
            count: AtomicU32::new(0),
        });
        let proxy = proxy_to(&format!("http://{addr}"), vec![recorder.clone()]);
        proxy
            .forward(
                None,
                "cid-5",
                &parts(http::Method::GET, "/function/echo"),
                Bytes::new(),
            )
            .await;

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], (NotifierPhase::Started, 0));
        assert_eq!(events[1].0, NotifierPhase::Completed);
        assert_eq!(events[1].1, 502);
    }
}
