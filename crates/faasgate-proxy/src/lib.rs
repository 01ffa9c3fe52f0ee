//! faasgate-proxy — the forwarding layer of the gateway.
//!
//! # Components
//!
//! - **`resolver`** — maps a request to its upstream base URL (single
//!   provider host, or `{name}.{namespace}.{suffix}` in direct mode) and
//!   rewrites the path on the way through
//! - **`client`** — bounded-pool upstream HTTP client with a per-call
//!   deadline
//! - **`forwarder`** — copies a request upstream, streams the response
//!   back, stamps tracing headers
//! - **`notifier`** — side-channel consumers of request lifecycle events

pub mod client;
pub mod forwarder;
pub mod notifier;
pub mod resolver;

pub use client::{UpstreamClient, UpstreamError};
pub use forwarder::ForwardingProxy;
pub use notifier::{fan_out, HttpNotifier, LoggingNotifier, NotifierPhase, RequestEvent};
pub use resolver::{
    BaseUrlResolver, FunctionAsHostResolver, PathTransformer, PrefixTrimmingPathTransformer,
    SingleHostResolver, TransparentPathTransformer,
};
