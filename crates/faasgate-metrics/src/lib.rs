//! faasgate-metrics — observability for the gateway.
//!
//! A [`GatewayMetrics`] value owns the Prometheus registry and every
//! collector; it is constructed once at startup and threaded through as
//! part of the dependency context rather than living in process-global
//! state. Only the scrape endpoint needs process identity, and it gets
//! that by holding the same `Arc`.
//!
//! Two notifier implementations bridge the proxy's lifecycle events
//! into the collectors: one for function invocations, one for the
//! gateway's own service routes.

mod registry;

pub use registry::{GatewayMetrics, PrometheusFunctionNotifier, PrometheusServiceNotifier};
