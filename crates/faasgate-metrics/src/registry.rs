//! The gateway's Prometheus collectors and notifier bridges.

use std::sync::Arc;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use faasgate_proxy::{HttpNotifier, NotifierPhase, RequestEvent};

/// Every collector the gateway exports, bound to one registry.
pub struct GatewayMetrics {
    registry: Registry,
    /// Seconds spent on function invocations, by function and status.
    pub functions_seconds: HistogramVec,
    /// Completed function invocations, by function and status.
    pub invocation_total: IntCounterVec,
    /// Invocations that entered the pipeline, by function.
    pub invocation_started: IntCounterVec,
    /// Completed requests on the gateway's own service routes.
    pub service_requests_total: IntCounterVec,
    /// Seconds spent on the gateway's own service routes.
    pub service_duration_seconds: HistogramVec,
    /// Accepted async invocations, by function.
    pub async_enqueue_total: IntCounterVec,
}

impl GatewayMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let functions_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_functions_seconds",
                "Function invocation duration in seconds.",
            ),
            &["function_name", "code"],
        )?;
        let invocation_total = IntCounterVec::new(
            Opts::new(
                "gateway_function_invocation_total",
                "Completed function invocations.",
            ),
            &["function_name", "code"],
        )?;
        let invocation_started = IntCounterVec::new(
            Opts::new(
                "gateway_function_invocation_started",
                "Function invocations admitted into the pipeline.",
            ),
            &["function_name"],
        )?;
        let service_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Completed gateway service requests."),
            &["method", "path", "code"],
        )?;
        let service_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Gateway service request duration in seconds.",
            ),
            &["method", "path"],
        )?;
        let async_enqueue_total = IntCounterVec::new(
            Opts::new(
                "gateway_async_enqueue_total",
                "Async invocations accepted onto the queue.",
            ),
            &["function_name"],
        )?;

        registry.register(Box::new(functions_seconds.clone()))?;
        registry.register(Box::new(invocation_total.clone()))?;
        registry.register(Box::new(invocation_started.clone()))?;
        registry.register(Box::new(service_requests_total.clone()))?;
        registry.register(Box::new(service_duration_seconds.clone()))?;
        registry.register(Box::new(async_enqueue_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            functions_seconds,
            invocation_total,
            invocation_started,
            service_requests_total,
            service_duration_seconds,
            async_enqueue_total,
        }))
    }

    /// Record an accepted async invocation.
    pub fn observe_enqueue(&self, function_name: &str) {
        self.async_enqueue_total
            .with_label_values(&[function_name])
            .inc();
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = String::new();
        TextEncoder::new().encode_utf8(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Feeds function invocation events into the function collectors.
pub struct PrometheusFunctionNotifier {
    metrics: Arc<GatewayMetrics>,
}

impl PrometheusFunctionNotifier {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self { metrics }
    }
}

impl HttpNotifier for PrometheusFunctionNotifier {
    fn notify(&self, event: &RequestEvent) {
        let Some(function) = &event.function else {
            return;
        };
        let name = function.to_string();

        match event.phase {
            NotifierPhase::Started => {
                self.metrics
                    .invocation_started
                    .with_label_values(&[&name])
                    .inc();
            }
            NotifierPhase::Completed => {
                let code = event.status.to_string();
                self.metrics
                    .functions_seconds
                    .with_label_values(&[&name, &code])
                    .observe(event.duration.as_secs_f64());
                self.metrics
                    .invocation_total
                    .with_label_values(&[&name, &code])
                    .inc();
            }
        }
    }
}

/// Feeds gateway service-route events into the HTTP collectors.
pub struct PrometheusServiceNotifier {
    metrics: Arc<GatewayMetrics>,
}

impl PrometheusServiceNotifier {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self { metrics }
    }
}

impl HttpNotifier for PrometheusServiceNotifier {
    fn notify(&self, event: &RequestEvent) {
        if event.phase != NotifierPhase::Completed {
            return;
        }
        let method = event.method.as_str();
        let code = event.status.to_string();
        self.metrics
            .service_requests_total
            .with_label_values(&[method, &event.path, &code])
            .inc();
        self.metrics
            .service_duration_seconds
            .with_label_values(&[method, &event.path])
            .observe(event.duration.as_secs_f64());
    }
}
