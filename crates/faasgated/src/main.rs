//! faasgated — the gateway daemon.
//!
//! Serves the public gateway surface on `:8080` and the Prometheus
//! scrape surface on `:8082`. All configuration comes from the
//! environment; `functions_provider_url` is the one required key.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use faasgate_api::pipeline::{
    CallIdStage, ForwardStage, Pipeline, ProbeStage, ScaleStage, Stage,
};
use faasgate_api::{metrics_router, public_router, GatewayContext};
use faasgate_core::{BasicAuthCredentials, GatewayConfig};
use faasgate_metrics::{GatewayMetrics, PrometheusFunctionNotifier, PrometheusServiceNotifier};
use faasgate_probe::{FunctionProber, ProbeCache};
use faasgate_proxy::{
    BaseUrlResolver, ForwardingProxy, FunctionAsHostResolver, HttpNotifier, LoggingNotifier,
    PathTransformer, PrefixTrimmingPathTransformer, SingleHostResolver,
    TransparentPathTransformer, UpstreamClient,
};
use faasgate_queue::{NatsQueue, Queue};
use faasgate_scaling::{
    CachedQuery, FunctionScaler, HttpProviderQuery, ProviderQuery, ReplicaCache, ScalerConfig,
};

const PUBLIC_PORT: u16 = 8080;
const METRICS_PORT: u16 = 8082;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,faasgate=debug,faasgated=debug".parse().unwrap()),
        )
        .init();

    let config = GatewayConfig::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = %config.functions_provider_url,
        read_timeout = ?config.read_timeout,
        write_timeout = ?config.write_timeout,
        upstream_timeout = ?config.upstream_timeout,
        "faasgate starting"
    );

    // Service-to-service credentials, mounted as secret files.
    let credentials = if config.basic_auth {
        Some(BasicAuthCredentials::read_from_disk(
            &config.secret_mount_path,
        )?)
    } else {
        None
    };

    let metrics = GatewayMetrics::new()?;

    // The replica cache is shared between the scaler and the cached
    // query so both see one consistent view of each function.
    let replica_cache = Arc::new(ReplicaCache::new(config.cache_expiry));
    let provider_query: Arc<dyn ProviderQuery> = Arc::new(HttpProviderQuery::new(
        config.functions_provider_url.clone(),
        credentials.clone(),
        config.upstream_timeout,
        config.max_idle_conns_per_host,
    ));
    let cached_query = CachedQuery::new(replica_cache.clone(), provider_query.clone());

    let upstream_client = Arc::new(UpstreamClient::new(
        config.upstream_timeout,
        config.max_idle_conns_per_host,
    ));

    let (function_resolver, function_transformer): (
        Arc<dyn BaseUrlResolver>,
        Arc<dyn PathTransformer>,
    ) = if config.direct_functions {
        info!(
            suffix = %config.direct_functions_suffix,
            "direct function routing enabled"
        );
        (
            Arc::new(FunctionAsHostResolver::new(
                &config.direct_functions_suffix,
                &config.default_namespace,
            )),
            Arc::new(PrefixTrimmingPathTransformer),
        )
    } else {
        (
            Arc::new(SingleHostResolver::new(&config.functions_provider_url)),
            Arc::new(TransparentPathTransformer),
        )
    };

    let function_notifiers: Vec<Arc<dyn HttpNotifier>> = vec![
        Arc::new(LoggingNotifier),
        Arc::new(PrometheusFunctionNotifier::new(metrics.clone())),
    ];
    let service_notifiers: Vec<Arc<dyn HttpNotifier>> = vec![
        Arc::new(LoggingNotifier),
        Arc::new(PrometheusServiceNotifier::new(metrics.clone())),
    ];

    let function_proxy = Arc::new(ForwardingProxy::new(
        upstream_client.clone(),
        function_resolver.clone(),
        function_transformer.clone(),
        None,
        function_notifiers,
    ));
    let system_proxy = Arc::new(ForwardingProxy::new(
        upstream_client.clone(),
        Arc::new(SingleHostResolver::new(&config.functions_provider_url)),
        Arc::new(TransparentPathTransformer),
        credentials.clone(),
        service_notifiers.clone(),
    ));
    let logs_proxy = Arc::new(ForwardingProxy::new(
        upstream_client.clone(),
        Arc::new(SingleHostResolver::new(&config.logs_provider_url)),
        Arc::new(TransparentPathTransformer),
        credentials.clone(),
        service_notifiers.clone(),
    ));

    // The invocation pipeline, assembled once and immutable afterwards.
    // Scaling must precede probing: a probe against zero replicas can
    // only ever fail.
    let mut stages: Vec<Arc<dyn Stage>> = vec![Arc::new(CallIdStage)];
    if config.scale_from_zero {
        let scaler = Arc::new(FunctionScaler::new(
            ScalerConfig::default(),
            replica_cache.clone(),
            provider_query.clone(),
        ));
        stages.push(Arc::new(ScaleStage::new(scaler)));
        info!("scale-from-zero enabled");
    }
    if config.probe_functions {
        let prober = Arc::new(FunctionProber::new(
            ProbeCache::new(config.probe_cache_expiry),
            cached_query.clone(),
            function_resolver.clone(),
            function_transformer.clone(),
            upstream_client.clone(),
        ));
        stages.push(Arc::new(ProbeStage::new(prober)));
        info!("function probing enabled");
    }
    stages.push(Arc::new(ForwardStage::new(function_proxy)));

    let queue: Option<Arc<dyn Queue>> = match &config.nats {
        Some(nats) => {
            let queue = NatsQueue::connect(&nats.endpoint(), nats.channel.clone()).await?;
            info!(
                endpoint = %nats.endpoint(),
                channel = %nats.channel,
                "async invocations enabled"
            );
            Some(Arc::new(queue))
        }
        None => None,
    };

    let ctx = Arc::new(GatewayContext {
        config,
        metrics: metrics.clone(),
        pipeline: Pipeline::new(stages),
        system_proxy,
        logs_proxy,
        queue,
        cached_query,
        provider_query,
        service_notifiers,
        assets_dir: PathBuf::from("./assets"),
    });

    // Metrics stay on a separate port so they can be kept internal.
    let metrics_app = metrics_router(metrics);
    let metrics_listener =
        TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], METRICS_PORT))).await?;
    info!(port = METRICS_PORT, "metrics server listening");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(metrics_listener, metrics_app).await {
            tracing::error!(error = %err, "metrics server failed");
        }
    });

    let public = public_router(ctx);
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], PUBLIC_PORT))).await?;
    info!(port = PUBLIC_PORT, "gateway listening");

    axum::serve(listener, public)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    info!("gateway stopped");
    Ok(())
}
