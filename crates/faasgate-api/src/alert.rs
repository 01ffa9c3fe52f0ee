//! AlertManager webhook handling.
//!
//! Firing `APIHighInvocationRate` alerts scale the named function up by
//! a step derived from its declared maximum; resolved alerts scale it
//! back down by the same step. Errors on individual alerts are
//! collected so one bad alert never aborts the batch.

use serde::Deserialize;
use tracing::{info, warn};

use faasgate_core::FunctionTarget;
use faasgate_scaling::ProviderQuery;

/// The only alert name the gateway acts on.
const HIGH_INVOCATION_RATE: &str = "APIHighInvocationRate";

/// AlertManager webhook payload.
#[derive(Debug, Deserialize)]
pub struct AlertPayload {
    pub status: Option<String>,
    pub receiver: Option<String>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Deserialize)]
pub struct Alert {
    pub status: String,
    pub labels: AlertLabels,
}

#[derive(Debug, Deserialize)]
pub struct AlertLabels {
    pub alertname: Option<String>,
    /// `name` or `namespace/name`; a missing label skips the alert.
    pub function_name: Option<String>,
}

/// Apply every actionable alert in the payload. Returns the per-alert
/// errors; an empty vec means the whole batch succeeded.
pub async fn apply_alerts(
    query: &dyn ProviderQuery,
    default_namespace: &str,
    payload: &AlertPayload,
) -> Vec<String> {
    let mut errors = Vec::new();

    for alert in &payload.alerts {
        if alert.labels.alertname.as_deref() != Some(HIGH_INVOCATION_RATE) {
            continue;
        }
        let Some(raw_name) = alert.labels.function_name.as_deref().filter(|n| !n.is_empty())
        else {
            // Missing label: skip the alert, never fail the batch.
            warn!("alert without function_name label skipped");
            continue;
        };

        let target = parse_alert_target(raw_name, default_namespace);
        let firing = alert.status == "firing";
        if let Err(err) = scale_for_alert(query, &target, firing).await {
            errors.push(format!("{target}: {err}"));
        }
    }

    errors
}

/// `ns/name` or bare `name`.
fn parse_alert_target(raw: &str, default_namespace: &str) -> FunctionTarget {
    match raw.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => FunctionTarget {
            name: name.to_string(),
            namespace: ns.to_string(),
        },
        _ => FunctionTarget {
            name: raw.to_string(),
            namespace: default_namespace.to_string(),
        },
    }
}

async fn scale_for_alert(
    query: &dyn ProviderQuery,
    target: &FunctionTarget,
    firing: bool,
) -> Result<(), String> {
    let status = query
        .function_status(target)
        .await
        .map_err(|e| e.to_string())?;

    let new_replicas = calculate_replicas(
        firing,
        status.replicas,
        status.min_replicas,
        status.max_replicas,
        status.scaling_factor,
    );

    info!(
        function = %target,
        firing,
        from = status.replicas,
        to = new_replicas,
        "alert scaling decision"
    );

    if new_replicas != status.replicas {
        query
            .set_replicas(target, new_replicas)
            .await
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// The replica count an alert transition should produce.
///
/// The step is `ceil(max × factor / 100)`. Firing alerts move up
/// towards `max`; resolved alerts move down, floored at `min`.
pub fn calculate_replicas(firing: bool, current: u64, min: u64, max: u64, factor: u64) -> u64 {
    let step = ((max as f64) * (factor as f64) / 100.0).ceil() as u64;

    if firing {
        if step == 0 {
            current
        } else {
            current.saturating_add(step).min(max)
        }
    } else {
        current.saturating_sub(step).max(min)
    }
}
