//! Function identity and replica status model.

use std::collections::HashMap;
use std::fmt;

/// Label carrying the declared minimum replica count.
pub const SCALE_MIN_LABEL: &str = "com.openfaas.scale.min";
/// Label carrying the declared maximum replica count.
pub const SCALE_MAX_LABEL: &str = "com.openfaas.scale.max";
/// Label carrying the scaling step factor (percent of max, 1-100).
pub const SCALE_FACTOR_LABEL: &str = "com.openfaas.scale.factor";

/// Default minimum replicas when no label is declared.
pub const DEFAULT_MIN_REPLICAS: u64 = 1;
/// Default maximum replicas when no label is declared.
pub const DEFAULT_MAX_REPLICAS: u64 = 100;
/// Default scaling factor when no label is declared.
pub const DEFAULT_SCALING_FACTOR: u64 = 20;

/// A function addressed by `(namespace, name)`.
///
/// The namespace may be empty, in which case the gateway's configured
/// default namespace applies. Path segments of the form `name.namespace`
/// split on the last dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionTarget {
    pub name: String,
    pub namespace: String,
}

impl FunctionTarget {
    /// Parse a function address from a path segment.
    ///
    /// Accepts `figlet` and `figlet.prod` forms. Returns `None` when the
    /// name contains characters outside `[-A-Za-z0-9_.]`.
    pub fn parse(raw: &str, default_namespace: &str) -> Option<Self> {
        if raw.is_empty() || !is_valid_function_name(raw) {
            return None;
        }
        let (name, namespace) = match raw.rsplit_once('.') {
            Some((name, ns)) if !name.is_empty() && !ns.is_empty() => (name, ns),
            _ => (raw, default_namespace),
        };
        Some(Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
    }

    /// Cache and single-flight key for this function.
    pub fn key(&self) -> String {
        format!("{}.{}", self.name, self.namespace)
    }
}

impl fmt::Display for FunctionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.name, self.namespace)
        }
    }
}

/// Check a raw function name against the allowed character class.
pub fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// The authoritative replica snapshot for one function, with the scaling
/// bounds already resolved from labels.
///
/// Invariants: `available_replicas <= replicas`, `min_replicas <=
/// max_replicas`, and `min_replicas == 0` means the function is
/// scale-from-zero eligible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionStatus {
    pub replicas: u64,
    pub available_replicas: u64,
    pub min_replicas: u64,
    pub max_replicas: u64,
    pub scaling_factor: u64,
    pub annotations: HashMap<String, String>,
}

impl FunctionStatus {
    /// The replica count a scale-from-zero wake-up should request.
    pub fn first_replica_target(&self) -> u64 {
        self.min_replicas.max(1)
    }
}

/// Resolve scaling bounds from a function's label map.
///
/// Unparseable values fall back to the defaults. Returns `Err` with the
/// offending value when the factor is outside 1..=100.
pub fn scaling_bounds(
    labels: Option<&HashMap<String, String>>,
) -> Result<(u64, u64, u64), String> {
    let mut min = DEFAULT_MIN_REPLICAS;
    let mut max = DEFAULT_MAX_REPLICAS;
    let mut factor = DEFAULT_SCALING_FACTOR;

    if let Some(labels) = labels {
        min = parse_label(labels, SCALE_MIN_LABEL, min);
        max = parse_label(labels, SCALE_MAX_LABEL, max);
        factor = parse_label(labels, SCALE_FACTOR_LABEL, factor);
    }

    if factor == 0 || factor > 100 {
        return Err(format!("scaling factor {factor} out of range 1-100"));
    }
    Ok((min, max, factor))
}

fn parse_label(labels: &HashMap<String, String>, key: &str, default: u64) -> u64 {
    labels
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
