//! Environment-driven gateway configuration.
//!
//! Every option comes from the process environment, matching the
//! deployment convention of the platform: the gateway runs as a
//! container whose only knobs are env vars. `functions_provider_url`
//! is the one required key; everything else has a default.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Error raised while reading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required configuration key `{0}` is not set")]
    Missing(&'static str),

    #[error("configuration key `{key}` has invalid value `{value}`")]
    Invalid { key: &'static str, value: String },

    #[error("failed to read secret `{path}`: {source}")]
    Secret {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Connection settings for the async message bus.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub address: String,
    pub port: u16,
    /// Recognized for compatibility with clustered deployments; the
    /// plain NATS client does not use it.
    pub cluster_name: String,
    pub channel: String,
}

impl NatsConfig {
    /// The `host:port` endpoint to connect to.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// The gateway's full configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the back-end function provider. Required.
    pub functions_provider_url: String,
    /// Base URL of the log provider; defaults to the function provider.
    pub logs_provider_url: String,

    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub upstream_timeout: Duration,

    /// Namespace substituted when a function address names none.
    pub default_namespace: String,

    /// Route invocations directly to `{name}.{namespace}.{suffix}`
    /// instead of through the provider.
    pub direct_functions: bool,
    pub direct_functions_suffix: String,

    pub basic_auth: bool,
    pub secret_mount_path: PathBuf,

    /// External authentication proxy; empty disables the decoration.
    pub auth_proxy_url: String,
    pub auth_proxy_pass_body: bool,

    pub scale_from_zero: bool,
    pub probe_functions: bool,

    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,

    /// Freshness window for cached replica counts.
    pub cache_expiry: Duration,
    /// Freshness window for cached probe outcomes.
    pub probe_cache_expiry: Duration,

    pub nats: Option<NatsConfig>,

    /// Prometheus endpoint used by deployments that enrich function
    /// listings with invocation rates. Recognized, not consumed here.
    pub prometheus_host: String,
    pub prometheus_port: u16,
}

impl GatewayConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let functions_provider_url = env_str("functions_provider_url", "");
        if functions_provider_url.is_empty() {
            return Err(ConfigError::Missing("functions_provider_url"));
        }
        let functions_provider_url = normalize_url(&functions_provider_url)?;

        let logs_provider_url = match env_str("logs_provider_url", "").as_str() {
            "" => functions_provider_url.clone(),
            other => normalize_url(other)?,
        };

        let nats_address = env_str("faas_nats_address", "");
        let nats = if nats_address.is_empty() {
            None
        } else {
            Some(NatsConfig {
                address: nats_address,
                port: env_u16("faas_nats_port", 4222)?,
                cluster_name: env_str("faas_nats_cluster_name", "faas-cluster"),
                channel: env_str("faas_nats_channel", "faas-request"),
            })
        };

        Ok(Self {
            functions_provider_url,
            logs_provider_url,
            read_timeout: env_duration("read_timeout", Duration::from_secs(8))?,
            write_timeout: env_duration("write_timeout", Duration::from_secs(8))?,
            upstream_timeout: env_duration("upstream_timeout", Duration::from_secs(8))?,
            default_namespace: env_str("functions_default_namespace", ""),
            direct_functions: env_bool("direct_functions", false)?,
            direct_functions_suffix: env_str("direct_functions_suffix", ""),
            basic_auth: env_bool("basic_auth", false)?,
            secret_mount_path: PathBuf::from(env_str("secret_mount_path", "/run/secrets/")),
            auth_proxy_url: env_str("auth_proxy_url", ""),
            auth_proxy_pass_body: env_bool("auth_proxy_pass_body", false)?,
            scale_from_zero: env_bool("scale_from_zero", true)?,
            probe_functions: env_bool("probe_functions", false)?,
            max_idle_conns: env_usize("max_idle_conns", 1024)?,
            max_idle_conns_per_host: env_usize("max_idle_conns_per_host", 1024)?,
            cache_expiry: env_duration("cache_expiry", Duration::from_millis(250))?,
            probe_cache_expiry: env_duration("probe_cache_expiry", Duration::from_secs(5))?,
            nats,
            prometheus_host: env_str("faas_prometheus_host", "prometheus"),
            prometheus_port: env_u16("faas_prometheus_port", 9090)?,
        })
    }

    /// Whether the async invocation path is enabled.
    pub fn use_nats(&self) -> bool {
        self.nats.is_some()
    }

    /// Whether the external auth proxy decoration is enabled.
    pub fn use_external_auth(&self) -> bool {
        self.basic_auth && !self.auth_proxy_url.is_empty()
    }
}

fn env_str(key: &'static str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_bool(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => match v.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value: v }),
        },
        _ => Ok(default),
    }
}

fn env_usize(key: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: v }),
        _ => Ok(default),
    }
}

fn env_u16(key: &'static str, default: u16) -> Result<u16, ConfigError> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: v }),
        _ => Ok(default),
    }
}

fn env_duration(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => {
            parse_duration(&v).ok_or(ConfigError::Invalid { key, value: v })
        }
        _ => Ok(default),
    }
}

/// Parse a duration like `500ms`, `10s`, `2m`, or a bare second count.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Strip any trailing slash so URL joins stay predictable.
fn normalize_url(raw: &str) -> Result<String, ConfigError> {
    if !raw.starts_with("http://") && !raw.starts_with("https://") {
        return Err(ConfigError::Invalid {
            key: "functions_provider_url",
            value: raw.to_string(),
        });
    }
    Ok(raw.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_forms() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn normalize_url_trims_trailing_slash() {
        assert_eq!(
            normalize_url("http://gateway:8080/").unwrap(),
            "http://gateway:8080"
        );
    }

    #[test]
    fn normalize_url_rejects_non_http() {
        assert!(normalize_url("gateway:8080").is_err());
    }

    #[test]
    fn nats_endpoint_joins_host_and_port() {
        let nats = NatsConfig {
            address: "nats".to_string(),
            port: 4222,
            cluster_name: "faas-cluster".to_string(),
            channel: "faas-request".to_string(),
        };
        assert_eq!(nats.endpoint(), "nats:4222");
    }
}
