//! Upstream URL resolution and path rewriting.
//!
//! Two modes exist. In provider mode every upstream request goes to the
//! single provider URL and the path passes through untouched. In direct
//! mode the upstream host is derived from the function address and the
//! `/function/{name}` prefix is trimmed before forwarding.

use http::request::Parts;

use faasgate_core::FunctionTarget;

/// Resolve the upstream base URL for a request.
pub trait BaseUrlResolver: Send + Sync {
    fn resolve(&self, parts: &Parts) -> String;
}

/// Rewrite the request path before forwarding.
pub trait PathTransformer: Send + Sync {
    fn transform(&self, path: &str) -> String;
}

/// Provider mode: everything goes to one base URL.
pub struct SingleHostResolver {
    base_url: String,
}

impl SingleHostResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl BaseUrlResolver for SingleHostResolver {
    fn resolve(&self, _parts: &Parts) -> String {
        self.base_url.clone()
    }
}

/// Direct mode: the function itself is the upstream host, addressed as
/// `{name}.{namespace}.{suffix}` on the standard function port.
pub struct FunctionAsHostResolver {
    suffix: String,
    default_namespace: String,
    port: u16,
}

impl FunctionAsHostResolver {
    pub fn new(suffix: impl Into<String>, default_namespace: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            default_namespace: default_namespace.into(),
            port: 8080,
        }
    }

    /// The host for a resolved function target.
    pub fn host_for(&self, target: &FunctionTarget) -> String {
        let mut labels = vec![target.name.as_str()];
        if !target.namespace.is_empty() {
            labels.push(&target.namespace);
        }
        if !self.suffix.is_empty() {
            labels.push(&self.suffix);
        }
        labels.join(".")
    }
}

impl BaseUrlResolver for FunctionAsHostResolver {
    fn resolve(&self, parts: &Parts) -> String {
        let name = function_segment(parts.uri.path()).unwrap_or_default();
        let target = FunctionTarget::parse(name, &self.default_namespace)
            .unwrap_or_else(|| FunctionTarget {
                name: name.to_string(),
                namespace: self.default_namespace.clone(),
            });
        format!("http://{}:{}", self.host_for(&target), self.port)
    }
}

/// Pass the path through untouched.
pub struct TransparentPathTransformer;

impl PathTransformer for TransparentPathTransformer {
    fn transform(&self, path: &str) -> String {
        path.to_string()
    }
}

/// Strip the `/function/{name}` prefix, leaving the function-relative
/// path. `/function/echo/v1/x` becomes `/v1/x`.
pub struct PrefixTrimmingPathTransformer;

impl PathTransformer for PrefixTrimmingPathTransformer {
    fn transform(&self, path: &str) -> String {
        let Some(rest) = path.strip_prefix("/function/") else {
            return path.to_string();
        };
        match rest.split_once('/') {
            Some((_name, tail)) => format!("/{tail}"),
            None => "/".to_string(),
        }
    }
}

/// The `{name}` segment of a `/function/{name}[/...]` path.
fn function_segment(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/function/")?;
    let name = rest.split('/').next().unwrap_or(rest);
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts_for(path: &str) -> Parts {
        let (parts, _) = http::Request::builder()
            .uri(path)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn single_host_ignores_the_request() {
        let resolver = SingleHostResolver::new("http://provider:8081");
        assert_eq!(
            resolver.resolve(&parts_for("/function/echo/sub")),
            "http://provider:8081"
        );
        assert_eq!(
            resolver.resolve(&parts_for("/system/functions")),
            "http://provider:8081"
        );
    }

    #[test]
    fn function_as_host_builds_dns_name() {
        let resolver = FunctionAsHostResolver::new("svc.cluster.local", "openfaas-fn");
        assert_eq!(
            resolver.resolve(&parts_for("/function/figlet")),
            "http://figlet.openfaas-fn.svc.cluster.local:8080"
        );
    }

    #[test]
    fn function_as_host_honours_explicit_namespace() {
        let resolver = FunctionAsHostResolver::new("svc.cluster.local", "openfaas-fn");
        assert_eq!(
            resolver.resolve(&parts_for("/function/figlet.prod/sub/path")),
            "http://figlet.prod.svc.cluster.local:8080"
        );
    }

    #[test]
    fn function_as_host_without_suffix() {
        let resolver = FunctionAsHostResolver::new("", "fn");
        assert_eq!(
            resolver.resolve(&parts_for("/function/echo")),
            "http://echo.fn:8080"
        );
    }

    #[test]
    fn transparent_transformer_passes_through() {
        let t = TransparentPathTransformer;
        assert_eq!(t.transform("/function/echo/v1"), "/function/echo/v1");
    }

    #[test]
    fn trimming_transformer_strips_function_prefix() {
        let t = PrefixTrimmingPathTransformer;
        assert_eq!(t.transform("/function/echo"), "/");
        assert_eq!(t.transform("/function/echo/"), "/");
        assert_eq!(t.transform("/function/echo/v1/users"), "/v1/users");
        assert_eq!(t.transform("/system/info"), "/system/info");
    }
}
