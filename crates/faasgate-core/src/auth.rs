//! Service-to-service basic-auth credentials.
//!
//! The credential pair is mounted as two files (`basic-auth-user`,
//! `basic-auth-password`) under the secret mount path, the way secret
//! stores project them into containers.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::ConfigError;

/// A username/password pair injected on provider-bound requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuthCredentials {
    pub user: String,
    pub password: String,
}

impl BasicAuthCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Read the pair from `{mount}/basic-auth-user` and
    /// `{mount}/basic-auth-password`, trimming trailing whitespace the
    /// way secret files tend to carry it.
    pub fn read_from_disk(mount: &Path) -> Result<Self, ConfigError> {
        let user = read_secret(&mount.join("basic-auth-user"))?;
        let password = read_secret(&mount.join("basic-auth-password"))?;
        Ok(Self { user, password })
    }

    /// The `Authorization` header value for these credentials.
    pub fn header_value(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.user, self.password));
        format!("Basic {encoded}")
    }
}

fn read_secret(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim_end().to_string())
        .map_err(|source| ConfigError::Secret {
            path: path.display().to_string(),
            source,
        })
}
