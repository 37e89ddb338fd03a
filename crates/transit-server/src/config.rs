//! Configuration loading and validation for the transit service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any variable is invalid.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::batch::{BatchLimits, DEFAULT_MAX_ITEMS, DEFAULT_WORKERS};
use crate::engine::{EngineLimits, DEFAULT_MAX_PLAINTEXT_BYTES};
use crate::server::middleware::REQUEST_TIMEOUT;

/// Validated transit service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Port the HTTP(S) server listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Filesystem path to the PEM-encoded TLS certificate chain. When set
    /// together with `tls_key_path`, the server speaks HTTPS.
    #[serde(default)]
    pub tls_cert_path: Option<String>,

    /// Filesystem path to the PEM-encoded TLS private key.
    #[serde(default)]
    pub tls_key_path: Option<String>,

    /// OTLP endpoint for span export. Logs only when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Per-request timeout, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Largest plaintext accepted by encrypt, in bytes.
    #[serde(default = "default_max_plaintext_bytes")]
    pub max_plaintext_bytes: usize,

    /// Largest number of items in one batch request.
    #[serde(default = "default_batch_max_items")]
    pub batch_max_items: usize,

    /// Number of parallel chunks a batch is split into.
    #[serde(default = "default_batch_workers")]
    pub batch_workers: usize,
}

fn default_listen_port() -> u16 {
    8200
}
fn default_log_level() -> String {
    "info".into()
}
fn default_request_timeout() -> u64 {
    REQUEST_TIMEOUT.as_secs()
}
fn default_max_plaintext_bytes() -> usize {
    DEFAULT_MAX_PLAINTEXT_BYTES
}
fn default_batch_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}
fn default_batch_workers() -> usize {
    DEFAULT_WORKERS
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Certificate and key paths, when HTTPS is configured.
    pub fn tls_paths(&self) -> Option<(&str, &str)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.as_str(), key.as_str())),
            _ => None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn engine_limits(&self) -> EngineLimits {
        EngineLimits {
            max_plaintext_bytes: self.max_plaintext_bytes,
        }
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_items: self.batch_max_items,
            workers: self.batch_workers,
        }
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => {
                ensure_non_empty(cert, "TLS_CERT_PATH")?;
                ensure_non_empty(key, "TLS_KEY_PATH")?;
            }
            (None, None) => {}
            _ => anyhow::bail!("TLS_CERT_PATH and TLS_KEY_PATH must be set together"),
        }
        if let Some(endpoint) = &self.otel_exporter_otlp_endpoint {
            ensure_non_empty(endpoint, "OTEL_EXPORTER_OTLP_ENDPOINT")?;
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must be > 0");
        }
        if self.max_plaintext_bytes == 0 {
            anyhow::bail!("MAX_PLAINTEXT_BYTES must be > 0");
        }
        if self.batch_max_items == 0 {
            anyhow::bail!("BATCH_MAX_ITEMS must be > 0");
        }
        if self.batch_workers == 0 {
            anyhow::bail!("BATCH_WORKERS must be > 0");
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} must not be empty when set");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            listen_port: default_listen_port(),
            tls_cert_path: None,
            tls_key_path: None,
            otel_exporter_otlp_endpoint: None,
            log_level: default_log_level(),
            request_timeout_secs: default_request_timeout(),
            max_plaintext_bytes: default_max_plaintext_bytes(),
            batch_max_items: default_batch_max_items(),
            batch_workers: default_batch_workers(),
        }
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_listen_port(), 8200);
        assert_eq!(default_log_level(), "info");
        assert_eq!(default_request_timeout(), 30);
        assert_eq!(default_max_plaintext_bytes(), 1024 * 1024);
        assert_eq!(default_batch_max_items(), 1000);
        assert_eq!(default_batch_workers(), 4);
        assert!(base().validate().is_ok());
    }

    #[test]
    fn validate_rejects_half_configured_tls() {
        let cfg = Config {
            tls_cert_path: Some("/etc/transit/tls.crt".into()),
            ..base()
        };
        assert!(cfg.validate().is_err());
        assert!(cfg.tls_paths().is_none());
    }

    #[test]
    fn tls_paths_when_both_set() {
        let cfg = Config {
            tls_cert_path: Some("/etc/transit/tls.crt".into()),
            tls_key_path: Some("/etc/transit/tls.key".into()),
            ..base()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(
            cfg.tls_paths(),
            Some(("/etc/transit/tls.crt", "/etc/transit/tls.key"))
        );
    }

    #[test]
    fn validate_rejects_zero_limits() {
        assert!(Config { batch_workers: 0, ..base() }.validate().is_err());
        assert!(Config { batch_max_items: 0, ..base() }.validate().is_err());
        assert!(Config { max_plaintext_bytes: 0, ..base() }.validate().is_err());
        assert!(Config { request_timeout_secs: 0, ..base() }.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_otlp_endpoint() {
        let cfg = Config {
            otel_exporter_otlp_endpoint: Some("  ".into()),
            ..base()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn limits_follow_config() {
        let cfg = Config {
            max_plaintext_bytes: 64,
            batch_max_items: 10,
            batch_workers: 2,
            ..base()
        };
        assert_eq!(cfg.engine_limits().max_plaintext_bytes, 64);
        assert_eq!(cfg.batch_limits().max_items, 10);
        assert_eq!(cfg.batch_limits().workers, 2);
    }
}
