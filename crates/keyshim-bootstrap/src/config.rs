// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for keyshim-bootstrap.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder replaced with the bucket name when rendering the template.
pub const BUCKET_NAME_PLACEHOLDER: &str = "BUCKET_NAME";
/// Placeholder replaced with the key identifier when rendering the template.
pub const KEY_ID_PLACEHOLDER: &str = "KEY_ID";

/// Where the server configuration template comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TemplateSource {
    /// Shipped next to the function code under the task root.
    #[default]
    Bundled,
    /// Fetched from the content store alongside the executable.
    Store,
}

impl std::str::FromStr for TemplateSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bundled" | "local" => Ok(TemplateSource::Bundled),
            "store" | "s3" => Ok(TemplateSource::Store),
            _ => Err(ConfigError::Invalid {
                var: "KEYSHIM_TEMPLATE_SOURCE",
                value: s.to_string(),
            }),
        }
    }
}

/// Bootstrap configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bucket holding the server executable (and template, if store-sourced)
    pub bucket_name: String,
    /// Key identifier substituted into the template
    pub key_id: Option<String>,
    /// Read-only directory containing the function code
    pub task_root: PathBuf,
    /// Writable directory the executable and rendered config are staged in
    pub staging_dir: PathBuf,
    /// Object key and file name of the server executable
    pub executable_name: String,
    /// Object key and file name of the configuration template
    pub template_name: String,
    /// Where the template is read from
    pub template_source: TemplateSource,
    /// Loopback address the server listens on
    pub upstream_addr: SocketAddr,
    /// Health endpoint path probed by the readiness gate
    pub health_path: String,
    /// Delay between readiness probes
    pub poll_interval: Duration,
    /// Upper bound on the readiness wait
    pub readiness_timeout: Duration,
    /// Upper bound on a single upstream request
    pub request_timeout: Duration,
    /// Local directory used as the content store instead of S3
    pub store_root: Option<PathBuf>,
    /// Arguments passed to the executable before `-config=<path>`
    pub server_args: Vec<String>,
    /// Extra placeholder values on top of bucket name and key id
    pub extra_placeholders: BTreeMap<String, String>,
}

impl Config {
    /// Create a configuration with defaults for everything but the bucket.
    pub fn new(bucket_name: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            key_id: None,
            task_root: default_task_root(),
            staging_dir: PathBuf::from("/tmp/bin"),
            executable_name: "vault".to_string(),
            template_name: "vault.hcl".to_string(),
            template_source: TemplateSource::Bundled,
            upstream_addr: SocketAddr::from(([127, 0, 0, 1], 8200)),
            health_path: "/v1/sys/seal-status".to_string(),
            poll_interval: Duration::from_secs(5),
            readiness_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            store_root: None,
            server_args: vec!["server".to_string()],
            extra_placeholders: BTreeMap::new(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Required Environment Variables
    /// - `BUCKET_NAME` - Bucket holding the server executable
    ///
    /// # Optional Environment Variables
    /// - `KEY_ID` - Key identifier substituted into the template
    /// - `LAMBDA_TASK_ROOT` - Function code directory (default: binary's directory)
    /// - `KEYSHIM_STAGING_DIR` - Writable staging directory (default: "/tmp/bin")
    /// - `KEYSHIM_EXECUTABLE` - Executable object key (default: "vault")
    /// - `KEYSHIM_TEMPLATE` - Template file name / object key (default: "vault.hcl")
    /// - `KEYSHIM_TEMPLATE_SOURCE` - "bundled" or "store" (default: "bundled")
    /// - `KEYSHIM_UPSTREAM_ADDR` - Server address (default: "127.0.0.1:8200")
    /// - `KEYSHIM_HEALTH_PATH` - Health path (default: "/v1/sys/seal-status")
    /// - `KEYSHIM_READINESS_POLL_MS` - Probe interval (default: 5000)
    /// - `KEYSHIM_READINESS_TIMEOUT_SECS` - Readiness bound (default: 60)
    /// - `KEYSHIM_REQUEST_TIMEOUT_SECS` - Upstream request bound (default: 30)
    /// - `KEYSHIM_STORE_ROOT` - Use a local directory instead of S3
    /// - `KEYSHIM_SERVER_ARGS` - Whitespace-separated server arguments (default: "server")
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bucket_name = lookup("BUCKET_NAME")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingEnvVar("BUCKET_NAME"))?;

        let mut config = Self::new(bucket_name);
        config.key_id = lookup("KEY_ID").filter(|v| !v.is_empty());

        if let Some(root) = lookup("LAMBDA_TASK_ROOT") {
            config.task_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup("KEYSHIM_STAGING_DIR") {
            config.staging_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("KEYSHIM_EXECUTABLE") {
            config.executable_name = name;
        }
        if let Some(name) = lookup("KEYSHIM_TEMPLATE") {
            config.template_name = name;
        }
        if let Some(source) = lookup("KEYSHIM_TEMPLATE_SOURCE") {
            config.template_source = source.parse()?;
        }
        if let Some(addr) = lookup("KEYSHIM_UPSTREAM_ADDR") {
            config.upstream_addr = addr.parse().map_err(|_| ConfigError::Invalid {
                var: "KEYSHIM_UPSTREAM_ADDR",
                value: addr.clone(),
            })?;
        }
        if let Some(path) = lookup("KEYSHIM_HEALTH_PATH") {
            config.health_path = path;
        }
        if let Some(ms) = parse_u64(&lookup, "KEYSHIM_READINESS_POLL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_u64(&lookup, "KEYSHIM_READINESS_TIMEOUT_SECS")? {
            config.readiness_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, "KEYSHIM_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        config.store_root = lookup("KEYSHIM_STORE_ROOT")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        if let Some(args) = lookup("KEYSHIM_SERVER_ARGS") {
            config.server_args = args.split_whitespace().map(str::to_string).collect();
        }

        Ok(config)
    }

    /// Set the key identifier.
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Set the task root directory.
    pub fn with_task_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.task_root = path.into();
        self
    }

    /// Set the staging directory.
    pub fn with_staging_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_dir = path.into();
        self
    }

    /// Set the executable object key.
    pub fn with_executable_name(mut self, name: impl Into<String>) -> Self {
        self.executable_name = name.into();
        self
    }

    /// Set the template name and where it is read from.
    pub fn with_template(mut self, name: impl Into<String>, source: TemplateSource) -> Self {
        self.template_name = name.into();
        self.template_source = source;
        self
    }

    /// Set the upstream server address.
    pub fn with_upstream_addr(mut self, addr: SocketAddr) -> Self {
        self.upstream_addr = addr;
        self
    }

    /// Set the readiness poll interval and timeout.
    pub fn with_readiness(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.readiness_timeout = timeout;
        self
    }

    /// Set the upstream request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Use a local directory as the content store.
    pub fn with_store_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_root = Some(path.into());
        self
    }

    /// Set the arguments passed before `-config=<path>`.
    pub fn with_server_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add a placeholder value on top of the bucket name and key id.
    pub fn with_placeholder(mut self, token: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_placeholders.insert(token.into(), value.into());
        self
    }

    /// Base URL of the local server, without a trailing slash.
    pub fn upstream_base_url(&self) -> String {
        format!("http://{}", self.upstream_addr)
    }

    /// Full URL of the health endpoint.
    pub fn health_url(&self) -> String {
        format!("{}{}", self.upstream_base_url(), self.health_path)
    }

    /// Path of the rendered configuration inside the staging directory.
    pub fn rendered_config_path(&self) -> PathBuf {
        self.staging_dir.join(&self.template_name)
    }

    /// Path of the bundled template under the task root.
    pub fn bundled_template_path(&self) -> PathBuf {
        self.task_root.join(&self.template_name)
    }

    /// Placeholder tokens the renderer insists on resolving.
    pub fn known_placeholders(&self) -> Vec<String> {
        let mut tokens = vec![
            BUCKET_NAME_PLACEHOLDER.to_string(),
            KEY_ID_PLACEHOLDER.to_string(),
        ];
        tokens.extend(self.extra_placeholders.keys().cloned());
        tokens
    }

    /// Placeholder values sourced from this configuration.
    ///
    /// `KEY_ID` is only present when a key id is configured, so a template
    /// that references it fails to render without one.
    pub fn substitutions(&self) -> BTreeMap<String, String> {
        let mut values = self.extra_placeholders.clone();
        values.insert(
            BUCKET_NAME_PLACEHOLDER.to_string(),
            self.bucket_name.clone(),
        );
        if let Some(key_id) = &self.key_id {
            values.insert(KEY_ID_PLACEHOLDER.to_string(), key_id.clone());
        }
        values
    }
}

fn default_task_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn parse_u64<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable holds a value that cannot be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
    /// The loopback HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[("BUCKET_NAME", "b1")])).unwrap();

        assert_eq!(config.bucket_name, "b1");
        assert_eq!(config.key_id, None);
        assert_eq!(config.staging_dir, PathBuf::from("/tmp/bin"));
        assert_eq!(config.executable_name, "vault");
        assert_eq!(config.template_name, "vault.hcl");
        assert_eq!(config.template_source, TemplateSource::Bundled);
        assert_eq!(config.health_url(), "http://127.0.0.1:8200/v1/sys/seal-status");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.server_args, vec!["server".to_string()]);
        assert!(config.store_root.is_none());
    }

    #[test]
    fn test_missing_bucket() {
        let err = Config::from_lookup(lookup_from(&[("KEY_ID", "k1")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("BUCKET_NAME")));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("BUCKET_NAME", "b1"),
            ("KEY_ID", "k1"),
            ("LAMBDA_TASK_ROOT", "/var/task"),
            ("KEYSHIM_TEMPLATE_SOURCE", "store"),
            ("KEYSHIM_UPSTREAM_ADDR", "127.0.0.1:9200"),
            ("KEYSHIM_READINESS_POLL_MS", "250"),
            ("KEYSHIM_SERVER_ARGS", "server -log-level=warn"),
        ]))
        .unwrap();

        assert_eq!(config.bundled_template_path(), PathBuf::from("/var/task/vault.hcl"));
        assert_eq!(config.template_source, TemplateSource::Store);
        assert_eq!(config.upstream_base_url(), "http://127.0.0.1:9200");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.server_args, vec!["server", "-log-level=warn"]);
        assert_eq!(config.substitutions().get("KEY_ID").map(String::as_str), Some("k1"));
    }

    #[test]
    fn test_invalid_number() {
        let err = Config::from_lookup(lookup_from(&[
            ("BUCKET_NAME", "b1"),
            ("KEYSHIM_READINESS_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("KEYSHIM_READINESS_TIMEOUT_SECS"));
    }

    #[test]
    fn test_substitutions_skip_missing_key_id() {
        let config = Config::new("b1").with_placeholder("REGION", "eu-west-1");
        let values = config.substitutions();

        assert_eq!(values.get("BUCKET_NAME").map(String::as_str), Some("b1"));
        assert_eq!(values.get("REGION").map(String::as_str), Some("eu-west-1"));
        assert!(!values.contains_key("KEY_ID"));
        assert!(config.known_placeholders().contains(&"REGION".to_string()));
    }
}
