use std::collections::HashMap;
use std::net::SocketAddr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// Certificate transport and cert-auth gate policy.
    #[serde(default)]
    pub certauth: CertAuthConfig,
    /// API-key protection for the admin surface (enqueue, push-info).
    #[serde(default)]
    pub admin: AdminConfig,
    /// Multi-storage router for phased backend migration.
    #[serde(default)]
    pub storage_router: StorageRouterConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// One of `postgres`, `mysql`, `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertAuthConfig {
    /// Header carrying the URL-encoded PEM client certificate, as forwarded
    /// by the TLS-terminating reverse proxy.
    #[serde(default = "default_cert_header")]
    pub header: String,

    /// Log cert-auth violations instead of rejecting.
    #[serde(default)]
    pub warn_only: bool,

    /// Prune prior hashes after a successful new association.
    #[serde(default)]
    pub retire: bool,

    /// Reject an Authenticate whose certificate is bound to a different
    /// enrollment.
    #[serde(default)]
    pub reject_rebind: bool,
}

impl Default for CertAuthConfig {
    fn default() -> Self {
        Self {
            header: default_cert_header(),
            warn_only: false,
            retire: false,
            reject_rebind: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Static API key for `/v1` endpoints; absent disables the surface.
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageRouterConfig {
    /// URL query parameter naming the backend.
    #[serde(default = "default_storage_param")]
    pub param: String,

    /// Named secondary backends; requests without a match use the default
    /// database.
    #[serde(default)]
    pub backends: HashMap<String, NamedBackendConfig>,
}

impl Default for StorageRouterConfig {
    fn default() -> Self {
        Self {
            param: default_storage_param(),
            backends: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedBackendConfig {
    pub backend: String,
    #[serde(default)]
    pub url: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_cert_header() -> String {
    "x-ssl-client-cert".to_string()
}

fn default_storage_param() -> String {
    "storage".to_string()
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with ASPEN__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("ASPEN").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build a configuration from embedded defaults plus overrides, without
    /// touching the filesystem. Used by tests.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "127.0.0.1"
            port = 0
            request_timeout_secs = 30

            [database]
            backend = "memory"
            url = ""

            [logging]
            level = "debug"
            format = "pretty"
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }
        builder.build()?.try_deserialize()
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        match self.database.backend.as_str() {
            "postgres" | "mysql" => {
                if self.database.url.is_empty() {
                    return Err(config::ConfigError::Message(format!(
                        "database.url is required for the {} backend",
                        self.database.backend
                    )));
                }
            }
            "memory" => {}
            other => {
                return Err(config::ConfigError::Message(format!(
                    "unknown database backend {other:?}"
                )));
            }
        }
        for (name, backend) in &self.storage_router.backends {
            if backend.backend != "memory" && backend.url.is_empty() {
                return Err(config::ConfigError::Message(format!(
                    "storage_router.backends.{name}.url is required"
                )));
            }
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
