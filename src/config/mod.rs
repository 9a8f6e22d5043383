//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroU64,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{CacheConfig, PartitionPolicy, validate_partition_name};

pub use cli::{CacheOverrides, CliArgs, Command, MaintenanceArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pwa-cache";
const ENV_PREFIX: &str = "PWA_CACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_STORAGE_DIR: &str = ".pwa-cache";
const DEFAULT_UPSTREAM_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_BODY_LIMIT_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
    pub storage: StorageSettings,
    pub upstream: UpstreamSettings,
    pub sweeper: SweeperSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSettings {
    /// Process-local; lost on restart.
    Memory { quota_bytes: Option<NonZeroU64> },
    /// One directory per partition under `directory`.
    Disk { directory: PathBuf },
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub origin: Url,
    pub timeout: Option<Duration>,
    pub body_limit_bytes: NonZeroU64,
}

impl UpstreamSettings {
    pub fn body_limit(&self) -> usize {
        // Range-checked during validation.
        usize::try_from(self.body_limit_bytes.get()).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone)]
pub struct SweeperSettings {
    pub enabled: bool,
    pub interval: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(command) => raw.apply_cache_overrides(command.cache_overrides()),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    storage: RawStorageSettings,
    upstream: RawUpstreamSettings,
    sweeper: RawSweeperSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(timeout) = overrides.upstream_timeout_ms {
            self.upstream.timeout_ms = Some(timeout);
        }
        if let Some(interval) = overrides.sweeper_interval_seconds {
            self.sweeper.interval_seconds = Some(interval);
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(version) = overrides.cache_version.as_ref() {
            self.cache.version = Some(version.clone());
        }
        if let Some(backend) = overrides.storage_backend.as_ref() {
            self.storage.backend = Some(backend.clone());
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        if let Some(origin) = overrides.upstream_origin.as_ref() {
            self.upstream.origin = Some(origin.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            storage,
            upstream,
            sweeper,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_config(cache)?,
            storage: build_storage_settings(storage)?,
            upstream: build_upstream_settings(upstream)?,
            sweeper: build_sweeper_settings(sweeper)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_config(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let app_name = cache.app_name.unwrap_or(defaults.app_name);
    validate_partition_name(&app_name).map_err(|_| {
        LoadError::invalid(
            "cache.app_name",
            "must be non-empty and use only letters, digits, `-`, `_` or `.`",
        )
    })?;
    let version = cache.version.unwrap_or(defaults.version);
    validate_partition_name(&version).map_err(|_| {
        LoadError::invalid(
            "cache.version",
            "must be non-empty and use only letters, digits, `-`, `_` or `.`",
        )
    })?;

    let offline_path = cache.offline_path.unwrap_or(defaults.offline_path);
    if !offline_path.starts_with('/') {
        return Err(LoadError::invalid(
            "cache.offline_path",
            "must be an absolute path",
        ));
    }

    let static_manifest = cache.static_manifest.unwrap_or(defaults.static_manifest);
    if let Some(path) = static_manifest.iter().find(|path| !path.starts_with('/')) {
        return Err(LoadError::invalid(
            "cache.static_manifest",
            format!("`{path}` is not an absolute path"),
        ));
    }

    let api_host = cache.api_host.unwrap_or(defaults.api_host);
    if api_host.trim().is_empty() {
        return Err(LoadError::invalid("cache.api_host", "must not be empty"));
    }

    Ok(CacheConfig {
        app_name,
        version,
        static_policy: build_policy(cache.static_partition, defaults.static_policy, "cache.static")?,
        dynamic_policy: build_policy(cache.dynamic, defaults.dynamic_policy, "cache.dynamic")?,
        api_policy: build_policy(cache.api, defaults.api_policy, "cache.api")?,
        static_manifest,
        static_prefixes: cache.static_prefixes.unwrap_or(defaults.static_prefixes),
        offline_path,
        api_host: api_host.trim().to_string(),
        expire_by_age: cache.expire_by_age.unwrap_or(defaults.expire_by_age),
    })
}

fn build_policy(
    raw: RawPartitionPolicy,
    defaults: PartitionPolicy,
    key: &'static str,
) -> Result<PartitionPolicy, LoadError> {
    let max_age_ms = raw.max_age_ms.unwrap_or(defaults.max_age_ms);
    if max_age_ms == 0 {
        return Err(LoadError::invalid(key, "max_age_ms must be greater than zero"));
    }
    let max_entries = raw.max_entries.unwrap_or(defaults.max_entries);
    if max_entries == 0 {
        return Err(LoadError::invalid(key, "max_entries must be greater than zero"));
    }
    Ok(PartitionPolicy::new(max_age_ms, max_entries))
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let backend = storage.backend.unwrap_or_else(|| "disk".to_string());
    match backend.trim().to_ascii_lowercase().as_str() {
        "memory" => {
            let quota_bytes = match storage.quota_bytes {
                Some(0) => {
                    return Err(LoadError::invalid(
                        "storage.quota_bytes",
                        "must be greater than zero",
                    ));
                }
                Some(bytes) => NonZeroU64::new(bytes),
                None => None,
            };
            Ok(StorageSettings::Memory { quota_bytes })
        }
        "disk" => {
            let directory = storage
                .directory
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
            if directory.as_os_str().is_empty() {
                return Err(LoadError::invalid(
                    "storage.directory",
                    "path must not be empty",
                ));
            }
            Ok(StorageSettings::Disk { directory })
        }
        other => Err(LoadError::invalid(
            "storage.backend",
            format!("unknown backend `{other}`; expected `memory` or `disk`"),
        )),
    }
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let raw_origin = upstream
        .origin
        .unwrap_or_else(|| DEFAULT_UPSTREAM_ORIGIN.to_string());
    let origin = Url::parse(raw_origin.trim())
        .map_err(|err| LoadError::invalid("upstream.origin", format!("failed to parse: {err}")))?;
    if !matches!(origin.scheme(), "http" | "https") || origin.host_str().is_none() {
        return Err(LoadError::invalid(
            "upstream.origin",
            "must be an http(s) URL with a host",
        ));
    }

    // Unset or 0 leaves upstream requests unbounded.
    let timeout = upstream
        .timeout_ms
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis);

    let body_limit_value = upstream
        .body_limit_bytes
        .unwrap_or(DEFAULT_BODY_LIMIT_BYTES);
    let body_limit_bytes = NonZeroU64::new(body_limit_value).ok_or_else(|| {
        LoadError::invalid("upstream.body_limit_bytes", "must be greater than zero")
    })?;
    usize::try_from(body_limit_value).map_err(|_| {
        LoadError::invalid(
            "upstream.body_limit_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(UpstreamSettings {
        origin,
        timeout,
        body_limit_bytes,
    })
}

fn build_sweeper_settings(sweeper: RawSweeperSettings) -> Result<SweeperSettings, LoadError> {
    let interval_seconds = sweeper
        .interval_seconds
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    if interval_seconds == 0 {
        return Err(LoadError::invalid(
            "sweeper.interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(SweeperSettings {
        enabled: sweeper.enabled.unwrap_or(true),
        interval: Duration::from_secs(interval_seconds),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    app_name: Option<String>,
    version: Option<String>,
    offline_path: Option<String>,
    api_host: Option<String>,
    expire_by_age: Option<bool>,
    static_manifest: Option<Vec<String>>,
    static_prefixes: Option<Vec<String>>,
    #[serde(rename = "static")]
    static_partition: RawPartitionPolicy,
    dynamic: RawPartitionPolicy,
    api: RawPartitionPolicy,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPartitionPolicy {
    max_age_ms: Option<u64>,
    max_entries: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    backend: Option<String>,
    directory: Option<PathBuf>,
    quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    origin: Option<String>,
    timeout_ms: Option<u64>,
    body_limit_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSweeperSettings {
    enabled: Option<bool>,
    interval_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
