use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the pwa-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "pwa-cache",
    version,
    about = "Offline-first caching proxy for the salon booking PWA"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PWA_CACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Install, activate and serve the caching proxy.
    Serve(Box<ServeArgs>),
    /// Open the partitions and precache the static manifest.
    Install(MaintenanceArgs),
    /// Delete partitions left behind by other versions.
    Activate(MaintenanceArgs),
    /// Trim the live partitions to their eviction policies.
    Sweep(MaintenanceArgs),
    /// Print the version, lifecycle state and partition sizes.
    Status(MaintenanceArgs),
}

impl Command {
    pub fn cache_overrides(&self) -> &CacheOverrides {
        match self {
            Command::Serve(args) => &args.overrides.cache,
            Command::Install(args)
            | Command::Activate(args)
            | Command::Sweep(args)
            | Command::Status(args) => &args.cache,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MaintenanceArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,
}

/// Overrides shared by every command that touches the cache.
#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the cache version tag.
    #[arg(long = "cache-version", value_name = "VERSION")]
    pub cache_version: Option<String>,

    /// Override the storage backend (memory|disk).
    #[arg(long = "storage-backend", value_name = "BACKEND")]
    pub storage_backend: Option<String>,

    /// Override the disk storage directory.
    #[arg(long = "storage-directory", value_name = "PATH")]
    pub storage_directory: Option<PathBuf>,

    /// Override the application origin requests are forwarded to.
    #[arg(long = "upstream-origin", value_name = "URL")]
    pub upstream_origin: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the upstream request timeout; 0 disables it.
    #[arg(long = "upstream-timeout-ms", value_name = "MS")]
    pub upstream_timeout_ms: Option<u64>,

    /// Override the periodic sweep interval.
    #[arg(long = "sweeper-interval-seconds", value_name = "SECONDS")]
    pub sweeper_interval_seconds: Option<u64>,
}
