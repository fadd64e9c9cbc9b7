use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the edgecache binary.
#[derive(Debug, Parser)]
#[command(name = "edgecache", version, about = "Edge-caching reverse proxy")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "EDGECACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the proxy HTTP service and the cache reaper.
    Serve(Box<ServeArgs>),
    /// Run one cache reaper sweep and exit.
    Reap(ReapArgs),
    /// Register an origin server for a site identifier.
    Register(RegisterArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Cache backend (`redis` or `memory`).
    #[arg(long = "cache-backend", value_name = "KIND")]
    pub cache_backend: Option<String>,

    /// Override the redis host.
    #[arg(long = "redis-host", env = "REDIS_HOST", value_name = "HOST")]
    pub redis_host: Option<String>,

    /// Override the redis port.
    #[arg(long = "redis-port", env = "REDIS_PORT", value_name = "PORT")]
    pub redis_port: Option<u16>,

    /// Override the redis password.
    #[arg(
        long = "redis-password",
        env = "REDIS_PASSWORD",
        value_name = "PASSWORD",
        hide_env_values = true
    )]
    pub redis_password: Option<String>,

    /// Override the directory holding spilled cache payloads.
    #[arg(long = "cache-directory", value_name = "PATH")]
    pub cache_directory: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

impl ServeArgs {
    /// Resolve serve arguments without a subcommand on the command line, so the
    /// env-backed flags (`APP_PORT`, `API_KEY`, `REDIS_*`) still apply.
    pub fn from_env() -> Result<Self, clap::Error> {
        #[derive(Parser)]
        #[command(name = "edgecache")]
        struct EnvOnly {
            #[command(flatten)]
            serve: ServeArgs,
        }

        EnvOnly::try_parse_from(["edgecache"]).map(|parsed| parsed.serve)
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", env = "APP_PORT", value_name = "PORT")]
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

    /// Override the inline/disk spillover threshold.
    #[arg(long = "cache-spillover-threshold-bytes", value_name = "BYTES")]
    pub spillover_threshold_bytes: Option<u64>,

    /// Override the lifetime of cached entries.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS")]
    pub default_ttl_seconds: Option<u64>,

    /// Override the stampede lease lifetime.
    #[arg(long = "lock-lease-ttl-seconds", value_name = "SECONDS")]
    pub lease_ttl_seconds: Option<u64>,

    /// Override how often a waiting request re-checks the cache.
    #[arg(long = "lock-retry-attempts", value_name = "COUNT")]
    pub retry_attempts: Option<u32>,

    /// Override the pause between cache re-checks.
    #[arg(long = "lock-retry-backoff-ms", value_name = "MILLIS")]
    pub retry_backoff_ms: Option<u64>,

    /// Override the cache reaper interval.
    #[arg(long = "reaper-interval-seconds", value_name = "SECONDS")]
    pub reaper_interval_seconds: Option<u64>,

    /// Override the origin request timeout.
    #[arg(long = "origin-request-timeout-seconds", value_name = "SECONDS")]
    pub origin_request_timeout_seconds: Option<u64>,

    /// Override the largest accepted resize dimension.
    #[arg(long = "origin-max-image-dimension", value_name = "PIXELS")]
    pub max_image_dimension: Option<u32>,

    /// Toggle CSS/JavaScript minification.
    #[arg(
        long = "origin-minify",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub minify: Option<bool>,

    /// Override the registration API key.
    #[arg(
        long = "registration-api-key",
        env = "API_KEY",
        value_name = "KEY",
        hide_env_values = true
    )]
    pub api_key: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ReapArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Site identifier requests are routed by.
    #[arg(long = "site", value_name = "ID")]
    pub site: String,

    /// Base URL of the origin server.
    #[arg(long = "origin", value_name = "URL")]
    pub origin: String,
}
