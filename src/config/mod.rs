//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;


pub use cli::{
    CacheOverrides, CliArgs, Command, DatabaseOverride, ReapArgs, RegisterArgs, ServeArgs,
    ServeOverrides,
};

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::origin::OriginServer;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "edgecache";
const ENV_PREFIX: &str = "EDGECACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
const DEFAULT_REDIS_PORT: u16 = 6379;
const DEFAULT_MEMORY_CAPACITY: u64 = 10_000;
const DEFAULT_CACHE_DIR: &str = "./.cache";
const DEFAULT_SPILLOVER_THRESHOLD_BYTES: u64 = 100 * 1024;
const DEFAULT_TTL_SECS: u64 = 600;
const DEFAULT_LEASE_TTL_SECS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 3600;
const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ORIGIN_MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 2000;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub lock: LockSettings,
    pub reaper: ReaperSettings,
    pub origin: OriginSettings,
    pub registration: RegistrationSettings,
    /// Origins inserted into the registry at startup.
    pub origins: Vec<OriginServer>,
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

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Unset means the origin registry lives in memory.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Redis,
    Memory,
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown cache backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub redis: RedisSettings,
    pub memory_capacity: NonZeroUsize,
    pub directory: PathBuf,
    pub spillover_threshold_bytes: u64,
    pub default_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct LockSettings {
    pub lease_ttl: Duration,
    pub retry_attempts: NonZeroU32,
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct ReaperSettings {
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    pub request_timeout: Duration,
    pub max_body_bytes: NonZeroU64,
    pub max_image_dimension: NonZeroU32,
    pub minify: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RegistrationSettings {
    /// Unset rejects every HTTP registration.
    pub api_key: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("failed to resolve serve arguments from the environment: {0}")]
    Cli(#[from] clap::Error),
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
        Some(Command::Reap(args)) => raw.apply_cache_overrides(&args.cache),
        Some(Command::Register(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeArgs::from_env()?.overrides),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    lock: RawLockSettings,
    reaper: RawReaperSettings,
    origin: RawOriginSettings,
    registration: RawRegistrationSettings,
    origins: Vec<RawStaticOrigin>,
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
        if let Some(bytes) = overrides.spillover_threshold_bytes {
            self.cache.spillover_threshold_bytes = Some(bytes);
        }
        if let Some(seconds) = overrides.default_ttl_seconds {
            self.cache.default_ttl_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.lease_ttl_seconds {
            self.lock.lease_ttl_seconds = Some(seconds);
        }
        if let Some(attempts) = overrides.retry_attempts {
            self.lock.retry_attempts = Some(attempts);
        }
        if let Some(millis) = overrides.retry_backoff_ms {
            self.lock.retry_backoff_ms = Some(millis);
        }
        if let Some(seconds) = overrides.reaper_interval_seconds {
            self.reaper.interval_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.origin_request_timeout_seconds {
            self.origin.request_timeout_seconds = Some(seconds);
        }
        if let Some(pixels) = overrides.max_image_dimension {
            self.origin.max_image_dimension = Some(pixels);
        }
        if let Some(minify) = overrides.minify {
            self.origin.minify = Some(minify);
        }
        if let Some(key) = overrides.api_key.as_ref() {
            self.registration.api_key = Some(key.clone());
        }

        self.apply_database_override(&overrides.database);
        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(kind) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(kind.clone());
        }
        if let Some(host) = overrides.redis_host.as_ref() {
            self.cache.redis_host = Some(host.clone());
        }
        if let Some(port) = overrides.redis_port {
            self.cache.redis_port = Some(port);
        }
        if let Some(password) = overrides.redis_password.as_ref() {
            self.cache.redis_password = Some(password.clone());
        }
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            lock,
            reaper,
            origin,
            registration,
            origins,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache)?;
        let lock = build_lock_settings(lock)?;
        let reaper = build_reaper_settings(reaper)?;
        let origin = build_origin_settings(origin)?;
        let registration = build_registration_settings(registration);
        let origins = build_static_origins(origins)?;

        if origin.request_timeout >= lock.lease_ttl {
            return Err(LoadError::invalid(
                "origin.request_timeout_seconds",
                format!(
                    "must be shorter than lock.lease_ttl_seconds ({}s)",
                    lock.lease_ttl.as_secs()
                ),
            ));
        }

        Ok(Self {
            server,
            logging,
            database,
            cache,
            lock,
            reaper,
            origin,
            registration,
            origins,
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
    let graceful_shutdown = positive_duration_secs(
        graceful_secs,
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);

    let max_value = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = non_zero_u32(max_value.into(), "database.max_connections")?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref() {
        Some(kind) => CacheBackendKind::from_str(kind)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => CacheBackendKind::Redis,
    };

    let host = non_blank(cache.redis_host).unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string());
    let port = cache.redis_port.unwrap_or(DEFAULT_REDIS_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "cache.redis_port",
            "port must be greater than zero",
        ));
    }
    let redis = RedisSettings {
        host,
        port,
        password: non_blank(cache.redis_password),
    };

    let capacity_value = cache.memory_capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY);
    let capacity = usize::try_from(capacity_value).map_err(|_| {
        LoadError::invalid(
            "cache.memory_capacity",
            "value exceeds supported range for usize",
        )
    })?;
    let memory_capacity = NonZeroUsize::new(capacity)
        .ok_or_else(|| LoadError::invalid("cache.memory_capacity", "must be greater than zero"))?;

    let directory = cache
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.directory",
            "path must not be empty",
        ));
    }

    let spillover_threshold_bytes = cache
        .spillover_threshold_bytes
        .unwrap_or(DEFAULT_SPILLOVER_THRESHOLD_BYTES);

    let default_ttl = positive_duration_secs(
        cache.default_ttl_seconds.unwrap_or(DEFAULT_TTL_SECS),
        "cache.default_ttl_seconds",
    )?;

    Ok(CacheSettings {
        backend,
        redis,
        memory_capacity,
        directory,
        spillover_threshold_bytes,
        default_ttl,
    })
}

fn build_lock_settings(lock: RawLockSettings) -> Result<LockSettings, LoadError> {
    let lease_ttl = positive_duration_secs(
        lock.lease_ttl_seconds.unwrap_or(DEFAULT_LEASE_TTL_SECS),
        "lock.lease_ttl_seconds",
    )?;

    let attempts = lock.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS);
    let retry_attempts = non_zero_u32(attempts.into(), "lock.retry_attempts")?;

    let backoff_ms = lock.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS);
    if backoff_ms == 0 {
        return Err(LoadError::invalid(
            "lock.retry_backoff_ms",
            "must be greater than zero",
        ));
    }

    Ok(LockSettings {
        lease_ttl,
        retry_attempts,
        retry_backoff: Duration::from_millis(backoff_ms),
    })
}

fn build_reaper_settings(reaper: RawReaperSettings) -> Result<ReaperSettings, LoadError> {
    let interval = positive_duration_secs(
        reaper
            .interval_seconds
            .unwrap_or(DEFAULT_REAPER_INTERVAL_SECS),
        "reaper.interval_seconds",
    )?;
    Ok(ReaperSettings { interval })
}

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let request_timeout = positive_duration_secs(
        origin
            .request_timeout_seconds
            .unwrap_or(DEFAULT_ORIGIN_TIMEOUT_SECS),
        "origin.request_timeout_seconds",
    )?;

    let max_body_bytes = NonZeroU64::new(
        origin
            .max_body_bytes
            .unwrap_or(DEFAULT_ORIGIN_MAX_BODY_BYTES),
    )
    .ok_or_else(|| LoadError::invalid("origin.max_body_bytes", "must be greater than zero"))?;

    let dimension = origin
        .max_image_dimension
        .unwrap_or(DEFAULT_MAX_IMAGE_DIMENSION);
    let max_image_dimension = non_zero_u32(dimension.into(), "origin.max_image_dimension")?;

    Ok(OriginSettings {
        request_timeout,
        max_body_bytes,
        max_image_dimension,
        minify: origin.minify.unwrap_or(true),
    })
}

fn build_registration_settings(registration: RawRegistrationSettings) -> RegistrationSettings {
    RegistrationSettings {
        api_key: non_blank(registration.api_key),
    }
}

fn build_static_origins(origins: Vec<RawStaticOrigin>) -> Result<Vec<OriginServer>, LoadError> {
    origins
        .into_iter()
        .map(|origin| {
            OriginServer::parse(&origin.site_identifier, &origin.origin_url)
                .map_err(|err| LoadError::invalid("origins", err.to_string()))
        })
        .collect()
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
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_host: Option<String>,
    redis_port: Option<u16>,
    redis_password: Option<String>,
    memory_capacity: Option<u64>,
    directory: Option<PathBuf>,
    spillover_threshold_bytes: Option<u64>,
    default_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLockSettings {
    lease_ttl_seconds: Option<u64>,
    retry_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawReaperSettings {
    interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    request_timeout_seconds: Option<u64>,
    max_body_bytes: Option<u64>,
    max_image_dimension: Option<u32>,
    minify: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRegistrationSettings {
    api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawStaticOrigin {
    site_identifier: String,
    origin_url: String,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_duration_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
