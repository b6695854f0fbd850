//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::types::AppMode;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pagina";
const ENV_PREFIX: &str = "PAGINA";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_REPOSITORY_ID: &str = "site";
const DEFAULT_BRANCH_ID: &str = "master";
const DEFAULT_PAGE_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_PRELOAD_FLAG_TTL_SECS: u64 = 30;
const DEFAULT_PRELOAD_WAIT_MS: u64 = 500;
const DEFAULT_PRELOAD_DEADLINE_MS: u64 = 30_000;
const DEFAULT_CONTENT_DIR: &str = "content";
const DEFAULT_ARTIFACT_DIR: &str = "var/artifacts";
const DEFAULT_WEB_DIR: &str = "web";

/// Command-line arguments for the pagina binary.
#[derive(Debug, Parser)]
#[command(name = "pagina", version, about = "Pattern-routed page server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PAGINA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Print the page that would serve a path.
    Resolve(ResolveArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ResolveArgs {
    /// Request path to resolve, e.g. `/blog/first-post`.
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Host the request is scoped to.
    #[arg(long, default_value = "localhost", value_name = "HOST")]
    pub host: String,

    #[command(flatten)]
    pub wcm: WcmOverrides,

    #[command(flatten)]
    pub storage: StorageOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WcmOverrides {
    /// Override the deployment mode (development|production).
    #[arg(long = "wcm-mode", value_name = "MODE")]
    pub wcm_mode: Option<String>,

    /// Toggle the render cache.
    #[arg(
        long = "wcm-cache",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub wcm_cache: Option<bool>,

    /// Override the repository pages are read from.
    #[arg(long = "wcm-repository", value_name = "ID")]
    pub wcm_repository: Option<String>,

    /// Override the branch pages are read from.
    #[arg(long = "wcm-branch", value_name = "ID")]
    pub wcm_branch: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the content records directory.
    #[arg(long = "storage-content-dir", value_name = "PATH")]
    pub content_dir: Option<PathBuf>,

    /// Override the rendered artifact directory.
    #[arg(long = "storage-artifact-dir", value_name = "PATH")]
    pub artifact_dir: Option<PathBuf>,

    /// Override the template directory.
    #[arg(long = "storage-web-dir", value_name = "PATH")]
    pub web_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
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

    #[command(flatten)]
    pub wcm: WcmOverrides,

    #[command(flatten)]
    pub storage: StorageOverrides,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub wcm: WcmSettings,
    pub storage: StorageSettings,
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
pub struct WcmSettings {
    pub enabled: bool,
    pub cache: bool,
    pub force_page_cache: bool,
    pub mode: AppMode,
    pub repository_id: String,
    pub branch_id: String,
    pub directory_ttl_seconds: Option<u64>,
    /// Lifetime of a cached render.
    pub page_ttl_seconds: NonZeroU64,
    pub preload_flag_ttl_seconds: NonZeroU64,
    pub preload_wait_ms: NonZeroU64,
    pub preload_deadline_ms: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub content_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub web_dir: PathBuf,
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
        Some(Command::Resolve(args)) => {
            raw.apply_wcm_overrides(&args.wcm);
            raw.apply_storage_overrides(&args.storage);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    wcm: RawWcmSettings,
    storage: RawStorageSettings,
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

        self.apply_wcm_overrides(&overrides.wcm);
        self.apply_storage_overrides(&overrides.storage);
    }

    fn apply_wcm_overrides(&mut self, overrides: &WcmOverrides) {
        if let Some(mode) = overrides.wcm_mode.as_ref() {
            self.wcm.mode = Some(mode.clone());
        }
        if let Some(cache) = overrides.wcm_cache {
            self.wcm.cache = Some(cache);
        }
        if let Some(repository) = overrides.wcm_repository.as_ref() {
            self.wcm.repository_id = Some(repository.clone());
        }
        if let Some(branch) = overrides.wcm_branch.as_ref() {
            self.wcm.branch_id = Some(branch.clone());
        }
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        if let Some(dir) = overrides.content_dir.as_ref() {
            self.storage.content_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.artifact_dir.as_ref() {
            self.storage.artifact_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.web_dir.as_ref() {
            self.storage.web_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            wcm,
            storage,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            wcm: build_wcm_settings(wcm)?,
            storage: build_storage_settings(storage)?,
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

fn build_wcm_settings(wcm: RawWcmSettings) -> Result<WcmSettings, LoadError> {
    let mode = match wcm.mode {
        Some(mode) => AppMode::from_str(&mode)
            .map_err(|err| LoadError::invalid("wcm.mode", err.to_string()))?,
        None => AppMode::default(),
    };

    let repository_id = non_empty(wcm.repository_id, DEFAULT_REPOSITORY_ID, "wcm.repository_id")?;
    let branch_id = non_empty(wcm.branch_id, DEFAULT_BRANCH_ID, "wcm.branch_id")?;

    if wcm.directory_ttl_seconds == Some(0) {
        return Err(LoadError::invalid(
            "wcm.directory_ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(WcmSettings {
        enabled: wcm.enabled.unwrap_or(true),
        cache: wcm.cache.unwrap_or(false),
        force_page_cache: wcm.force_page_cache.unwrap_or(false),
        mode,
        repository_id,
        branch_id,
        directory_ttl_seconds: wcm.directory_ttl_seconds,
        page_ttl_seconds: non_zero_u64(
            wcm.page_ttl_seconds.unwrap_or(DEFAULT_PAGE_TTL_SECS),
            "wcm.page_ttl_seconds",
        )?,
        preload_flag_ttl_seconds: non_zero_u64(
            wcm.preload_flag_ttl_seconds
                .unwrap_or(DEFAULT_PRELOAD_FLAG_TTL_SECS),
            "wcm.preload_flag_ttl_seconds",
        )?,
        preload_wait_ms: non_zero_u64(
            wcm.preload_wait_ms.unwrap_or(DEFAULT_PRELOAD_WAIT_MS),
            "wcm.preload_wait_ms",
        )?,
        preload_deadline_ms: non_zero_u64(
            wcm.preload_deadline_ms
                .unwrap_or(DEFAULT_PRELOAD_DEADLINE_MS),
            "wcm.preload_deadline_ms",
        )?,
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let content_dir = non_empty_path(storage.content_dir, DEFAULT_CONTENT_DIR, "storage.content_dir")?;
    let artifact_dir = non_empty_path(
        storage.artifact_dir,
        DEFAULT_ARTIFACT_DIR,
        "storage.artifact_dir",
    )?;
    let web_dir = non_empty_path(storage.web_dir, DEFAULT_WEB_DIR, "storage.web_dir")?;

    Ok(StorageSettings {
        content_dir,
        artifact_dir,
        web_dir,
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
struct RawWcmSettings {
    enabled: Option<bool>,
    cache: Option<bool>,
    force_page_cache: Option<bool>,
    mode: Option<String>,
    repository_id: Option<String>,
    branch_id: Option<String>,
    directory_ttl_seconds: Option<u64>,
    page_ttl_seconds: Option<u64>,
    preload_flag_ttl_seconds: Option<u64>,
    preload_wait_ms: Option<u64>,
    preload_deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    content_dir: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
    web_dir: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_empty(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    let value = value.unwrap_or_else(|| default.to_string());
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
