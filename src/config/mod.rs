//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{CliArgs, Command, RenderArgs, RenderOverrides, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quire";
const ENV_PREFIX: &str = "QUIRE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MAX_REQUEST_BYTES: u64 = 1024 * 1024;
const DEFAULT_TEMPLATES_DIR: &str = "templates";
const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_ARTIFACT_EXTENSION: &str = "pdf";
const DEFAULT_COMPILER_PROGRAM: &str = "pandoc";
pub(crate) const OUTPUT_PLACEHOLDER: &str = "{output}";
const DEFAULT_COMPILER_ARGS: [&str; 4] = ["--from=latex", "--to=pdf", "-o", OUTPUT_PLACEHOLDER];
const DEFAULT_COMPILER_TIMEOUT_SECS: u64 = 60;
const PDF_SIGNATURE: &str = "%PDF-";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub auth: AuthSettings,
    pub cors: CorsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub max_request_bytes: NonZeroU64,
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
pub struct RenderSettings {
    pub templates_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub artifact_extension: String,
    pub compiler: CompilerSettings,
}

/// How the external document compiler is invoked.
#[derive(Debug, Clone)]
pub struct CompilerSettings {
    pub program: PathBuf,
    /// Arguments passed verbatim except for `{output}`, which becomes the
    /// path the compiler must write.
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Leading bytes every artifact must start with; `None` disables the check.
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    pub secrets: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CorsSettings {
    pub origins: Vec<String>,
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

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("render.compiler_args")
            .with_list_parse_key("auth.secrets")
            .with_list_parse_key("cors.origins"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_render_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
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
    render: RawRenderSettings,
    auth: RawAuthSettings,
    cors: RawCorsSettings,
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
        if let Some(limit) = overrides.server_max_request_bytes {
            self.server.max_request_bytes = Some(limit);
        }
        if let Some(secrets) = overrides.auth_secrets.as_ref() {
            self.auth.secrets = Some(secrets.clone());
        }
        if let Some(origins) = overrides.cors_origins.as_ref() {
            self.cors.origins = Some(origins.clone());
        }

        self.apply_render_overrides(&overrides.render);
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(dir) = overrides.templates_dir.as_ref() {
            self.render.templates_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.cache_dir.as_ref() {
            self.render.cache_dir = Some(dir.clone());
        }
        if let Some(extension) = overrides.artifact_extension.as_ref() {
            self.render.artifact_extension = Some(extension.clone());
        }
        if let Some(program) = overrides.compiler_program.as_ref() {
            self.render.compiler_program = Some(program.clone());
        }
        if let Some(args) = overrides.compiler_args.as_ref() {
            self.render.compiler_args = Some(args.clone());
        }
        if let Some(seconds) = overrides.compiler_timeout_seconds {
            self.render.compiler_timeout_seconds = Some(seconds);
        }
        if let Some(signature) = overrides.artifact_signature.as_ref() {
            self.render.artifact_signature = Some(signature.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            render,
            auth,
            cors,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            render: build_render_settings(render)?,
            auth: build_auth_settings(auth)?,
            cors: build_cors_settings(cors)?,
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

    let max_request_bytes_value = server
        .max_request_bytes
        .unwrap_or(DEFAULT_MAX_REQUEST_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("server.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "server.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        max_request_bytes,
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

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let templates_dir = non_empty_path(
        render.templates_dir,
        DEFAULT_TEMPLATES_DIR,
        "render.templates_dir",
    )?;
    let cache_dir = non_empty_path(render.cache_dir, DEFAULT_CACHE_DIR, "render.cache_dir")?;

    let artifact_extension = render
        .artifact_extension
        .map(|value| value.trim().trim_start_matches('.').to_string())
        .unwrap_or_else(|| DEFAULT_ARTIFACT_EXTENSION.to_string());
    if artifact_extension.is_empty()
        || !artifact_extension
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric())
    {
        return Err(LoadError::invalid(
            "render.artifact_extension",
            "must be a non-empty alphanumeric extension",
        ));
    }

    let program = non_empty_path(
        render.compiler_program,
        DEFAULT_COMPILER_PROGRAM,
        "render.compiler_program",
    )?;

    let args = render
        .compiler_args
        .unwrap_or_else(|| DEFAULT_COMPILER_ARGS.iter().map(|arg| arg.to_string()).collect());
    if !args.iter().any(|arg| arg.contains(OUTPUT_PLACEHOLDER)) {
        return Err(LoadError::invalid(
            "render.compiler_args",
            format!("must contain the `{OUTPUT_PLACEHOLDER}` placeholder"),
        ));
    }

    let timeout_secs = render
        .compiler_timeout_seconds
        .unwrap_or(DEFAULT_COMPILER_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "render.compiler_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let signature = match render.artifact_signature {
        Some(value) if value.is_empty() => None,
        Some(value) => Some(value),
        None => default_signature_for(&artifact_extension).map(str::to_string),
    };

    Ok(RenderSettings {
        templates_dir,
        cache_dir,
        artifact_extension,
        compiler: CompilerSettings {
            program,
            args,
            timeout: Duration::from_secs(timeout_secs),
            signature,
        },
    })
}

/// Signature checked when none is configured; only PDF has a known one.
fn default_signature_for(extension: &str) -> Option<&'static str> {
    extension
        .eq_ignore_ascii_case(DEFAULT_ARTIFACT_EXTENSION)
        .then_some(PDF_SIGNATURE)
}

fn build_auth_settings(auth: RawAuthSettings) -> Result<AuthSettings, LoadError> {
    let secrets = auth.secrets.unwrap_or_default();
    if secrets.iter().any(|secret| secret.is_empty()) {
        return Err(LoadError::invalid(
            "auth.secrets",
            "secrets must not be empty strings",
        ));
    }
    Ok(AuthSettings { secrets })
}

fn build_cors_settings(cors: RawCorsSettings) -> Result<CorsSettings, LoadError> {
    let origins: Vec<String> = cors
        .origins
        .unwrap_or_default()
        .into_iter()
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect();

    for origin in &origins {
        if axum::http::HeaderValue::from_str(origin).is_err() {
            return Err(LoadError::invalid(
                "cors.origins",
                format!("`{origin}` is not a valid header value"),
            ));
        }
    }

    Ok(CorsSettings { origins })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    templates_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    artifact_extension: Option<String>,
    compiler_program: Option<PathBuf>,
    compiler_args: Option<Vec<String>>,
    compiler_timeout_seconds: Option<u64>,
    artifact_signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    secrets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCorsSettings {
    origins: Option<Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
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
