use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the quire binary.
#[derive(Debug, Parser)]
#[command(
    name = "quire",
    version,
    about = "Content-addressed render cache for LaTeX document templates"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUIRE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP render service.
    Serve(Box<ServeArgs>),
    /// Render a single template offline through the cache.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Template identifier, resolved as `<templates-dir>/<TEMPLATE>.tex`.
    #[arg(value_name = "TEMPLATE")]
    pub template: String,

    /// JSON object used as the render context; `-` reads standard input.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub context: Option<PathBuf>,

    /// Copy the artifact to this path instead of printing its cache location.
    #[arg(long, short = 'o', value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the directory holding `<id>.tex` templates.
    #[arg(long = "render-templates-dir", value_name = "PATH")]
    pub templates_dir: Option<PathBuf>,

    /// Override the artifact cache directory.
    #[arg(long = "render-cache-dir", value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Override the artifact file extension.
    #[arg(long = "render-artifact-extension", value_name = "EXT")]
    pub artifact_extension: Option<String>,

    /// Override the document compiler executable.
    #[arg(long = "render-compiler-program", value_name = "PATH")]
    pub compiler_program: Option<PathBuf>,

    /// Replace the compiler arguments; repeat once per argument. `{output}`
    /// is substituted with the artifact path.
    #[arg(
        long = "render-compiler-arg",
        value_name = "ARG",
        allow_hyphen_values = true
    )]
    pub compiler_args: Option<Vec<String>>,

    /// Override the compiler timeout.
    #[arg(long = "render-compiler-timeout-seconds", value_name = "SECONDS")]
    pub compiler_timeout_seconds: Option<u64>,

    /// Override the leading bytes a compiled artifact must carry; empty disables the check.
    #[arg(long = "render-artifact-signature", value_name = "TEXT")]
    pub artifact_signature: Option<String>,

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
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub render: RenderOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the maximum accepted request body size in bytes.
    #[arg(long = "server-max-request-bytes", value_name = "BYTES")]
    pub server_max_request_bytes: Option<u64>,

    /// Replace the accepted shared secrets; repeat once per secret.
    #[arg(long = "auth-secret", value_name = "SECRET")]
    pub auth_secrets: Option<Vec<String>>,

    /// Replace the CORS origin allow-list; repeat once per origin.
    #[arg(long = "cors-origin", value_name = "ORIGIN")]
    pub cors_origins: Option<Vec<String>>,
}
