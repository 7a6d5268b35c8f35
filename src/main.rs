use std::{
    future::IntoFuture,
    io::{self, Write},
    process,
    sync::Arc,
};

use axum::http::HeaderValue;
use quire::{
    application::{
        error::AppError,
        render::{RenderOutcome, RenderPipeline, RenderService},
    },
    config::{self, RenderArgs, Settings},
    domain::types::RenderRequest,
    infra::{
        artifacts::FsArtifactStore,
        compiler::ProcessCompiler,
        engine::LatexTemplateEngine,
        error::InfraError,
        http::{self, HttpState, RouterOptions, SharedSecrets},
        telemetry,
        templates::FsTemplateResolver,
    },
};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

fn build_render_service(settings: &Settings) -> Result<Arc<RenderService>, AppError> {
    let render = &settings.render;

    let store = FsArtifactStore::open(&render.cache_dir, render.artifact_extension.as_str())?;
    let resolver = FsTemplateResolver::new(&render.templates_dir);
    if !render.templates_dir.is_dir() {
        warn!(
            target = "quire::startup",
            templates_dir = %render.templates_dir.display(),
            "Template directory does not exist; every render will report not found"
        );
    }
    let engine = LatexTemplateEngine::new(Some(render.templates_dir.clone()))?;
    let compiler = ProcessCompiler::from_settings(&render.compiler, &render.artifact_extension);

    info!(
        target = "quire::startup",
        templates_dir = %render.templates_dir.display(),
        cache_dir = %store.root().display(),
        compiler = %render.compiler.program.display(),
        compiler_timeout_secs = render.compiler.timeout.as_secs(),
        "Render pipeline ready"
    );

    let pipeline = RenderPipeline::new(
        Arc::new(resolver),
        Arc::new(engine),
        Arc::new(compiler),
        Arc::new(store),
    );
    Ok(Arc::new(RenderService::new(pipeline)))
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let service = build_render_service(&settings)?;

    let secrets = SharedSecrets::new(settings.auth.secrets.iter().cloned());
    if secrets.is_empty() {
        warn!(
            target = "quire::startup",
            "No shared secrets configured; every render request will be rejected"
        );
    }

    let state = HttpState::new(service, secrets, &settings.render.artifact_extension);
    let cors_origins = settings
        .cors
        .origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|err| {
                AppError::from(InfraError::configuration(format!(
                    "invalid CORS origin `{origin}`: {err}"
                )))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let max_request_bytes = usize::try_from(settings.server.max_request_bytes.get())
        .map_err(|_| AppError::from(InfraError::configuration("request limit exceeds usize")))?;

    let router = http::build_router(
        state,
        RouterOptions {
            max_request_bytes,
            cors_origins,
        },
    );

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "quire::startup",
        addr = %settings.server.addr,
        "Listening for render requests"
    );

    let (stopping_tx, mut stopping_rx) = tokio::sync::watch::channel(false);
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stopping_tx.send(true);
        })
        .into_future();

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        if stopping_rx.wait_for(|stopping| *stopping).await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
            info!(target = "quire::shutdown", "Server stopped");
        }
        _ = deadline => {
            warn!(
                target = "quire::shutdown",
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "quire::shutdown", error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target = "quire::shutdown", error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!(target = "quire::shutdown", "Shutdown signal received");
}

async fn run_render(settings: Settings, args: RenderArgs) -> Result<(), AppError> {
    let service = build_render_service(&settings)?;

    let context = read_context(&args).await?;
    let request = RenderRequest::from_json(args.template.as_str(), context)?;
    let template = request.template_id.to_string();

    match service.handle(request.template_id, request.context).await {
        RenderOutcome::Artifact(artifact) => {
            let printed = match args.output.as_ref() {
                Some(output) => {
                    tokio::fs::copy(artifact.path(), output)
                        .await
                        .map_err(|err| AppError::from(InfraError::from(err)))?;
                    output.clone()
                }
                None => artifact.path().to_path_buf(),
            };
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", printed.display())
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            Ok(())
        }
        RenderOutcome::TemplateNotFound => Err(AppError::TemplateNotFound(template)),
        RenderOutcome::RenderFailed(error) => Err(error.into()),
    }
}

async fn read_context(args: &RenderArgs) -> Result<Value, AppError> {
    let raw = match args.context.as_deref() {
        None => return Ok(Value::Object(Default::default())),
        Some(path) if path.as_os_str() == "-" => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            buf
        }
        Some(path) => tokio::fs::read(path)
            .await
            .map_err(|err| AppError::from(InfraError::from(err)))?,
    };

    serde_json::from_slice(&raw)
        .map_err(|err| AppError::validation(format!("render context is not valid JSON: {err}")))
}
