#![forbid(unsafe_code)]

//! `build-session`: drives a build tool session from the command line.
//!
//! Loads the configuration, starts the tool in session mode, runs one
//! operation (or keeps the session open in `watch` mode), and exits with
//! status 1 when the operation fails.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use build_session::channel::spawner::ProcessLauncher;
use build_session::config::{GlobalConfig, SharedConfig};
use build_session::config_watcher::{ChangeCallback, ChangeKind, ConfigWatcher};
use build_session::models::operation::{OperationNotice, OperationOutcome};
use build_session::orchestrator::auto_resolve::AutoResolveDebouncer;
use build_session::orchestrator::operations::Orchestrator;
use build_session::orchestrator::session::Session;
use build_session::sink::{DiagnosticsSink, FanoutSink, JsonlBuildLog, TracingSink};
use build_session::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "build-session", about = "Build tool session driver", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve the project.
    Resolve,
    /// Resolve, then build the given products (default: configured products).
    Build {
        /// Products to build.
        products: Vec<String>,
    },
    /// Resolve, then clean.
    Clean,
    /// Resolve, then install.
    Install,
    /// Resolve, then clean and build.
    Rebuild,
    /// Resolve, then compile only the given files.
    Compile {
        /// Files to compile.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Resolve, then print the run environment of a product.
    RunEnv {
        /// Product to query (default: first configured product).
        product: Option<String>,
    },
    /// Keep the session open and auto-resolve on changes until interrupted.
    Watch,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(%err, "build-session failed");
            ExitCode::FAILURE
        }
    }
}

struct App {
    config: SharedConfig,
    session: Arc<Session>,
    orchestrator: Arc<Orchestrator>,
}

fn bootstrap(config_path: &std::path::Path) -> Result<App> {
    let config_path = config_path
        .canonicalize()
        .map_err(|err| AppError::Config(format!("cannot read config: {err}")))?;
    let config = GlobalConfig::load_from_path(&config_path)?;
    info!(path = %config_path.display(), "configuration loaded");

    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    if let Some(log_dir) = &config.log_dir {
        sink = sink.with(Arc::new(JsonlBuildLog::new(log_dir.clone())?));
        info!(dir = %log_dir.display(), "build log enabled");
    }
    let sink: Arc<dyn DiagnosticsSink> = Arc::new(sink);

    let working_dir = config
        .project_file
        .as_deref()
        .and_then(std::path::Path::parent)
        .map(std::path::Path::to_path_buf);
    let launcher = Arc::new(ProcessLauncher::new(config.executable.clone(), working_dir));

    let session = Arc::new(
        Session::new(launcher, Arc::clone(&sink)).with_startup_timeout(config.startup_timeout()),
    );
    let linger = config.linger_delays();
    let shared = SharedConfig::new(config);
    let orchestrator = Arc::new(
        Orchestrator::new(Arc::clone(&session), Arc::new(shared.clone()), sink)
            .with_linger(linger),
    );

    Ok(App {
        config: shared,
        session,
        orchestrator,
    })
}

async fn run(args: Cli) -> Result<bool> {
    let app = bootstrap(&args.config)?;

    if !app.session.start()? {
        return Err(AppError::Config("no build tool executable configured".into()));
    }
    app.session.wait_until_started().await?;
    if let Some(hello) = app.session.hello() {
        info!(api_level = hello.api_level, "build tool session ready");
    }

    let notices = tokio::spawn(log_notices(app.orchestrator.subscribe_notices()));

    let success = match args.command {
        Command::Watch => watch(&args.config, &app).await?,
        command => run_command(&app, command).await,
    };

    app.session.stop();
    app.session.wait_until_stopped().await;
    notices.abort();
    Ok(success)
}

async fn run_command(app: &App, command: Command) -> bool {
    let orchestrator = &app.orchestrator;

    let resolved = orchestrator.resolve().await;
    report(&resolved);
    if !resolved.success || matches!(command, Command::Resolve) {
        return resolved.success;
    }

    let outcome = match command {
        Command::Build { products } => {
            orchestrator
                .build((!products.is_empty()).then_some(products))
                .await
        }
        Command::Clean => orchestrator.clean().await,
        Command::Install => orchestrator.install().await,
        Command::Rebuild => orchestrator.rebuild().await,
        Command::Compile { files } => orchestrator.compile_only(files).await,
        Command::RunEnv { product } => {
            let Some(product) = product.or_else(|| app.config.current().products.first().cloned())
            else {
                error!("no product given and none configured");
                return false;
            };
            return match orchestrator.run_environment(&product).await {
                Ok(env) => {
                    for (key, value) in &env.full_environment {
                        println!("{key}={value}");
                    }
                    true
                }
                Err(err) => {
                    error!(%err, %product, "run environment query failed");
                    false
                }
            };
        }
        Command::Resolve | Command::Watch => return true,
    };
    report(&outcome);
    outcome.success
}

async fn watch(config_path: &std::path::Path, app: &App) -> Result<bool> {
    let ct = CancellationToken::new();
    let current = app.config.current();

    let debouncer = current.auto_resolve.enabled.then(|| {
        AutoResolveDebouncer::new(
            Arc::clone(&app.orchestrator),
            current.auto_resolve_delay(),
            ct.clone(),
        )
        .spawn()
    });
    let debouncer = debouncer.map(Arc::new);

    let on_change: ChangeCallback = match &debouncer {
        Some(handle) => {
            let handle = Arc::clone(handle);
            Arc::new(move |kind: ChangeKind| {
                info!(?kind, "change detected");
                handle.trigger();
            })
        }
        None => Arc::new(|kind: ChangeKind| info!(?kind, "change detected; auto-resolve disabled")),
    };
    let _watcher = ConfigWatcher::new(config_path, app.config.clone(), on_change)?;

    if let Some(handle) = &debouncer {
        handle.trigger();
    }
    info!("watching for changes; press Ctrl-C to stop");

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();
    let cancelled = app.orchestrator.cancel();
    info!(message = %cancelled.message, "in-flight operation released");
    Ok(true)
}

fn report(outcome: &OperationOutcome) {
    if outcome.success {
        info!("{}", outcome.message);
    } else {
        warn!("{}", outcome.message);
    }
}

async fn log_notices(mut rx: tokio::sync::broadcast::Receiver<OperationNotice>) {
    loop {
        match rx.recv().await {
            Ok(OperationNotice::Started { kind }) => info!(operation = %kind, "started"),
            Ok(OperationNotice::Progress {
                kind,
                percentage,
                description,
                ..
            }) => info!(operation = %kind, percentage, %description, "progress"),
            Ok(OperationNotice::Completed {
                kind,
                success,
                elapsed,
                ..
            }) => info!(
                operation = %kind,
                success,
                elapsed_ms = elapsed.as_millis(),
                "completed"
            ),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "notice log fell behind");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
