use clap::{Parser, Subcommand};
use exn::ResultExt;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::net::TcpListener;
use uade_config::Config;
use uade_fetch::{UrlGuard, sanitize_for_log};
use uade_web::{Components, ErrorKind, Result, logging, router};

/// Play Amiga music modules in the browser through UADE.
#[derive(Parser)]
#[command(name = "uade-web")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file; `UADE_*` variables override it.
    #[arg(short, long, env = "UADE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Run one retention sweep and exit
    Sweep,
    /// Report whether a URL would be fetched
    CheckUrl {
        url: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:?}");
            return ExitCode::FAILURE;
        },
    };
    logging::init(&config.log);

    let outcome = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Sweep => sweep(config).await,
        Command::CheckUrl { url } => return check_url(&url).await,
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "Exiting");
            ExitCode::FAILURE
        },
    }
}

async fn serve(config: Config) -> Result<()> {
    let address = format!("{}:{}", config.server.host, config.server.port);
    let interval = config.retention.interval();
    let Components {
        state,
        sweeper,
        database,
    } = Components::build(config).await?;

    let sweeper = match interval {
        Some(interval) => {
            tracing::info!(?interval, "Retention sweeper started");
            Some(sweeper.spawn(interval))
        },
        None => None,
    };

    let listener = TcpListener::bind(&address)
        .await
        .or_raise(|| ErrorKind::Bind(address.clone()))?;
    tracing::info!(%address, "Listening");
    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .or_raise(|| ErrorKind::Serve);

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    database.close().await;
    tracing::info!("Shut down");
    served
}

async fn sweep(config: Config) -> Result<()> {
    let Components {
        sweeper, database, ..
    } = Components::build(config).await?;
    let stats = sweeper.sweep().await;
    database.close().await;
    println!(
        "scanned {} deleted {} failed {}",
        stats.scanned, stats.deleted, stats.failed
    );
    Ok(())
}

async fn check_url(url: &str) -> ExitCode {
    match UrlGuard::default().validate(url).await {
        Ok(safe) => {
            println!("allowed: {}", sanitize_for_log(safe.url().as_str()));
            ExitCode::SUCCESS
        },
        Err(err) => {
            println!("refused: {}", *err);
            ExitCode::FAILURE
        },
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
