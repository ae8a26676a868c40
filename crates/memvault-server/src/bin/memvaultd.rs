use std::io;
use std::process::ExitCode;

use memvault_server::{ServerConfig, ServerContext};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = ServerConfig::from_env();
    let ctx = match ServerContext::bootstrap(config).await {
        Ok(ctx) => ctx,
        Err(err) => {
            error!(error = %err, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    let sessions = ctx.sessions();
    let session_id = sessions.next_session_id();
    let session_open = match sessions.start_session(&session_id).await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "running without a session record");
            false
        }
    };

    info!(collection = %ctx.collection().name, "memvaultd ready");
    if let Err(err) = wait_for_shutdown_signal().await {
        error!(error = %err, "signal handler failed");
    }
    info!("shutting down");

    if session_open {
        match sessions.end_session(&session_id).await {
            Ok(record) => info!(summary = %record.summary, "session persisted"),
            Err(err) => warn!(session_id = %session_id, error = %err, "session left open"),
        }
    }
    ExitCode::SUCCESS
}

async fn wait_for_shutdown_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
