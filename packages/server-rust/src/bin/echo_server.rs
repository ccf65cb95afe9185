//! Standalone SOAP endpoint with a single `echo` service, for trying
//! clients against a live server.

use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use xroad_core::RawBody;
use xroad_server::{
    init_tracing, Dispatcher, DispatcherConfig, LogFormat, NetworkConfig, NetworkModule,
    ServiceRouter, SoapRequest,
};

#[derive(Parser, Debug)]
#[command(name = "echo-server")]
#[command(about = "Serve an echo service over SOAP")]
#[command(version)]
struct Cli {
    /// Bind address.
    #[arg(long, env = "XROAD_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on; 0 picks a free one.
    #[arg(short, long, env = "XROAD_PORT", default_value_t = 8080)]
    port: u16,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Dump every response envelope at debug level instead of logging headers.
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(if cli.json { LogFormat::Json } else { LogFormat::Pretty })?;

    let mut router = ServiceRouter::new();
    router.handle_fn("echo", |req: SoapRequest<RawBody>| async move {
        let body = req.body().clone();
        Ok(req.reply(body))
    });
    let dispatcher = Dispatcher::new(
        router,
        DispatcherConfig {
            verbose: cli.verbose,
            ..DispatcherConfig::default()
        },
    );

    let config = NetworkConfig {
        host: cli.host,
        port: cli.port,
        request_timeout: Duration::from_secs(cli.timeout_secs),
        ..NetworkConfig::default()
    };
    let mut module = NetworkModule::new(config, dispatcher);
    let port = module.start().await?;
    info!(port, "echo server ready");

    module.serve(shutdown_signal()).await?;
    info!("echo server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
