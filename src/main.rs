//! Stubby - CLI Entry Point

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use stubby::{validate_endpoints, EndpointSource, FileEndpointSource, ReloadPolicy, StubServer};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "stubby",
    about = "Configurable HTTP stub server - request matching and templated responses",
    version
)]
struct Args {
    /// Host address to bind to (use 0.0.0.0 for Docker)
    #[arg(short = 'H', long, env = "STUBBY_HOST", default_value = "localhost")]
    host: String,

    /// HTTP port number to listen on
    #[arg(short, long, env = "STUBBY_PORT", default_value_t = 8080)]
    port: u16,

    /// HTTPS port number to listen on
    #[arg(short = 's', long, env = "STUBBY_HTTPS_PORT", default_value_t = 8443)]
    https_port: u16,

    /// Path to TLS certificate file (PEM)
    #[arg(short = 't', long, env = "STUBBY_CERT", requires = "key")]
    cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM)
    #[arg(short = 'k', long, env = "STUBBY_KEY", requires = "cert")]
    key: Option<PathBuf>,

    /// Path to configuration directory or file
    #[arg(short, long, env = "STUBBY_CONFIG", default_value = "configs")]
    config: PathBuf,

    /// When to re-read configuration (every-request, on-change)
    #[arg(long, env = "STUBBY_RELOAD", default_value = "every-request")]
    reload: ReloadPolicy,

    /// Largest request body accepted, in bytes
    #[arg(long, default_value_t = stubby::DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print an example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let example = include_str!("../configs/example.json");
        println!("{}", example);
        return Ok(());
    }

    let source = FileEndpointSource::new(&args.config);

    if args.validate {
        let endpoints = source
            .load()
            .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
        validate_endpoints(&endpoints)?;
        println!(
            "Configuration is valid ({} endpoints defined)",
            endpoints.len()
        );
        return Ok(());
    }

    // Configuration is read lazily per request; a broken config only
    // produces 404s, so just report it at startup.
    match source.load() {
        Ok(endpoints) => {
            info!(path = ?args.config, endpoints = endpoints.len(), "Loaded configuration")
        }
        Err(e) => error!(path = ?args.config, error = %e, "Failed to load configuration"),
    }

    let app = StubServer::new(source)
        .with_reload(args.reload)
        .with_max_body_bytes(args.max_body_bytes)
        .into_router();

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    let http_addr = resolve(&args.host, args.port).await?;
    info!("HTTP server is running at http://{}:{}", args.host, args.port);
    let http = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(app.clone().into_make_service());

    match (&args.cert, &args.key) {
        (Some(cert), Some(key)) => {
            let tls = RustlsConfig::from_pem_file(cert, key)
                .await
                .with_context(|| format!("Failed to load TLS certificate {:?}", cert))?;
            let https_addr = resolve(&args.host, args.https_port).await?;
            info!(
                "HTTPS server is running at https://{}:{}",
                args.host, args.https_port
            );
            let https = axum_server::bind_rustls(https_addr, tls)
                .handle(handle)
                .serve(app.into_make_service());

            let (http, https) = tokio::join!(http, https);
            http.context("HTTP server failed")?;
            https.context("HTTPS server failed")?;
        }
        _ => http.await.context("HTTP server failed")?,
    }

    info!("Server stopped");
    Ok(())
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve {}:{}", host, port))?
        .next()
        .with_context(|| format!("No address found for {}", host))
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}
