use clap::Parser;
use httpstub::{
    Error, ListenerEvent, ListenerKind, MutualTlsSettings, StubServer, StubServerBuilder,
    TlsSettings, TlsSource, DEFAULT_TIMEOUT_MS,
};
use std::{path::PathBuf, process::ExitCode};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

/// Holds command line parameters provided by the user.
#[derive(Parser, Debug)]
#[command(version, about = "Standalone HTTP/HTTPS stub server for test automation")]
pub struct ExecutionArgs {
    /// Port of the administration API.
    #[arg(short, long, env = "HTTPSTUB_ADMIN_PORT")]
    pub admin_port: u16,

    /// Port of the plain HTTP server.
    #[arg(short, long, env = "HTTPSTUB_PORT")]
    pub port: Option<u16>,

    /// Port of the HTTPS server.
    #[arg(short = 's', long, env = "HTTPSTUB_HTTPS_PORT", requires = "key", requires = "cert")]
    pub https_port: Option<u16>,

    /// Port of the two-way SSL server, which requires client certificates.
    #[arg(
        short = 'm',
        long,
        env = "HTTPSTUB_TWO_WAY_SSL_PORT",
        requires = "key",
        requires = "cert",
        requires = "ca"
    )]
    pub two_way_ssl_port: Option<u16>,

    /// PEM file with the private key of the TLS servers.
    #[arg(short, long, env = "HTTPSTUB_KEY")]
    pub key: Option<PathBuf>,

    /// PEM file with the certificate chain of the TLS servers.
    #[arg(short, long, env = "HTTPSTUB_CERT")]
    pub cert: Option<PathBuf>,

    /// PEM file with the authority client certificates must be signed by.
    #[arg(short = 'w', long, env = "HTTPSTUB_CA")]
    pub ca: Option<PathBuf>,

    /// Idle timeout of data-plane connections in milliseconds. 0 disables it.
    #[arg(short, long, env = "HTTPSTUB_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout: u64,

    /// Listen on all interfaces instead of localhost only.
    #[arg(long, env = "HTTPSTUB_EXPOSE")]
    pub expose: bool,

    /// Maximum number of recorded requests to keep.
    #[arg(long, env = "HTTPSTUB_HISTORY_LIMIT")]
    pub history_limit: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("httpstub=info")),
        )
        .init();

    let args = ExecutionArgs::parse();

    tracing::info!(
        "Starting {} server V{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let server = build_server(args);
    let mut events = server.subscribe();

    if let Err(err) = server.start().await {
        tracing::error!("{}", err);
        return ExitCode::from(startup_exit_code(&err));
    }

    let exit_code = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received interrupt, shutting down");
            ExitCode::SUCCESS
        }
        kind = failed_listener(&mut events) => ExitCode::from(kind.exit_code()),
    };

    server.stop().await;
    exit_code
}

fn build_server(args: ExecutionArgs) -> StubServer {
    let https = match (args.https_port, &args.key, &args.cert) {
        (Some(port), Some(key), Some(cert)) => Some(TlsSettings {
            port,
            key: TlsSource::File(key.clone()),
            cert: TlsSource::File(cert.clone()),
        }),
        _ => None,
    };

    let two_way_ssl = match (args.two_way_ssl_port, &args.key, &args.cert, &args.ca) {
        (Some(port), Some(key), Some(cert), Some(ca)) => Some(MutualTlsSettings {
            port,
            key: TlsSource::File(key.clone()),
            cert: TlsSource::File(cert.clone()),
            ca: TlsSource::File(ca.clone()),
        }),
        _ => None,
    };

    StubServerBuilder::new()
        .admin_port(args.admin_port)
        .http_port_option(args.port)
        .https_option(https)
        .two_way_ssl_option(two_way_ssl)
        .timeout(args.timeout)
        .expose(args.expose)
        .history_limit_option(args.history_limit)
        .build()
}

/// Waits until a listener reports that it failed after startup.
async fn failed_listener(events: &mut broadcast::Receiver<ListenerEvent>) -> ListenerKind {
    loop {
        match events.recv().await {
            Ok(ListenerEvent::Failed { kind, error }) => {
                tracing::error!("{} server failed: {}", kind, error);
                return kind;
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return std::future::pending().await,
        }
    }
}

fn startup_exit_code(err: &Error) -> u8 {
    match err {
        Error::SocketBindError(kind, _, _) | Error::TlsConfigurationError(kind, _) => {
            kind.exit_code()
        }
        _ => 1,
    }
}
