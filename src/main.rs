use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use interpose::config::{Endpoint, ProxyConfig};
use interpose::core::Proxy;
use interpose::script::Passthrough;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the proxy configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address override (e.g. 127.0.0.1:5050)
    #[arg(long)]
    listen: Option<std::net::SocketAddr>,

    /// Upstream MySQL server override
    #[arg(long)]
    upstream: Option<std::net::SocketAddr>,
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ProxyConfig::load(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(addr) = args.listen {
        config.listen = Endpoint::Tcp { addr };
    }
    if let Some(addr) = args.upstream {
        config.upstream = Endpoint::Tcp { addr };
    }

    // The core is a single-threaded reactor; connections are not Send.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(serve(config)))
}

async fn serve(config: ProxyConfig) -> Result<()> {
    let proxy = Proxy::new(Passthrough::new(config.upstream.clone()));

    match &config.listen {
        Endpoint::Tcp { addr } => {
            let (_, local) = proxy.listen_tcp(*addr)?;
            info!("listening on {local}");
        }
        Endpoint::Unix { path, .. } => {
            proxy.listen_unix(path, config.listen.socket_mode()?)?;
            info!("listening on {}", path.display());
        }
    }
    match &config.upstream {
        Endpoint::Tcp { addr } => info!("forwarding to upstream at {addr}"),
        Endpoint::Unix { path, .. } => info!("forwarding to upstream at {}", path.display()),
    }

    std::future::pending::<()>().await;
    Ok(())
}
