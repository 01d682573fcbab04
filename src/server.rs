use std::{fs, path::PathBuf};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use kvmux::{
    start_quic_server, start_yamux_server, MemTable, QuicServerAcceptor, ServerHandle, SledDb,
    Storage, TlsServerAcceptor,
};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// kvmux server
#[derive(Parser, Debug)]
#[command(name = "kvs")]
#[command(about = "Multiplexed key-value and pub/sub server")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:9527")]
    addr: String,

    /// Transport to serve
    #[arg(short, long, value_enum, default_value = "yamux")]
    transport: Transport,

    /// Storage backend
    #[arg(short, long, value_enum, default_value = "memory")]
    storage: StorageKind,

    /// Data directory for the sled backend
    #[arg(long, default_value = "/tmp/kvmux/sled")]
    sled_path: PathBuf,

    /// CA certificate verifying client certificates (PEM file)
    #[arg(long)]
    ca: PathBuf,

    /// Server certificate (PEM file)
    #[arg(long)]
    cert: PathBuf,

    /// Server private key (PEM file)
    #[arg(long)]
    key: PathBuf,
}

#[derive(Clone, Debug, ValueEnum)]
enum Transport {
    /// yamux streams over TLS/TCP
    Yamux,
    /// QUIC bidirectional streams
    Quic,
}

#[derive(Clone, Debug, ValueEnum)]
enum StorageKind {
    Memory,
    Sled,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let ca = fs::read_to_string(&args.ca)?;
    let cert = fs::read_to_string(&args.cert)?;
    let key = fs::read_to_string(&args.key)?;

    match args.storage {
        StorageKind::Memory => serve(&args, MemTable::new(), &ca, &cert, &key).await,
        StorageKind::Sled => serve(&args, SledDb::new(&args.sled_path)?, &ca, &cert, &key).await,
    }
}

async fn serve<Store: Storage>(
    args: &Args,
    store: Store,
    ca: &str,
    cert: &str,
    key: &str,
) -> Result<()> {
    match args.transport {
        Transport::Yamux => {
            let acceptor = TlsServerAcceptor::new(cert, key, Some(ca))?;
            let handle = start_yamux_server(&args.addr, acceptor, store).await?;
            wait_for_shutdown(handle).await
        }
        Transport::Quic => {
            let acceptor = QuicServerAcceptor::new(cert, key, Some(ca))?;
            let handle = start_quic_server(args.addr.parse()?, acceptor, store).await?;
            wait_for_shutdown(handle).await
        }
    }
}

async fn wait_for_shutdown<Store: Storage>(handle: ServerHandle<Store>) -> Result<()> {
    info!("Serving at {}", handle.local_addr());
    signal::ctrl_c().await?;
    info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
