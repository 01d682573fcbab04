use std::{fs, net::SocketAddr, path::PathBuf};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use futures::StreamExt;
use kvmux::{
    Client, CommandRequest, QuicClientConnector, Session, TlsClientConnector, YamuxCtrl,
};
use tokio::net::TcpStream;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// kvmux demo client: one hset/hget round trip, then a subscription fed by a
/// publish and closed by an unsubscribe.
#[derive(Parser, Debug)]
#[command(name = "kvc")]
#[command(about = "Multiplexed key-value and pub/sub client")]
#[command(version)]
struct Args {
    /// Server address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:9527")]
    addr: String,

    /// Transport to use
    #[arg(short, long, value_enum, default_value = "yamux")]
    transport: Transport,

    /// Server name to verify the server certificate against
    #[arg(short, long, default_value = "kvserver.acme.inc")]
    domain: String,

    /// CA certificate that signed the server certificate (PEM file)
    #[arg(long)]
    ca: PathBuf,

    /// Client certificate (PEM file)
    #[arg(long)]
    cert: PathBuf,

    /// Client private key (PEM file)
    #[arg(long)]
    key: PathBuf,
}

#[derive(Clone, Debug, ValueEnum)]
enum Transport {
    Yamux,
    Quic,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let ca = fs::read_to_string(&args.ca)?;
    let cert = fs::read_to_string(&args.cert)?;
    let key = fs::read_to_string(&args.key)?;
    let identity = Some((cert.as_str(), key.as_str()));

    match args.transport {
        Transport::Yamux => {
            let connector = TlsClientConnector::new(&args.domain, identity, Some(&ca))?;
            let stream = TcpStream::connect(&args.addr).await?;
            let stream = connector.connect(stream).await?;
            run(Client::new(YamuxCtrl::new_client(stream, None))).await
        }
        Transport::Quic => {
            let connector = QuicClientConnector::new(&args.domain, identity, Some(&ca))?;
            let addr: SocketAddr = args.addr.parse()?;
            let session = connector.connect(addr).await?;
            run(Client::new(session)).await
        }
    }
}

async fn run<S: Session>(mut client: Client<S>) -> Result<()> {
    // unary round trip
    let cmd = CommandRequest::new_hset("t1", "k1", "v1".into());
    let resp = client.execute(&cmd).await?;
    info!("Got response: {:?}", resp);

    let resp = client.execute(&CommandRequest::new_hget("t1", "k1")).await?;
    info!("Got response: {:?}", resp);

    // subscribe, then feed the subscription from the same session
    let channel = "lobby";
    let mut stream = client
        .execute_streaming(&CommandRequest::new_subscribe(channel))
        .await?;
    let id = stream.id;
    info!("Subscribed with id {}", id);

    let cmd = CommandRequest::new_publish(channel, vec![1.into(), 2.into(), "hello".into()]);
    let resp = client.execute(&cmd).await?;
    info!("Finished publishing {:?}", resp);

    for _ in 0..3 {
        if let Some(Ok(data)) = stream.next().await {
            info!("Got published data: {:?}", data);
        }
    }

    let resp = client
        .execute(&CommandRequest::new_unsubscribe(channel, id))
        .await?;
    info!("Finished unsubscribing {:?}", resp);

    // drain until the terminal frame closes the stream
    while let Some(Ok(data)) = stream.next().await {
        info!("Got published data: {:?}", data);
    }

    info!("Done!");
    Ok(())
}
