mod client;
mod frame;
mod multiplex;
mod quic;
mod stream_result;
mod tls;

use std::{
    net::SocketAddr,
    panic::{catch_unwind, AssertUnwindSafe},
};

use bytes::BytesMut;
use futures::{stream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::watch,
    task::JoinHandle,
};
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{error, info, warn};

pub use client::Client;
pub use frame::{read_frame, FrameCoder};
pub use multiplex::{Session, YamuxCtrl};
pub use quic::{start_quic_server, QuicClientConnector, QuicServerAcceptor, QuicSession, QuicStream};
pub use stream_result::StreamResult;
pub use tls::{TlsClientConnector, TlsServerAcceptor};

use crate::{CommandRequest, CommandResponse, KvError, MemTable, Service, ServiceInner, Storage};

/// Serves one command exchange on a logical stream accepted by the server:
/// exactly one request in, one or many responses out, then the write side is
/// closed. Concurrent calls from the same client live on separate streams.
pub struct ProstServerStream<S, Store = MemTable> {
    inner: S,
    service: Service<Store>,
}

/// The client end of one logical stream.
pub struct ProstClientStream<S> {
    inner: S,
}

impl<S, Store> ProstServerStream<S, Store>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    Store: Storage,
{
    pub fn new(stream: S, service: Service<Store>) -> Self {
        Self {
            inner: stream,
            service,
        }
    }

    /// Process the stream's single command exchange.
    pub async fn process(mut self) -> Result<(), KvError> {
        let cmd = match self.recv().await {
            Ok(cmd) => cmd,
            // the peer opened a stream and went away; nothing to answer
            Err(KvError::ConnectionClosed) => return Ok(()),
            // a frame that does not deserialize still gets an answer before
            // the stream closes; the session stays up
            Err(e @ KvError::DecodeError(_)) => {
                let res: CommandResponse = KvError::InvalidCommand(e.to_string()).into();
                self.send(&res).await?;
                self.inner.shutdown().await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        info!("Got a new command: {:?}", cmd);

        let mut res = match catch_unwind(AssertUnwindSafe(|| self.service.execute(cmd))) {
            Ok(res) => res,
            Err(_) => {
                error!("Command dispatch panicked");
                let res: CommandResponse =
                    KvError::Internal("command dispatch panicked".into()).into();
                self.send(&res).await?;
                self.inner.shutdown().await?;
                return Ok(());
            }
        };

        while let Some(data) = res.next().await {
            self.send(&data).await?;
        }

        self.inner.shutdown().await?;
        Ok(())
    }

    /// Read the command from the client
    async fn recv(&mut self) -> Result<CommandRequest, KvError> {
        let mut buf = BytesMut::new();
        let stream = &mut self.inner;
        read_frame(stream, &mut buf).await?;
        CommandRequest::decode_frame(&mut buf)
    }

    /// Send a response to the client
    async fn send(&mut self, resp: &CommandResponse) -> Result<(), KvError> {
        let mut buf = BytesMut::new();
        resp.encode_frame(&mut buf)?;
        let encoded = buf.freeze();
        self.inner.write_all(&encoded[..]).await?;
        Ok(())
    }
}

impl<S> ProstClientStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        Self { inner: stream }
    }

    /// Send a unary command and wait for its single response.
    pub async fn execute_unary(
        &mut self,
        cmd: &CommandRequest,
    ) -> Result<CommandResponse, KvError> {
        self.send(cmd).await?;
        self.recv().await
    }

    /// Send a streaming command and turn the rest of the stream into a lazy
    /// sequence of responses. The sequence ends on the status 0 terminal
    /// frame or a clean close; any other failure is surfaced once and then
    /// ends the sequence.
    pub async fn execute_stream(mut self, cmd: &CommandRequest) -> Result<StreamResult, KvError> {
        self.send(cmd).await?;

        let inner = Box::pin(stream::unfold((self, false), |(mut s, done)| async move {
            if done {
                return None;
            }
            match s.recv().await {
                Ok(res) if res.status == 0 => None,
                Ok(res) => Some((Ok(res), (s, false))),
                Err(KvError::ConnectionClosed) => None,
                Err(e) => Some((Err(e), (s, true))),
            }
        }));

        StreamResult::new(inner).await
    }

    /// Send a command to the server
    async fn send(&mut self, cmd: &CommandRequest) -> Result<(), KvError> {
        let mut buf = BytesMut::new();
        cmd.encode_frame(&mut buf)?;
        let encoded = buf.freeze();
        self.inner.write_all(&encoded[..]).await?;
        Ok(())
    }

    /// Read a response from the server
    async fn recv(&mut self) -> Result<CommandResponse, KvError> {
        let mut buf = BytesMut::new();
        let stream = &mut self.inner;
        read_frame(stream, &mut buf).await?;
        CommandResponse::decode_frame(&mut buf)
    }
}

/// Handle of a running server. Dropping it stops accepting new connections
/// but leaves live subscriptions dangling; call `shutdown` for an orderly
/// stop.
pub struct ServerHandle<Store = MemTable> {
    addr: SocketAddr,
    service: Service<Store>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl<Store: Storage> ServerHandle<Store> {
    pub(crate) fn new(
        addr: SocketAddr,
        service: Service<Store>,
        shutdown: watch::Sender<bool>,
        join: JoinHandle<()>,
    ) -> Self {
        Self {
            addr,
            service,
            shutdown,
            join,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Cancel every subscription (each subscriber observes its terminal
    /// frame), stop accepting and wait for the accept loop to exit.
    pub async fn shutdown(self) {
        self.service.shutdown();
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// Accept TCP connections, upgrade each to TLS and serve every yamux stream
/// on it as one command exchange.
pub async fn start_yamux_server<Store>(
    addr: &str,
    tls: TlsServerAcceptor,
    store: Store,
) -> Result<ServerHandle<Store>, KvError>
where
    Store: Storage,
{
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let service: Service<Store> = ServiceInner::new(store).into();
    info!("Start listening on {} (yamux over TLS)", addr);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let svc = service.clone();

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("Failed to accept tcp stream: {}", e);
                            continue;
                        }
                    };
                    info!("Client {} connected", peer);

                    let tls = tls.clone();
                    let service = svc.clone();
                    tokio::spawn(async move {
                        let stream = match tls.accept(stream).await {
                            Ok(stream) => stream,
                            Err(e) => {
                                warn!("Failed to accept tls stream: {}", e);
                                return;
                            }
                        };
                        YamuxCtrl::new_server(stream, None, move |s| {
                            let svc = service.clone();
                            async move {
                                let stream = ProstServerStream::new(s.compat(), svc);
                                if let Err(e) = stream.process().await {
                                    warn!("Failed to process the stream: {}", e);
                                }
                                Ok(())
                            }
                        });
                    });
                }
            }
        }
        info!("Server at {} stopped accepting", addr);
    });

    Ok(ServerHandle::new(addr, service, shutdown_tx, join))
}
