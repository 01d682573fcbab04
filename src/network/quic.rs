use std::{
    io::Cursor,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Once},
    task::{Context, Poll},
};

use async_trait::async_trait;
use quinn::{Connection, Endpoint, RecvStream, SendStream};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    RootCertStore,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    sync::watch,
};
use tracing::{info, warn};

use crate::{KvError, ProstServerStream, Service, ServiceInner, Storage};

use super::{multiplex::Session, ServerHandle};

/// ALPN token of the QUIC transport.
const ALPN_QUIC: &[u8] = b"h3";

/// rustls refuses to build a config without a process-level crypto provider.
/// Installed once, before the first builder call; losing the race to another
/// installer is fine.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// A QUIC connection as a session: every command exchange takes one
/// bidirectional QUIC stream.
pub struct QuicSession {
    conn: Connection,
}

#[async_trait]
impl Session for QuicSession {
    type Stream = QuicStream;

    async fn open(&mut self) -> Result<Self::Stream, KvError> {
        let (send, recv) = self.conn.open_bi().await?;
        Ok(QuicStream { send, recv })
    }
}

/// One bidirectional QUIC stream as an ordinary byte duplex.
pub struct QuicStream {
    send: SendStream,
    recv: RecvStream,
}

impl AsyncRead for QuicStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.recv).poll_read(cx, buf)
    }
}

impl AsyncWrite for QuicStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match Pin::new(&mut self.send).poll_write(cx, buf) {
            Poll::Ready(r) => Poll::Ready(r.map_err(Into::into)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.send).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.send).poll_shutdown(cx)
    }
}

/// Client side configuration, the QUIC counterpart of `TlsClientConnector`.
pub struct QuicClientConnector {
    endpoint: Endpoint,
    server_name: String,
}

impl QuicClientConnector {
    /// `identity` is the client's certificate/key PEM pair for mutual TLS,
    /// `server_ca` the CA certificate PEM that signed the server certificate.
    pub fn new(
        domain: impl Into<String>,
        identity: Option<(&str, &str)>,
        server_ca: Option<&str>,
    ) -> Result<Self, KvError> {
        install_crypto_provider();

        let mut roots = RootCertStore::empty();
        if let Some(ca) = server_ca {
            for cert in load_certs(ca)? {
                roots.add(cert)?;
            }
        }

        let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
        let mut config = match identity {
            Some((cert, key)) => builder.with_client_auth_cert(load_certs(cert)?, load_key(key)?)?,
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = vec![ALPN_QUIC.to_vec()];

        let client_config = quinn::ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(config)
                .map_err(|e| KvError::Internal(e.to_string()))?,
        ));

        let mut endpoint = Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))?;
        endpoint.set_default_client_config(client_config);

        Ok(Self {
            endpoint,
            server_name: domain.into(),
        })
    }

    /// Establish a QUIC connection to the server.
    pub async fn connect(&self, addr: SocketAddr) -> Result<QuicSession, KvError> {
        let conn = self.endpoint.connect(addr, &self.server_name)?.await?;
        Ok(QuicSession { conn })
    }
}

/// Server side configuration, the QUIC counterpart of `TlsServerAcceptor`.
#[derive(Clone)]
pub struct QuicServerAcceptor {
    config: quinn::ServerConfig,
}

impl QuicServerAcceptor {
    /// Passing `client_ca` switches on mutual TLS.
    pub fn new(cert: &str, key: &str, client_ca: Option<&str>) -> Result<Self, KvError> {
        install_crypto_provider();

        let certs = load_certs(cert)?;
        let key = load_key(key)?;

        let builder = match client_ca {
            Some(ca) => {
                let mut roots = RootCertStore::empty();
                for cert in load_certs(ca)? {
                    roots.add(cert)?;
                }
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| KvError::Internal(e.to_string()))?;
                rustls::ServerConfig::builder().with_client_cert_verifier(verifier)
            }
            None => rustls::ServerConfig::builder().with_no_client_auth(),
        };
        let mut config = builder.with_single_cert(certs, key)?;
        config.alpn_protocols = vec![ALPN_QUIC.to_vec()];

        let config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(config)
                .map_err(|e| KvError::Internal(e.to_string()))?,
        ));
        Ok(Self { config })
    }

    pub fn bind(&self, addr: SocketAddr) -> Result<Endpoint, KvError> {
        Ok(Endpoint::server(self.config.clone(), addr)?)
    }
}

/// Accept QUIC connections and serve every bidirectional stream on them as
/// one command exchange.
pub async fn start_quic_server<Store>(
    addr: SocketAddr,
    acceptor: QuicServerAcceptor,
    store: Store,
) -> Result<ServerHandle<Store>, KvError>
where
    Store: Storage,
{
    let endpoint = acceptor.bind(addr)?;
    let addr = endpoint.local_addr()?;
    let service: Service<Store> = ServiceInner::new(store).into();
    info!("Start listening on {} (quic)", addr);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let svc = service.clone();

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                incoming = endpoint.accept() => {
                    let Some(incoming) = incoming else { break };
                    let service = svc.clone();
                    tokio::spawn(async move {
                        let conn = match incoming.await {
                            Ok(conn) => conn,
                            Err(e) => {
                                warn!("Failed to accept quic connection: {}", e);
                                return;
                            }
                        };
                        info!("Client {} connected", conn.remote_address());

                        loop {
                            let (send, recv) = match conn.accept_bi().await {
                                Ok(v) => v,
                                Err(e) => {
                                    info!("Quic connection closed: {}", e);
                                    break;
                                }
                            };
                            let svc = service.clone();
                            tokio::spawn(async move {
                                let stream =
                                    ProstServerStream::new(QuicStream { send, recv }, svc);
                                if let Err(e) = stream.process().await {
                                    warn!("Failed to process the stream: {}", e);
                                }
                            });
                        }
                    });
                }
            }
        }
        // bounded drain so in-flight terminal frames reach subscribers
        // before the endpoint resets the remaining streams
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        endpoint.close(0u32.into(), b"server shutdown");
        info!("Server at {} stopped accepting", addr);
    });

    Ok(ServerHandle::new(addr, service, shutdown_tx, join))
}

fn load_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, KvError> {
    rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| KvError::CertificateParseError("server", "cert"))
}

fn load_key(pem: &str) -> Result<PrivateKeyDer<'static>, KvError> {
    rustls_pemfile::private_key(&mut Cursor::new(pem))
        .ok()
        .flatten()
        .ok_or(KvError::CertificateParseError("private", "key"))
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use crate::{
        assert_res_ok,
        network::tls::tls_utils::{certs, SERVER_DOMAIN},
        Client, CommandRequest, MemTable, Value,
    };

    use super::*;

    #[tokio::test]
    async fn quic_client_server_should_work() -> anyhow::Result<()> {
        let (mut client, _handle) = start_client_server().await?;

        let cmd = CommandRequest::new_hset("t1", "k1", "v1".into());
        let res = client.execute(&cmd).await?;
        assert_res_ok(&res, &[Value::default()], &[]);

        let res = client.execute(&CommandRequest::new_hget("t1", "k1")).await?;
        assert_res_ok(&res, &["v1".into()], &[]);
        Ok(())
    }

    #[tokio::test]
    async fn quic_pub_sub_should_work() -> anyhow::Result<()> {
        let (mut client, _handle) = start_client_server().await?;

        let mut sub = client
            .execute_streaming(&CommandRequest::new_subscribe("cae"))
            .await?;
        let id = sub.id;

        let cmd = CommandRequest::new_publish("cae", vec!["hello".into()]);
        let res = client.execute(&cmd).await?;
        assert_res_ok(&res, &[], &[]);

        let data = sub.next().await.unwrap()?;
        assert_res_ok(&data, &["hello".into()], &[]);

        let res = client
            .execute(&CommandRequest::new_unsubscribe("cae", id))
            .await?;
        assert_res_ok(&res, &[], &[]);
        assert!(sub.next().await.is_none());
        Ok(())
    }

    async fn start_client_server(
    ) -> anyhow::Result<(Client<QuicSession>, ServerHandle<MemTable>)> {
        let certs = certs();
        let acceptor = QuicServerAcceptor::new(
            &certs.server_cert,
            &certs.server_key,
            Some(&certs.ca_cert),
        )?;
        let handle = start_quic_server(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            acceptor,
            MemTable::new(),
        )
        .await?;

        let connector = QuicClientConnector::new(
            SERVER_DOMAIN,
            Some((certs.client_cert.as_str(), certs.client_key.as_str())),
            Some(&certs.ca_cert),
        )?;
        let session = connector.connect(handle.local_addr()).await?;
        Ok((Client::new(session), handle))
    }
}
