use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("Not found for table: {0}, key: {1}")]
    NotFound(String, String),
    #[error("Not found subscription {0}")]
    NotFoundSubscription(u32),

    #[error("Cannot parse command: `{0}`")]
    InvalidCommand(String),
    #[error("Cannot convert value {0:?} to {1}")]
    ConvertCommand(String, &'static str),

    #[error("Failed to encode protobuf message: {0}")]
    EncodeError(#[from] prost::EncodeError),
    #[error("Failed to decode protobuf message: {0}")]
    DecodeError(#[from] prost::DecodeError),
    #[error("Failed to decompress frame: {0}")]
    DecompressError(String),

    #[error("Sled error: {0}")]
    SledError(#[from] sled::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Frame is larger than max size")]
    FrameTooLarge,
    #[error("Frame truncated by peer")]
    FrameTruncated,
    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Failed to parse certificate: {0} {1}")]
    CertificateParseError(&'static str, &'static str),

    #[error("TLS error")]
    TlsError(#[from] tokio_rustls::rustls::TLSError),

    #[error("Yamux error: {0}")]
    YamuxError(#[from] yamux::ConnectionError),

    #[error("QUIC connect error: {0}")]
    QuicConnectError(#[from] quinn::ConnectError),
    #[error("QUIC connection error: {0}")]
    QuicConnectionError(#[from] quinn::ConnectionError),
    #[error("QUIC TLS config error: {0}")]
    QuicConfigError(#[from] rustls::Error),
}
