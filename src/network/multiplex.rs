use std::marker::PhantomData;

use async_trait::async_trait;
use futures::{future, Future, TryStreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use yamux::{Config, Connection, ConnectionError, Control, Mode, WindowUpdateMode};

use crate::KvError;

/// A multiplexed connection. One command exchange lives on one logical
/// stream; the transport behind it is selected at construction time and
/// never leaks past it.
#[async_trait]
pub trait Session: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new independent, ordered, bidirectional stream.
    async fn open(&mut self) -> Result<Self::Stream, KvError>;
}

/// A yamux multiplexed connection
pub struct YamuxCtrl<S> {
    /// The control of the multiplexed connection, used to create streams
    ctrl: Control,
    _conn: PhantomData<S>,
}

impl<S> YamuxCtrl<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Create a new multiplexed client connection
    pub fn new_client(stream: S, config: Option<Config>) -> Self {
        Self::new(stream, config, true, |_stream| future::ready(Ok(())))
    }

    /// Create a new multiplexed server connection
    pub fn new_server<F, Fut>(stream: S, config: Option<Config>, f: F) -> Self
    where
        F: FnMut(yamux::Stream) -> Fut,
        F: Send + 'static,
        Fut: Future<Output = Result<(), ConnectionError>> + Send + 'static,
    {
        Self::new(stream, config, false, f)
    }

    /// Create a new multiplexed connection
    fn new<F, Fut>(stream: S, config: Option<Config>, is_client: bool, f: F) -> Self
    where
        F: FnMut(yamux::Stream) -> Fut,
        F: Send + 'static,
        Fut: Future<Output = Result<(), ConnectionError>> + Send + 'static,
    {
        let mode = if is_client {
            Mode::Client
        } else {
            Mode::Server
        };

        let mut config = config.unwrap_or_default();
        config.set_window_update_mode(WindowUpdateMode::OnRead);

        let conn = Connection::new(stream.compat(), config, mode);

        let ctrl = conn.control();

        tokio::spawn(yamux::into_stream(conn).try_for_each_concurrent(None, f));

        Self {
            ctrl,
            _conn: PhantomData,
        }
    }

    /// Open a new stream
    pub async fn open_stream(&mut self) -> Result<Compat<yamux::Stream>, ConnectionError> {
        let stream = self.ctrl.open_stream().await?;
        Ok(stream.compat())
    }
}

#[async_trait]
impl<S> Session for YamuxCtrl<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Stream = Compat<yamux::Stream>;

    async fn open(&mut self) -> Result<Self::Stream, KvError> {
        Ok(self.open_stream().await?)
    }
}
