use crate::{CommandRequest, CommandResponse, KvError, ProstClientStream, StreamResult};

use super::multiplex::Session;

/// A client over any multiplexed session. Every call opens a fresh logical
/// stream, so concurrent exchanges never interleave frames.
pub struct Client<S> {
    session: S,
}

impl<S: Session> Client<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }

    /// Execute a unary command: one request frame out, one response frame in.
    pub async fn execute(&mut self, cmd: &CommandRequest) -> Result<CommandResponse, KvError> {
        let stream = self.session.open().await?;
        let mut client = ProstClientStream::new(stream);
        client.execute_unary(cmd).await
    }

    /// Execute a streaming command (subscribe). The returned handle carries
    /// the subscription id and yields responses until the stream ends.
    pub async fn execute_streaming(
        &mut self,
        cmd: &CommandRequest,
    ) -> Result<StreamResult, KvError> {
        let stream = self.session.open().await?;
        let client = ProstClientStream::new(stream);
        client.execute_stream(cmd).await
    }
}
