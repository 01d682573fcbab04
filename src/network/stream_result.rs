use std::{
    ops::{Deref, DerefMut},
    pin::Pin,
};

use futures::{Stream, StreamExt};

use crate::{CommandResponse, KvError};

/// The result of a streaming command: the subscription id from the first
/// frame, and the lazy sequence of everything published afterwards.
pub struct StreamResult {
    pub id: u32,
    inner: Pin<Box<dyn Stream<Item = Result<CommandResponse, KvError>> + Send>>,
}

impl StreamResult {
    pub async fn new<T>(mut stream: T) -> Result<Self, KvError>
    where
        T: Stream<Item = Result<CommandResponse, KvError>> + Send + Unpin + 'static,
    {
        let id = match stream.next().await {
            Some(Ok(CommandResponse {
                status: 200,
                values: v,
                ..
            })) if !v.is_empty() => {
                let id: i64 = (&v[0]).try_into()?;
                id as u32
            }
            _ => return Err(KvError::Internal("Invalid stream".into())),
        };

        Ok(Self {
            id,
            inner: Box::pin(stream),
        })
    }
}

impl Deref for StreamResult {
    type Target = Pin<Box<dyn Stream<Item = Result<CommandResponse, KvError>> + Send>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for StreamResult {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
