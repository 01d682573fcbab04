mod command_service;
mod topic;
mod topic_service;

use std::sync::Arc;

use futures::stream;
use tracing::debug;

use crate::{CommandRequest, CommandResponse, KvError, MemTable, RequestData, Storage};

pub use topic::{Broadcaster, Subscription, Topic};
pub use topic_service::{StreamingResponse, TopicService};

/// A trait for unary command handlers
pub trait CommandService {
    /// Execute the command and return the `CommandResponse`
    fn execute(self, store: &impl Storage) -> CommandResponse;
}

pub struct Service<Store = MemTable> {
    inner: Arc<ServiceInner<Store>>,
    broadcaster: Arc<Broadcaster>,
}

// not derived: a handle clone must not require Store to be Clone
impl<Store> Clone for Service<Store> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            broadcaster: Arc::clone(&self.broadcaster),
        }
    }
}

pub struct ServiceInner<Store> {
    store: Store,
    on_received: Vec<fn(&CommandRequest)>,
    on_executed: Vec<fn(&CommandResponse)>,
    on_before_send: Vec<fn(&mut CommandResponse)>,
    on_after_send: Vec<fn()>,
}

impl<Store: Storage> Service<Store> {
    /// Execute one command. Unary commands produce a single response; a
    /// subscription produces the id frame, the published data and finally
    /// the terminal frame.
    pub fn execute(&self, cmd: CommandRequest) -> StreamingResponse {
        debug!("Got request: {:?}", cmd);
        self.inner.on_received.notify(&cmd);

        if cmd.is_streaming() {
            return dispatch_stream(cmd, Arc::clone(&self.broadcaster));
        }

        let mut res = dispatch(cmd, &self.inner.store);
        debug!("Executed response: {:?}", &res);
        self.inner.on_executed.notify(&res);
        self.inner.on_before_send.notify(&mut res);
        if !self.inner.on_after_send.is_empty() {
            debug!("Modified response: {:?}", &res);
        }

        Box::pin(stream::once(async move { Arc::new(res) }))
    }

    /// Cancel every live subscription; their streams observe the terminal
    /// frame. Called on server shutdown.
    pub fn shutdown(&self) {
        self.broadcaster.cancel_all();
    }
}

impl<Store: Storage> ServiceInner<Store> {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            on_received: Vec::new(),
            on_executed: Vec::new(),
            on_before_send: Vec::new(),
            on_after_send: Vec::new(),
        }
    }

    pub fn fn_received(mut self, f: fn(&CommandRequest)) -> Self {
        self.on_received.push(f);
        self
    }

    pub fn fn_executed(mut self, f: fn(&CommandResponse)) -> Self {
        self.on_executed.push(f);
        self
    }

    pub fn fn_before_send(mut self, f: fn(&mut CommandResponse)) -> Self {
        self.on_before_send.push(f);
        self
    }

    pub fn fn_after_send(mut self, f: fn()) -> Self {
        self.on_after_send.push(f);
        self
    }
}

impl<Store: Storage> From<ServiceInner<Store>> for Service<Store> {
    fn from(inner: ServiceInner<Store>) -> Self {
        Self {
            inner: Arc::new(inner),
            broadcaster: Arc::new(Broadcaster::default()),
        }
    }
}

/// A trait for notify, without mut
pub trait Notify<Arg> {
    fn notify(&self, arg: &Arg);
}

/// A trait for notify, with mut
pub trait NotifyMut<Arg> {
    fn notify(&self, arg: &mut Arg);
}

impl<Arg> Notify<Arg> for Vec<fn(&Arg)> {
    fn notify(&self, arg: &Arg) {
        for f in self {
            f(arg);
        }
    }
}

impl<Arg> NotifyMut<Arg> for Vec<fn(&mut Arg)> {
    fn notify(&self, arg: &mut Arg) {
        for f in self {
            f(arg);
        }
    }
}

/// Route a storage command to its handler.
pub fn dispatch(cmd: CommandRequest, store: &impl Storage) -> CommandResponse {
    match cmd.request_data {
        Some(RequestData::Hget(req)) => req.execute(store),
        Some(RequestData::Hgetall(req)) => req.execute(store),
        Some(RequestData::Hmget(req)) => req.execute(store),
        Some(RequestData::Hset(req)) => req.execute(store),
        Some(RequestData::Hmset(req)) => req.execute(store),
        Some(RequestData::Hdel(req)) => req.execute(store),
        Some(RequestData::Hmdel(req)) => req.execute(store),
        Some(RequestData::Hexist(req)) => req.execute(store),
        Some(RequestData::Hmexist(req)) => req.execute(store),
        None => KvError::InvalidCommand("Request has no data".into()).into(),
        _ => KvError::InvalidCommand("Cannot dispatch a topic command to storage".into()).into(),
    }
}

/// Route a topic command to the broker.
pub fn dispatch_stream(cmd: CommandRequest, topic: impl Topic) -> StreamingResponse {
    match cmd.request_data {
        Some(RequestData::Publish(req)) => req.execute(topic),
        Some(RequestData::Subscribe(req)) => req.execute(topic),
        Some(RequestData::Unsubscribe(req)) => req.execute(topic),
        // everything else is unary and goes through dispatch
        _ => unreachable!("not a topic command"),
    }
}

#[cfg(test)]
use crate::{Kvpair, Value};

#[cfg(test)]
pub fn assert_res_ok(res: &CommandResponse, values: &[Value], pairs: &[Kvpair]) {
    let mut sorted_pairs = res.pairs.to_vec();
    sorted_pairs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(res.status, 200);
    assert_eq!(res.message, "");
    assert_eq!(res.values, values);
    assert_eq!(sorted_pairs, pairs);
}

#[cfg(test)]
pub fn assert_res_error(res: &CommandResponse, code: u32, msg: &str) {
    assert_eq!(res.status, code);
    assert!(res.message.contains(msg));
    assert_eq!(res.values, vec![]);
    assert_eq!(res.pairs, vec![]);
}
