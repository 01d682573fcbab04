mod error;
mod network;
mod pb;
mod service;
mod storage;

#[cfg(test)]
mod utils;

pub use error::KvError;
pub use network::*;
pub use pb::*;
pub use service::*;
pub use storage::*;
