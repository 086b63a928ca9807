//! nomir peer runtime
//!
//! A [`Service`] is a symmetric peer: it publishes named objects and, over
//! the same UDP socket, reaches objects other peers publish. Remote objects
//! are used through [`Proxy`] handles (or any [`nomir_common::Handle`]
//! decoded out of a reply); every capability access is one request/reply
//! transaction.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nomir_service::{Service, objects::DictObject};
//! use nomir_common::{Dict, Value};
//!
//! # #[tokio::main]
//! # async fn main() -> nomir_common::Result<()> {
//! // Publisher.
//! let server = Service::new("127.0.0.1:12074".parse().unwrap());
//! let shared = Dict::new();
//! shared.insert(Value::from("answer"), Value::Int(42));
//! server.register("m", Arc::new(DictObject::new(shared)))?;
//! server.start().await?;
//!
//! // Consumer (usually another process).
//! let client = Service::new("127.0.0.1:0".parse().unwrap());
//! client.start().await?;
//! let peer = client.connect(server.local_addr().unwrap()).await?;
//! let m = peer.resolve("m").await?;
//! assert_eq!(m.get_item("answer").await?, Value::Int(42));
//! # Ok(())
//! # }
//! ```

pub mod objects;
pub mod proxy;
pub mod service;

mod dispatch;
mod table;
mod transaction;

pub use proxy::Proxy;
pub use service::{
    PeerHandle, Service, ServiceConfig, ServiceStats, StatsSnapshot, DEFAULT_PORT,
};
pub use transaction::RetryPolicy;
