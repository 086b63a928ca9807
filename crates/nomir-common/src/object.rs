//! The capability surface of a mirrored object.
//!
//! Every object a peer can publish, and every proxy standing in for a remote
//! one, implements [`MirrorObject`]. The dispatcher talks only to this trait,
//! so a capability invoked on a local export and the same capability invoked
//! through a proxy are indistinguishable to the caller.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{NomirError, Result};
use crate::value::{Dict, Value};

/// A shared live object: a local export or a proxy onto a remote one.
pub type Handle = Arc<dyn MirrorObject>;

/// Capabilities an object may expose to remote peers.
///
/// Every method has a default body returning
/// [`NomirError::UnsupportedOperation`], so implementors pick only the
/// capabilities that make sense: a mapping implements item access and length,
/// a function implements `call`, and so on.
#[async_trait]
pub trait MirrorObject: Send + Sync {
    async fn get_attr(&self, name: &str) -> Result<Value> {
        let _ = name;
        Err(NomirError::unsupported("attribute read"))
    }

    async fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        let _ = (name, value);
        Err(NomirError::unsupported("attribute write"))
    }

    async fn del_attr(&self, name: &str) -> Result<()> {
        let _ = name;
        Err(NomirError::unsupported("attribute delete"))
    }

    async fn get_item(&self, key: &Value) -> Result<Value> {
        let _ = key;
        Err(NomirError::unsupported("indexed read"))
    }

    async fn set_item(&self, key: Value, value: Value) -> Result<()> {
        let _ = (key, value);
        Err(NomirError::unsupported("indexed write"))
    }

    async fn del_item(&self, key: &Value) -> Result<()> {
        let _ = key;
        Err(NomirError::unsupported("indexed delete"))
    }

    async fn len(&self) -> Result<i64> {
        Err(NomirError::unsupported("length"))
    }

    /// Short textual conversion (the remote STR operation).
    async fn str_text(&self) -> Result<String> {
        Err(NomirError::unsupported("textual conversion"))
    }

    /// Diagnostic textual conversion (the remote REPR operation).
    async fn repr_text(&self) -> Result<String> {
        Err(NomirError::unsupported("diagnostic conversion"))
    }

    async fn call(&self, args: Vec<Value>, kwargs: Dict) -> Result<Value> {
        let _ = (args, kwargs);
        Err(NomirError::unsupported("invocation"))
    }

    /// For handles that stand in for an object owned by a remote peer:
    /// the owner's endpoint and the id in the owner's export table.
    ///
    /// Locally owned objects return `None`. The codec uses this to decide
    /// whether a handle is shipped as a fresh export or as a reference the
    /// destination already owns.
    fn remote_ref(&self) -> Option<(SocketAddr, u64)> {
        None
    }
}
