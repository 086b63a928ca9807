//! Client-side stand-ins for remote objects.
//!
//! A [`Proxy`] is parameterized by (peer, remote id). Every capability is a
//! thin forwarder: build the opcode payload, run one transaction, decode the
//! reply. Nothing is cached, since remote mutation must stay observable; each
//! access is a round trip.

use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use nomir_common::{Dict, Handle, MirrorObject, NomirError, Opcode, Result, Value};

use crate::service::ServiceShared;

/// Names an object owned by `peer` without holding anything of it. Used to
/// put the target reference into request payloads; the codec ships it as a
/// receiver-owned reference.
pub(crate) struct RemoteStub {
    pub peer: SocketAddr,
    pub id: u64,
}

#[async_trait]
impl MirrorObject for RemoteStub {
    fn remote_ref(&self) -> Option<(SocketAddr, u64)> {
        Some((self.peer, self.id))
    }
}

/// Shared state behind every clone of one proxy. At most one `ProxyInner`
/// exists per (peer, remote id) per service; the import table enforces it.
pub(crate) struct ProxyInner {
    pub(crate) service: Weak<ServiceShared>,
    pub(crate) peer: SocketAddr,
    pub(crate) remote_id: u64,
    released: AtomicBool,
}

impl ProxyInner {
    pub(crate) fn new(service: Weak<ServiceShared>, peer: SocketAddr, remote_id: u64) -> Self {
        Self {
            service,
            peer,
            remote_id,
            released: AtomicBool::new(false),
        }
    }

    fn service(&self) -> Result<Arc<ServiceShared>> {
        self.service.upgrade().ok_or(NomirError::ServiceStopped)
    }

    fn target(&self) -> Value {
        Value::object(RemoteStub {
            peer: self.peer,
            id: self.remote_id,
        })
    }

    async fn round_trip(&self, opcode: Opcode, payload: Value) -> Result<Value> {
        let service = self.service()?;
        service.request(self.peer, opcode, &payload).await
    }

    /// Marks this proxy released so dropping it later stays silent.
    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }
}

#[async_trait]
impl MirrorObject for ProxyInner {
    async fn get_attr(&self, name: &str) -> Result<Value> {
        self.round_trip(
            Opcode::GetAttr,
            Value::from(vec![self.target(), Value::from(name)]),
        )
        .await
    }

    async fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        self.round_trip(
            Opcode::SetAttr,
            Value::from(vec![self.target(), Value::from(name), value]),
        )
        .await
        .map(|_| ())
    }

    async fn del_attr(&self, name: &str) -> Result<()> {
        self.round_trip(
            Opcode::DelAttr,
            Value::from(vec![self.target(), Value::from(name)]),
        )
        .await
        .map(|_| ())
    }

    async fn get_item(&self, key: &Value) -> Result<Value> {
        self.round_trip(
            Opcode::GetItem,
            Value::from(vec![self.target(), key.clone()]),
        )
        .await
    }

    async fn set_item(&self, key: Value, value: Value) -> Result<()> {
        self.round_trip(
            Opcode::SetItem,
            Value::from(vec![self.target(), key, value]),
        )
        .await
        .map(|_| ())
    }

    async fn del_item(&self, key: &Value) -> Result<()> {
        self.round_trip(
            Opcode::DelItem,
            Value::from(vec![self.target(), key.clone()]),
        )
        .await
        .map(|_| ())
    }

    async fn len(&self) -> Result<i64> {
        let reply = self.round_trip(Opcode::Len, self.target()).await?;
        reply.as_int().ok_or_else(|| {
            NomirError::malformed(0, format!("LEN reply was {}", reply.type_name()))
        })
    }

    async fn str_text(&self) -> Result<String> {
        let reply = self.round_trip(Opcode::Str, self.target()).await?;
        match reply {
            Value::Text(s) => Ok(s),
            other => Err(NomirError::malformed(
                0,
                format!("STR reply was {}", other.type_name()),
            )),
        }
    }

    async fn repr_text(&self) -> Result<String> {
        let reply = self.round_trip(Opcode::Repr, self.target()).await?;
        match reply {
            Value::Text(s) => Ok(s),
            other => Err(NomirError::malformed(
                0,
                format!("REPR reply was {}", other.type_name()),
            )),
        }
    }

    async fn call(&self, args: Vec<Value>, kwargs: Dict) -> Result<Value> {
        self.round_trip(
            Opcode::Call,
            Value::from(vec![
                self.target(),
                Value::from(args),
                Value::Map(kwargs),
            ]),
        )
        .await
    }

    fn remote_ref(&self) -> Option<(SocketAddr, u64)> {
        Some((self.peer, self.remote_id))
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        if self.released.load(Ordering::Acquire) {
            return;
        }
        if let Some(service) = self.service.upgrade() {
            service.forget_import(self.peer, self.remote_id);
            service.send_release(self.peer, self.remote_id);
        }
    }
}

/// A local handle onto an object owned by a remote peer.
///
/// Cloning is cheap; all clones share the same transaction state. Equality
/// and hashing go by (peer, remote id), so two resolutions of the same remote
/// object compare equal.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    pub(crate) fn from_inner(inner: Arc<ProxyInner>) -> Self {
        Self { inner }
    }

    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn remote_id(&self) -> u64 {
        self.inner.remote_id
    }

    /// This proxy as a [`Handle`], e.g. for embedding into a [`Value`].
    pub fn handle(&self) -> Handle {
        self.inner.clone()
    }

    pub async fn get_attr(&self, name: &str) -> Result<Value> {
        self.inner.get_attr(name).await
    }

    pub async fn set_attr(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.inner.set_attr(name, value.into()).await
    }

    pub async fn del_attr(&self, name: &str) -> Result<()> {
        self.inner.del_attr(name).await
    }

    pub async fn get_item(&self, key: impl Into<Value>) -> Result<Value> {
        self.inner.get_item(&key.into()).await
    }

    pub async fn set_item(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        self.inner.set_item(key.into(), value.into()).await
    }

    pub async fn del_item(&self, key: impl Into<Value>) -> Result<()> {
        self.inner.del_item(&key.into()).await
    }

    pub async fn len(&self) -> Result<i64> {
        self.inner.len().await
    }

    /// Remote short textual conversion (STR).
    pub async fn str_text(&self) -> Result<String> {
        self.inner.str_text().await
    }

    /// Remote diagnostic textual conversion (REPR).
    pub async fn repr_text(&self) -> Result<String> {
        self.inner.repr_text().await
    }

    pub async fn call(&self, args: Vec<Value>, kwargs: Dict) -> Result<Value> {
        self.inner.call(args, kwargs).await
    }

    /// Releases this proxy deterministically: the import entry is removed
    /// and a RELEASE is sent to the owner now instead of at drop time.
    pub fn release(self) {
        if self.inner.mark_released() {
            if let Some(service) = self.inner.service.upgrade() {
                service.forget_import(self.inner.peer, self.inner.remote_id);
                service.send_release(self.inner.peer, self.inner.remote_id);
            }
        }
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.peer() == other.peer() && self.remote_id() == other.remote_id()
    }
}

impl Eq for Proxy {}

impl Hash for Proxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.peer().hash(state);
        self.remote_id().hash(state);
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Proxy({}#{})", self.peer(), self.remote_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn detached(peer: &str, id: u64) -> Proxy {
        Proxy::from_inner(Arc::new(ProxyInner::new(
            Weak::new(),
            peer.parse().unwrap(),
            id,
        )))
    }

    fn hash_of(p: &Proxy) -> u64 {
        let mut hasher = DefaultHasher::new();
        p.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn equality_and_hash_follow_peer_and_id() {
        let a = detached("127.0.0.1:9100", 4);
        let b = detached("127.0.0.1:9100", 4);
        let c = detached("127.0.0.1:9100", 5);
        let d = detached("127.0.0.1:9101", 4);

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[tokio::test]
    async fn detached_proxy_reports_service_stopped() {
        let p = detached("127.0.0.1:9100", 1);
        assert!(matches!(
            p.get_attr("x").await,
            Err(NomirError::ServiceStopped)
        ));
    }

    #[test]
    fn stub_names_its_owner() {
        let stub = RemoteStub {
            peer: "10.0.0.1:12074".parse().unwrap(),
            id: 17,
        };
        assert_eq!(
            stub.remote_ref(),
            Some(("10.0.0.1:12074".parse().unwrap(), 17))
        );
    }
}
