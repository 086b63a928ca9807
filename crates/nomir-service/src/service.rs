//! The peer container.
//!
//! A [`Service`] owns the UDP socket, the export table, the per-peer import
//! tables, the outstanding-transaction state, and the reply cache. `start`
//! launches one receiver task plus a pool of workers; the receiver only
//! parses frame headers and routes, so it never blocks on user code. Both
//! directions run concurrently in every peer: the same socket serves the
//! requests this process initiates and the requests it answers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use nomir_common::codec::{self, RefOrigin, ReferenceCodec, WireRef};
use nomir_common::frame::{self, Header, MAX_DATAGRAM};
use nomir_common::{Authenticator, DefaultAuthenticator, Handle, NomirError, Opcode, Result, Value};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dispatch;
use crate::proxy::{Proxy, ProxyInner, RemoteStub};
use crate::table::{ExportTable, ImportTable};
use crate::transaction::{Admission, ReplyCache, ReplyEnvelope, RetryPolicy, Transactions};

/// Conventional nomir port, for callers that want a well-known endpoint.
pub const DEFAULT_PORT: u16 = 12074;

const STATE_UNSTARTED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Tunables for one service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Worker tasks executing dispatched operations.
    pub workers: usize,
    /// Retransmission schedule for outbound requests.
    pub retry: RetryPolicy,
    /// Lifetime of cached replies; must exceed the retry window.
    pub reply_cache_ttl: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            workers: (parallelism * 2).max(2),
            retry: RetryPolicy::default(),
            reply_cache_ttl: Duration::from_secs(10),
        }
    }
}

/// Monotonic counters for dropped traffic.
#[derive(Default)]
pub struct ServiceStats {
    malformed: AtomicU64,
    unknown_tid: AtomicU64,
    denied: AtomicU64,
}

impl ServiceStats {
    pub(crate) fn count_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_unknown_tid(&self) {
        self.unknown_tid.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_tid: self.unknown_tid.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`ServiceStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub malformed: u64,
    pub unknown_tid: u64,
    pub denied: u64,
}

/// One admitted remote endpoint.
pub(crate) struct PeerRecord {
    pub imports: ImportTable,
    pub last_seen: Instant,
}

impl PeerRecord {
    fn new() -> Self {
        Self {
            imports: ImportTable::default(),
            last_seen: Instant::now(),
        }
    }
}

/// A datagram handed from the receiver to a worker.
pub(crate) struct Job {
    pub peer: SocketAddr,
    pub header: Header,
    pub payload: Vec<u8>,
}

/// State shared by the service handle, its tasks, and its proxies.
pub(crate) struct ServiceShared {
    bind_addr: SocketAddr,
    cfg: ServiceConfig,
    auth: Arc<dyn Authenticator>,
    state: AtomicU8,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: OnceLock<SocketAddr>,
    exports: Mutex<ExportTable>,
    peers: Mutex<HashMap<SocketAddr, PeerRecord>>,
    pub(crate) tx: Transactions,
    reply_cache: Mutex<ReplyCache>,
    pub(crate) stats: ServiceStats,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceShared {
    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state() == STATE_RUNNING {
            Ok(())
        } else {
            Err(NomirError::ServiceStopped)
        }
    }

    fn socket_opt(&self) -> Option<Arc<UdpSocket>> {
        self.socket
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.auth.clone()
    }

    // --- exports ---------------------------------------------------------

    pub(crate) fn export_names(&self) -> Vec<String> {
        self.exports.lock().unwrap_or_else(|e| e.into_inner()).names()
    }

    pub(crate) fn resolve_registered(&self, name: &str) -> Option<Handle> {
        let exports = self.exports.lock().unwrap_or_else(|e| e.into_inner());
        let id = exports.resolve_name(name)?;
        exports.get(id)
    }

    pub(crate) fn export_id_of(&self, handle: &Handle) -> Option<u64> {
        self.exports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .id_of(handle)
    }

    pub(crate) fn release_export(&self, id: u64) {
        self.exports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .release(id);
    }

    pub(crate) fn export_count(&self) -> usize {
        self.exports.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    // --- peers and imports ----------------------------------------------

    /// Returns the deduplicated proxy for (peer, id), creating it on miss.
    pub(crate) fn import_proxy(self: &Arc<Self>, peer: SocketAddr, id: u64) -> Proxy {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        let record = peers.entry(peer).or_insert_with(PeerRecord::new);
        if let Some(inner) = record.imports.get(id) {
            return Proxy::from_inner(inner);
        }
        let inner = Arc::new(ProxyInner::new(Arc::downgrade(self), peer, id));
        record.imports.insert(id, &inner);
        Proxy::from_inner(inner)
    }

    pub(crate) fn forget_import(&self, peer: SocketAddr, id: u64) {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = peers.get_mut(&peer) {
            record.imports.remove(id);
        }
    }

    pub(crate) fn forget_peer(&self, peer: SocketAddr) {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&peer);
    }

    pub(crate) fn ensure_peer(&self, peer: SocketAddr) {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(peer)
            .or_insert_with(PeerRecord::new)
            .last_seen = Instant::now();
    }

    pub(crate) fn peer_seen(&self, peer: SocketAddr) -> Option<Instant> {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&peer)
            .map(|record| record.last_seen)
    }

    fn touch_known_peer(&self, peer: SocketAddr) {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = peers.get_mut(&peer) {
            record.last_seen = Instant::now();
        }
    }

    /// First-contact admission. Known peers pass; unknown ones go through
    /// the authenticator (a panicking hook denies) and get a record only on
    /// success.
    fn admit(&self, peer: SocketAddr) -> bool {
        {
            let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(record) = peers.get_mut(&peer) {
                record.last_seen = Instant::now();
                return true;
            }
        }
        let auth = self.auth.clone();
        let admitted = catch_unwind(AssertUnwindSafe(|| auth.admit_peer(peer))).unwrap_or(false);
        if admitted {
            self.peers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(peer, PeerRecord::new());
            tracing::debug!(%peer, "peer admitted");
        }
        admitted
    }

    // --- reply cache -----------------------------------------------------

    pub(crate) fn cache_begin(&self, key: (SocketAddr, u32)) -> Admission {
        self.reply_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .begin(key)
    }

    pub(crate) fn cache_complete(&self, key: (SocketAddr, u32), reply: Option<Vec<u8>>) {
        self.reply_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .complete(key, reply);
    }

    // --- transport -------------------------------------------------------

    pub(crate) async fn send_datagram(&self, peer: SocketAddr, datagram: &[u8]) {
        if let Some(socket) = self.socket_opt() {
            if let Err(error) = socket.send_to(datagram, peer).await {
                tracing::warn!(%peer, %error, "datagram send failed");
            }
        }
    }

    /// One full transaction: encode, send, wait, retransmit, decode.
    pub(crate) async fn request(
        self: &Arc<Self>,
        peer: SocketAddr,
        opcode: Opcode,
        payload: &Value,
    ) -> Result<Value> {
        self.ensure_running()?;
        let socket = self.socket_opt().ok_or(NomirError::ServiceStopped)?;

        let refs = PeerRefCodec::new(self, peer);
        let body = codec::encode(payload, &refs)?;

        let (tid, mut rx, _guard) = self.tx.register_waiter(peer);
        let datagram = frame::seal(Header::request(tid, opcode), &body)?;

        let retry = &self.cfg.retry;
        let attempts = retry.retransmits + 1;
        for attempt in 0..attempts {
            if attempt > 0 {
                tracing::debug!(%peer, tid, op = %opcode, attempt, "retransmitting");
            }
            socket
                .send_to(&datagram, peer)
                .await
                .map_err(|e| NomirError::PeerUnreachable(format!("{peer}: {e}")))?;

            match tokio::time::timeout(retry.interval(attempt), &mut rx).await {
                Ok(Ok(outcome)) => {
                    let envelope = outcome?;
                    return self.accept_reply(peer, envelope);
                }
                // The sender side vanished without a value: shutdown.
                Ok(Err(_)) => return Err(NomirError::ServiceStopped),
                Err(_elapsed) => continue,
            }
        }
        tracing::debug!(%peer, tid, op = %opcode, "transaction timed out");
        Err(NomirError::Timeout { attempts })
    }

    fn accept_reply(self: &Arc<Self>, peer: SocketAddr, envelope: ReplyEnvelope) -> Result<Value> {
        let refs = PeerRefCodec::new(self, peer);
        let value = codec::decode(&envelope.payload, &refs)?;
        match envelope.opcode {
            Opcode::ReplyOk => Ok(value),
            Opcode::ReplyErr => {
                let items = value
                    .as_list()
                    .map(|l| l.snapshot())
                    .filter(|items| items.len() == 2)
                    .ok_or_else(|| NomirError::malformed(0, "REPLY_ERR payload shape"))?;
                let kind = items[0]
                    .as_int()
                    .and_then(|n| u8::try_from(n).ok())
                    .and_then(nomir_common::ErrorKind::from_u8)
                    .ok_or_else(|| NomirError::malformed(0, "REPLY_ERR kind tag"))?;
                let message = items[1]
                    .as_text()
                    .ok_or_else(|| NomirError::malformed(0, "REPLY_ERR message"))?
                    .to_owned();
                Err(NomirError::from_wire(kind, message))
            }
            other => Err(NomirError::malformed(
                0,
                format!("reply carried request opcode {other}"),
            )),
        }
    }

    /// Fire-and-forget notification (RELEASE, GOODBYE). Best effort: any
    /// failure is logged and swallowed, so this is safe from `Drop`.
    pub(crate) fn notify(self: &Arc<Self>, peer: SocketAddr, opcode: Opcode, payload: &Value) {
        let Some(socket) = self.socket_opt() else {
            return;
        };
        let refs = PeerRefCodec::new(self, peer);
        let body = match codec::encode(payload, &refs) {
            Ok(body) => body,
            Err(error) => {
                tracing::debug!(%peer, op = %opcode, %error, "notify encode failed");
                return;
            }
        };
        let tid = self.tx.allocate_tid();
        match frame::seal(Header::request(tid, opcode), &body) {
            Ok(datagram) => {
                if let Err(error) = socket.try_send_to(&datagram, peer) {
                    tracing::debug!(%peer, op = %opcode, %error, "notify send failed");
                }
            }
            Err(error) => {
                tracing::debug!(%peer, op = %opcode, %error, "notify seal failed");
            }
        }
    }

    pub(crate) fn send_release(self: &Arc<Self>, peer: SocketAddr, id: u64) {
        self.notify(
            peer,
            Opcode::Release,
            &Value::object(RemoteStub { peer, id }),
        );
    }
}

/// Reference fallback bound to one destination peer.
///
/// Encoding: a handle owned by the destination goes out as a receiver-owned
/// reference; everything else (local objects, proxies onto third peers) is
/// exported here and goes out sender-owned. Decoding is the mirror image.
pub(crate) struct PeerRefCodec<'a> {
    svc: &'a Arc<ServiceShared>,
    peer: SocketAddr,
}

impl<'a> PeerRefCodec<'a> {
    pub(crate) fn new(svc: &'a Arc<ServiceShared>, peer: SocketAddr) -> Self {
        Self { svc, peer }
    }
}

impl ReferenceCodec for PeerRefCodec<'_> {
    fn to_reference(&self, value: &Value) -> Result<WireRef> {
        let handle = value.as_handle().ok_or_else(|| {
            NomirError::Unserializable(format!("{} has no wire form", value.type_name()))
        })?;
        if let Some((owner, id)) = handle.remote_ref() {
            if owner == self.peer {
                return Ok(WireRef {
                    origin: RefOrigin::Receiver,
                    id,
                });
            }
        }
        let id = self
            .svc
            .exports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .export_for_wire(handle);
        Ok(WireRef {
            origin: RefOrigin::Sender,
            id,
        })
    }

    fn from_reference(&self, reference: WireRef) -> Result<Value> {
        match reference.origin {
            RefOrigin::Sender => {
                let proxy = self.svc.import_proxy(self.peer, reference.id);
                Ok(Value::Handle(proxy.handle()))
            }
            RefOrigin::Receiver => self
                .svc
                .exports
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(reference.id)
                .map(Value::Handle)
                .ok_or_else(|| NomirError::not_found(format!("object id {}", reference.id))),
        }
    }
}

async fn receive_loop(svc: Arc<ServiceShared>, socket: Arc<UdpSocket>, jobs: mpsc::Sender<Job>) {
    let mut buf = vec![0u8; MAX_DATAGRAM + 64];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(error) => {
                tracing::warn!(%error, "socket receive failed");
                continue;
            }
        };
        let (header, payload) = match Header::parse(&buf[..len]) {
            Ok(parsed) => parsed,
            Err(error) => {
                svc.stats.count_malformed();
                tracing::debug!(%peer, %error, "dropping malformed datagram");
                continue;
            }
        };
        if header.is_reply() {
            let envelope = ReplyEnvelope {
                opcode: header.opcode,
                payload: payload.to_vec(),
            };
            if !svc.tx.complete(peer, header.tid, envelope) {
                svc.stats.count_unknown_tid();
                tracing::debug!(%peer, tid = header.tid, "dropping reply for unknown transaction");
            }
            svc.touch_known_peer(peer);
        } else {
            if !svc.admit(peer) {
                svc.stats.count_denied();
                continue;
            }
            let job = Job {
                peer,
                header,
                payload: payload.to_vec(),
            };
            if jobs.send(job).await.is_err() {
                break;
            }
        }
    }
}

async fn worker_loop(svc: Arc<ServiceShared>, jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        match job {
            Some(job) => dispatch::handle_request(&svc, job).await,
            None => break,
        }
    }
}

/// A nomir peer.
///
/// Cloning shares the underlying state; all clones address the same socket,
/// tables, and lifecycle.
#[derive(Clone)]
pub struct Service {
    shared: Arc<ServiceShared>,
}

impl Service {
    /// Creates an unstarted service that will bind `addr` with the default
    /// authenticator (admit everyone, guard underscore keys).
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_authenticator(addr, Arc::new(DefaultAuthenticator))
    }

    pub fn with_authenticator(addr: SocketAddr, auth: Arc<dyn Authenticator>) -> Self {
        Self::with_config(addr, auth, ServiceConfig::default())
    }

    pub fn with_config(
        addr: SocketAddr,
        auth: Arc<dyn Authenticator>,
        cfg: ServiceConfig,
    ) -> Self {
        let ttl = cfg.reply_cache_ttl;
        Self {
            shared: Arc::new(ServiceShared {
                bind_addr: addr,
                cfg,
                auth,
                state: AtomicU8::new(STATE_UNSTARTED),
                socket: Mutex::new(None),
                local_addr: OnceLock::new(),
                exports: Mutex::new(ExportTable::new()),
                peers: Mutex::new(HashMap::new()),
                tx: Transactions::new(),
                reply_cache: Mutex::new(ReplyCache::new(ttl)),
                stats: ServiceStats::default(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Binds the socket and launches the receiver and the worker pool.
    pub async fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.state() != STATE_UNSTARTED {
            return Err(NomirError::unsupported("service already started"));
        }

        let socket = Arc::new(UdpSocket::bind(shared.bind_addr).await?);
        let local = socket.local_addr()?;
        let _ = shared.local_addr.set(local);
        *shared.socket.lock().unwrap_or_else(|e| e.into_inner()) = Some(socket.clone());

        let workers = shared.cfg.workers.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job>(workers * 64);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        let mut tasks = Vec::with_capacity(workers + 1);
        tasks.push(tokio::spawn(receive_loop(
            shared.clone(),
            socket,
            job_tx,
        )));
        for _ in 0..workers {
            tasks.push(tokio::spawn(worker_loop(shared.clone(), job_rx.clone())));
        }
        *shared.tasks.lock().unwrap_or_else(|e| e.into_inner()) = tasks;

        shared.state.store(STATE_RUNNING, Ordering::Release);
        tracing::info!(addr = %local, workers, "service started");
        Ok(())
    }

    /// Stops the service: tasks are torn down, every outstanding waiter
    /// wakes with `ServiceStopped`, and all tables are released. A stopped
    /// service cannot be restarted; ids never survive it.
    pub async fn stop(&self) {
        let shared = &self.shared;
        if shared
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_STOPPING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = shared.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        shared.tx.abort_all();
        *shared.socket.lock().unwrap_or_else(|e| e.into_inner()) = None;
        shared
            .peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        shared
            .reply_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        shared
            .exports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        shared.state.store(STATE_STOPPED, Ordering::Release);
        tracing::info!("service stopped");
    }

    /// Publishes `object` under `name`. Permitted before start and while
    /// running; re-registering a name replaces it.
    pub fn register(&self, name: &str, object: Handle) -> Result<u64> {
        match self.shared.state() {
            STATE_UNSTARTED | STATE_RUNNING => Ok(self
                .shared
                .exports
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .register(name, object)),
            _ => Err(NomirError::ServiceStopped),
        }
    }

    /// Removes a public name; the export stays resolvable by id.
    pub fn unregister(&self, name: &str) -> bool {
        self.shared
            .exports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unregister(name)
    }

    /// The locally registered public names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        self.shared.export_names()
    }

    /// Performs the HELLO handshake with `peer` and returns a handle for
    /// name operations against it. Requires the service to be running.
    pub async fn connect(&self, peer: SocketAddr) -> Result<PeerHandle> {
        self.shared.ensure_running()?;
        self.shared.request(peer, Opcode::Hello, &Value::Nil).await?;
        self.shared.ensure_peer(peer);
        Ok(PeerHandle {
            svc: self.shared.clone(),
            addr: peer,
        })
    }

    /// Announces departure to `peer` and forgets everything about it.
    pub fn disconnect(&self, peer: SocketAddr) {
        self.shared.notify(peer, Opcode::Goodbye, &Value::Nil);
        self.shared.forget_peer(peer);
    }

    /// Deterministically releases one imported reference: removes the proxy
    /// from the import table and tells the owner.
    pub fn drop_import(&self, peer: SocketAddr, remote_id: u64) {
        self.shared.forget_import(peer, remote_id);
        self.shared.send_release(peer, remote_id);
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr.get().copied()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state() == STATE_RUNNING
    }

    /// When the given peer was last heard from, if it is known at all.
    pub fn peer_seen(&self, peer: SocketAddr) -> Option<Instant> {
        self.shared.peer_seen(peer)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Number of live export entries; mostly for tests and introspection.
    pub fn export_count(&self) -> usize {
        self.shared.export_count()
    }

    /// Outstanding outbound transactions; mostly for tests and shutdown
    /// diagnostics.
    pub fn outstanding_requests(&self) -> usize {
        self.shared.tx.outstanding()
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("addr", &self.local_addr())
            .field("running", &self.is_running())
            .finish()
    }
}

/// A connected remote peer, produced by [`Service::connect`].
#[derive(Clone)]
pub struct PeerHandle {
    svc: Arc<ServiceShared>,
    addr: SocketAddr,
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle").field("addr", &self.addr).finish()
    }
}

impl PeerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The peer's public names.
    pub async fn list(&self) -> Result<Vec<String>> {
        let reply = self.svc.request(self.addr, Opcode::List, &Value::Nil).await?;
        let items = reply
            .as_list()
            .map(|l| l.snapshot())
            .ok_or_else(|| NomirError::malformed(0, "LIST reply shape"))?;
        items
            .into_iter()
            .map(|item| {
                item.as_text()
                    .map(str::to_owned)
                    .ok_or_else(|| NomirError::malformed(0, "LIST reply shape"))
            })
            .collect()
    }

    /// Resolves a public name into a proxy.
    pub async fn resolve(&self, name: &str) -> Result<Proxy> {
        let reply = self
            .svc
            .request(self.addr, Opcode::Resolve, &Value::from(name))
            .await?;
        match reply.as_handle().and_then(|h| h.remote_ref()) {
            Some((peer, id)) => Ok(self.svc.import_proxy(peer, id)),
            None => Err(NomirError::malformed(
                0,
                "RESOLVE reply was not a remote reference",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::DictObject;
    use nomir_common::Dict;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn config_defaults_are_sane() {
        let cfg = ServiceConfig::default();
        assert!(cfg.workers >= 2);
        assert!(cfg.reply_cache_ttl > cfg.retry.window());
    }

    #[test]
    fn registration_is_permitted_before_start() {
        let service = Service::new(loopback());
        let id = service
            .register("m", DictObject::handle(Dict::new()))
            .unwrap();
        assert_eq!(service.list_names(), vec!["m".to_string()]);
        assert!(id > 0);
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn connect_requires_running() {
        let service = Service::new(loopback());
        let err = service.connect(loopback()).await.unwrap_err();
        assert!(matches!(err, NomirError::ServiceStopped));
    }

    #[tokio::test]
    async fn lifecycle_unstarted_running_stopped() {
        let service = Service::new(loopback());
        assert!(!service.is_running());

        service.start().await.unwrap();
        assert!(service.is_running());
        assert!(service.local_addr().is_some());

        // Double start is rejected.
        assert!(service.start().await.is_err());

        service.stop().await;
        assert!(!service.is_running());

        // No restart: ids and references never survive a stop.
        assert!(service.start().await.is_err());
        assert!(matches!(
            service.register("late", DictObject::handle(Dict::new())),
            Err(NomirError::ServiceStopped)
        ));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let service = Service::new(loopback());
        service.start().await.unwrap();
        service.stop().await;
        service.stop().await;
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn stats_start_at_zero() {
        let service = Service::new(loopback());
        assert_eq!(service.stats(), StatsSnapshot::default());
    }
}
