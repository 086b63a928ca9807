//! Request/reply bookkeeping over the datagram socket.
//!
//! Outbound: each request takes a fresh tid and installs a oneshot waiter
//! keyed by (peer, tid); the receiver task completes the waiter when a reply
//! with that tid arrives. Inbound: a reply cache keyed the same way makes
//! duplicate delivery idempotent: a retransmitted request re-emits the
//! cached reply instead of executing twice.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use nomir_common::{NomirError, Opcode, Result};
use tokio::sync::oneshot;

/// A raw reply as taken off the socket; the initiator decodes the payload on
/// its own stack.
#[derive(Debug)]
pub(crate) struct ReplyEnvelope {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

pub(crate) type TxOutcome = Result<ReplyEnvelope>;

/// Retransmission schedule for one transaction.
///
/// The first send is followed by up to `retransmits` re-sends of the same
/// datagram; the wait doubles each time, with a little jitter so synchronized
/// peers do not retransmit in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retransmits: u32,
    pub initial_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retransmits: 3,
            initial_interval: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(retransmits: u32, initial_interval: Duration) -> Self {
        Self {
            retransmits,
            initial_interval,
        }
    }

    /// Wait before the next retransmission (or the final timeout) after the
    /// given 0-based attempt.
    pub fn interval(&self, attempt: u32) -> Duration {
        let base = self
            .initial_interval
            .saturating_mul(1u32 << attempt.min(16));
        let jitter_budget = (base.as_millis() as u64) / 10;
        let jitter = if jitter_budget > 0 {
            rand::random::<u64>() % jitter_budget
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }

    /// Upper bound on the whole retry window, jitter included.
    pub fn window(&self) -> Duration {
        let mut total = Duration::ZERO;
        for attempt in 0..=self.retransmits {
            total += self.interval(attempt);
        }
        total + total / 10
    }
}

/// Outbound transaction state shared by all callers of one service.
pub(crate) struct Transactions {
    next_tid: AtomicU32,
    waiters: Mutex<HashMap<(SocketAddr, u32), oneshot::Sender<TxOutcome>>>,
}

impl Transactions {
    pub fn new() -> Self {
        Self {
            next_tid: AtomicU32::new(1),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn allocate_tid(&self) -> u32 {
        self.next_tid.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocates a tid and installs a waiter for it. The returned guard
    /// removes the waiter when dropped, so a caller that times out or is
    /// cancelled leaves nothing behind; a late reply then counts as unknown.
    pub fn register_waiter(
        &self,
        peer: SocketAddr,
    ) -> (u32, oneshot::Receiver<TxOutcome>, WaiterGuard<'_>) {
        let tid = self.allocate_tid();
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((peer, tid), tx);
        (
            tid,
            rx,
            WaiterGuard {
                transactions: self,
                key: (peer, tid),
            },
        )
    }

    /// Delivers a reply to its waiter. Returns false when no waiter is
    /// registered under (peer, tid), i.e. a late or forged reply.
    pub fn complete(&self, peer: SocketAddr, tid: u32, envelope: ReplyEnvelope) -> bool {
        let sender = self
            .waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(peer, tid));
        match sender {
            Some(tx) => tx.send(Ok(envelope)).is_ok(),
            None => false,
        }
    }

    /// Wakes every outstanding waiter with `ServiceStopped`.
    pub fn abort_all(&self) {
        let drained: Vec<_> = {
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            waiters.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(NomirError::ServiceStopped));
        }
    }

    pub fn outstanding(&self) -> usize {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn forget(&self, key: (SocketAddr, u32)) {
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }
}

/// Cancel handle for one installed waiter.
pub(crate) struct WaiterGuard<'a> {
    transactions: &'a Transactions,
    key: (SocketAddr, u32),
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.transactions.forget(self.key);
    }
}

/// How the dispatcher should treat an inbound (peer, tid).
pub(crate) enum Admission {
    /// First sighting: execute.
    New,
    /// Execution already running; drop the duplicate, the initiator's next
    /// retransmit will find the cached reply.
    InFlight,
    /// Already executed; re-emit the cached datagram (None for ops that
    /// never reply).
    Replay(Option<Vec<u8>>),
}

enum SlotState {
    Pending,
    Done(Option<Vec<u8>>),
}

struct Slot {
    state: SlotState,
    at: Instant,
}

/// Short-lived cache of replies, keyed by (peer, tid).
///
/// The TTL must exceed the initiator's whole retry window, otherwise a
/// retransmit could arrive after the slot expired and execute again.
pub(crate) struct ReplyCache {
    slots: HashMap<(SocketAddr, u32), Slot>,
    ttl: Duration,
}

impl ReplyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            ttl,
        }
    }

    pub fn begin(&mut self, key: (SocketAddr, u32)) -> Admission {
        self.sweep(Instant::now());
        match self.slots.get(&key) {
            Some(slot) => match &slot.state {
                SlotState::Pending => Admission::InFlight,
                SlotState::Done(reply) => Admission::Replay(reply.clone()),
            },
            None => {
                self.slots.insert(
                    key,
                    Slot {
                        state: SlotState::Pending,
                        at: Instant::now(),
                    },
                );
                Admission::New
            }
        }
    }

    pub fn complete(&mut self, key: (SocketAddr, u32), reply: Option<Vec<u8>>) {
        self.slots.insert(
            key,
            Slot {
                state: SlotState::Done(reply),
                at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    fn sweep(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.slots
            .retain(|_, slot| now.duration_since(slot.at) < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn tids_are_unique() {
        let tx = Transactions::new();
        let a = tx.allocate_tid();
        let b = tx.allocate_tid();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn complete_reaches_the_waiter() {
        let tx = Transactions::new();
        let (tid, rx, _guard) = tx.register_waiter(peer());
        assert!(tx.complete(
            peer(),
            tid,
            ReplyEnvelope {
                opcode: Opcode::ReplyOk,
                payload: vec![1]
            }
        ));
        let envelope = rx.await.unwrap().unwrap();
        assert_eq!(envelope.payload, vec![1]);
        assert_eq!(tx.outstanding(), 0);
    }

    #[test]
    fn unknown_tid_is_reported() {
        let tx = Transactions::new();
        assert!(!tx.complete(
            peer(),
            99,
            ReplyEnvelope {
                opcode: Opcode::ReplyOk,
                payload: vec![]
            }
        ));
    }

    #[tokio::test]
    async fn guard_removes_the_waiter() {
        let tx = Transactions::new();
        let tid = {
            let (tid, _rx, _guard) = tx.register_waiter(peer());
            tid
        };
        assert_eq!(tx.outstanding(), 0);
        assert!(!tx.complete(
            peer(),
            tid,
            ReplyEnvelope {
                opcode: Opcode::ReplyOk,
                payload: vec![]
            }
        ));
    }

    #[tokio::test]
    async fn abort_wakes_waiters_with_stopped() {
        let tx = Transactions::new();
        let (_tid, rx, _guard) = tx.register_waiter(peer());
        tx.abort_all();
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, Err(NomirError::ServiceStopped)));
    }

    #[test]
    fn intervals_double_with_bounded_jitter() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        for attempt in 0..4 {
            let base = 100u64 << attempt;
            let interval = policy.interval(attempt).as_millis() as u64;
            assert!(interval >= base, "attempt {attempt}: {interval} < {base}");
            assert!(
                interval < base + base / 10 + 1,
                "attempt {attempt}: {interval} too jittered"
            );
        }
    }

    #[test]
    fn retry_window_covers_all_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100));
        // 100 + 200 + 400 = 700 before jitter.
        assert!(policy.window() >= Duration::from_millis(700));
    }

    #[test]
    fn reply_cache_admission_lifecycle() {
        let key = (peer(), 7);
        let mut cache = ReplyCache::new(Duration::from_secs(10));

        assert!(matches!(cache.begin(key), Admission::New));
        assert!(matches!(cache.begin(key), Admission::InFlight));

        cache.complete(key, Some(vec![0xAA]));
        match cache.begin(key) {
            Admission::Replay(Some(bytes)) => assert_eq!(bytes, vec![0xAA]),
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn reply_cache_replays_no_reply_ops() {
        let key = (peer(), 8);
        let mut cache = ReplyCache::new(Duration::from_secs(10));
        assert!(matches!(cache.begin(key), Admission::New));
        cache.complete(key, None);
        assert!(matches!(cache.begin(key), Admission::Replay(None)));
    }

    #[test]
    fn reply_cache_expires_after_ttl() {
        let key = (peer(), 9);
        let mut cache = ReplyCache::new(Duration::from_millis(5));
        assert!(matches!(cache.begin(key), Admission::New));
        cache.complete(key, Some(vec![1]));
        std::thread::sleep(Duration::from_millis(10));
        assert!(matches!(cache.begin(key), Admission::New));
        assert_eq!(cache.len(), 1);
    }
}
