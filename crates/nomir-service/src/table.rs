//! Reference tables: local exports and per-peer imports.
//!
//! The export table is the authoritative map from id to locally owned
//! object. Ids are monotonic and never reused for the lifetime of the
//! service, even after an entry is dropped. Import tables hold weak
//! back-references to proxies so that a proxy nobody holds any more can be
//! reclaimed and a RELEASE sent to its owner.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use nomir_common::Handle;

use crate::proxy::ProxyInner;

fn identity(handle: &Handle) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

pub(crate) struct ExportEntry {
    pub object: Handle,
    /// Advisory count of references shipped to peers, decremented by RELEASE.
    pub refcount: u64,
}

#[derive(Default)]
pub(crate) struct ExportTable {
    next_id: u64,
    entries: HashMap<u64, ExportEntry>,
    by_identity: HashMap<usize, u64>,
    names: HashMap<String, u64>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: exporting the same object twice returns the same id.
    pub fn export(&mut self, handle: &Handle) -> u64 {
        let key = identity(handle);
        if let Some(&id) = self.by_identity.get(&key) {
            return id;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.entries.insert(
            id,
            ExportEntry {
                object: handle.clone(),
                refcount: 0,
            },
        );
        self.by_identity.insert(key, id);
        id
    }

    /// Exports `handle` (if needed) and records one outstanding reference.
    pub fn export_for_wire(&mut self, handle: &Handle) -> u64 {
        let id = self.export(handle);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.refcount += 1;
        }
        id
    }

    /// Binds a public name. Re-registering a taken name replaces the
    /// mapping; the previously named entry stays resolvable by id until its
    /// refcount drains.
    pub fn register(&mut self, name: &str, handle: Handle) -> u64 {
        let id = self.export(&handle);
        self.names.insert(name.to_owned(), id);
        id
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.names.remove(name).is_some()
    }

    pub fn resolve_name(&self, name: &str) -> Option<u64> {
        self.names.get(name).copied()
    }

    pub fn get(&self, id: u64) -> Option<Handle> {
        self.entries.get(&id).map(|e| e.object.clone())
    }

    pub fn id_of(&self, handle: &Handle) -> Option<u64> {
        self.by_identity.get(&identity(handle)).copied()
    }

    /// One peer released one reference. Unnamed entries with no outstanding
    /// references are dropped; their ids are never handed out again.
    pub fn release(&mut self, id: u64) {
        let named = self.names.values().any(|&v| v == id);
        let remove = match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.refcount = entry.refcount.saturating_sub(1);
                entry.refcount == 0 && !named
            }
            None => false,
        };
        if remove {
            if let Some(entry) = self.entries.remove(&id) {
                self.by_identity.remove(&identity(&entry.object));
            }
        }
    }

    pub fn refcount(&self, id: u64) -> Option<u64> {
        self.entries.get(&id).map(|e| e.refcount)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_identity.clear();
        self.names.clear();
    }
}

/// Proxies imported from one remote peer, keyed by the id in that peer's
/// export table. Weak so user code dropping the last strong handle reclaims
/// the proxy.
#[derive(Default)]
pub(crate) struct ImportTable {
    proxies: HashMap<u64, Weak<ProxyInner>>,
}

impl ImportTable {
    pub fn get(&mut self, id: u64) -> Option<Arc<ProxyInner>> {
        match self.proxies.get(&id) {
            Some(weak) => match weak.upgrade() {
                Some(inner) => Some(inner),
                None => {
                    self.proxies.remove(&id);
                    None
                }
            },
            None => None,
        }
    }

    pub fn insert(&mut self, id: u64, inner: &Arc<ProxyInner>) {
        self.proxies.insert(id, Arc::downgrade(inner));
    }

    pub fn remove(&mut self, id: u64) {
        self.proxies.remove(&id);
    }
}
