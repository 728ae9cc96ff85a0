use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::RwLock;

use uuid::Uuid;

use crate::error::Result;
use crate::record::Record;

struct Entry {
    payload: String,
    ips: HashSet<IpAddr>,
    macs: HashSet<String>,
}

/// The primary map plus both secondary indexes, guarded by a single
/// reader-writer lock so that an `Add` never observes `byIP`/`byMAC` in
/// a state that doesn't correspond to `primary`.
struct StoreInner {
    primary: HashMap<Uuid, Entry>,
    by_ip: HashMap<IpAddr, Uuid>,
    by_mac: HashMap<String, Uuid>,
}

impl StoreInner {
    fn new() -> Self {
        StoreInner {
            primary: HashMap::new(),
            by_ip: HashMap::new(),
            by_mac: HashMap::new(),
        }
    }
}

/// The in-memory hardware cache. Cheap to clone (an `Arc` internally is
/// not required here since the lock itself is shared via `Arc<Store>`
/// by callers), but never held across network I/O — callers take the
/// lock, copy what they need, and release it before doing anything that
/// can block on the network.
pub struct Store {
    inner: RwLock<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            inner: RwLock::new(StoreInner::new()),
        }
    }

    /// Decode `payload`, then replace (or delete, if its state is
    /// `"deleted"`) the record for its id. Returns the id on success.
    ///
    /// Secondary index entries are only removed if they still point at
    /// this id afterward — an index entry that a later, concurrent
    /// `Add` for a different id has since overwritten is left alone.
    pub fn add(&self, payload: &str) -> Result<Uuid> {
        let rec = Record::parse(payload)?;
        let id = rec.id;

        let mut inner = self.inner.write().expect("store lock poisoned");

        let old_ips = inner
            .primary
            .get(&id)
            .map(|e| e.ips.clone())
            .unwrap_or_default();
        let old_macs = inner
            .primary
            .get(&id)
            .map(|e| e.macs.clone())
            .unwrap_or_default();

        for ip in &rec.ips {
            inner.by_ip.insert(*ip, id);
        }
        for ip in old_ips.difference(&rec.ips) {
            if inner.by_ip.get(ip) == Some(&id) {
                inner.by_ip.remove(ip);
            }
        }

        for mac in &rec.macs {
            inner.by_mac.insert(mac.clone(), id);
        }
        for mac in old_macs.difference(&rec.macs) {
            if inner.by_mac.get(mac) == Some(&id) {
                inner.by_mac.remove(mac);
            }
        }

        if rec.deleted {
            inner.primary.remove(&id);
        } else {
            inner.primary.insert(
                id,
                Entry {
                    payload: rec.payload,
                    ips: rec.ips,
                    macs: rec.macs,
                },
            );
        }

        Ok(id)
    }

    pub fn by_id(&self, id: &Uuid) -> Option<String> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner.primary.get(id).map(|e| e.payload.clone())
    }

    pub fn by_ip(&self, ip: &IpAddr) -> Option<String> {
        let inner = self.inner.read().expect("store lock poisoned");
        let id = inner.by_ip.get(ip)?;
        inner.primary.get(id).map(|e| e.payload.clone())
    }

    pub fn by_mac(&self, mac: &str) -> Option<String> {
        let inner = self.inner.read().expect("store lock poisoned");
        let id = inner.by_mac.get(mac)?;
        inner.primary.get(id).map(|e| e.payload.clone())
    }

    /// A snapshot of every stored payload, taken under the read lock and
    /// returned after the lock is released — callers iterate the
    /// snapshot, never the lock.
    pub fn all(&self) -> Vec<String> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner.primary.values().map(|e| e.payload.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock poisoned").primary.len()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
