//! Shared, reference-counted backend connections and the per-process pool
//!
//! A `SharedBackendConn` owns a `database x parallel` grid of connections to
//! one address and is handed out by `SharedBackendConnPool` under a
//! hand-managed refcount: the routing layer retains an entry per address it
//! uses and releases it when the address leaves the topology. Callers
//! serialize retain/release ordering at a higher level; the pool's internal
//! lock only guards the map itself.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::config::BackendConfig;
use crate::core::backend::BackendConn;
use crate::utils::split_host_port;

struct PoolInner {
    parallel: usize,
    database: usize,
    entries: Mutex<HashMap<String, Arc<SharedBackendConn>>>,
}

/// Reference-counted grid of connections to one backend address.
pub struct SharedBackendConn {
    addr: String,
    host: String,
    port: String,

    owner: Weak<PoolInner>,
    conns: Vec<Vec<Arc<BackendConn>>>,

    single: Option<Arc<BackendConn>>,

    refcnt: AtomicUsize,
}

impl SharedBackendConn {
    fn new(addr: &str, config: &Arc<BackendConfig>, owner: &Arc<PoolInner>) -> Arc<Self> {
        let (host, port) = match split_host_port(addr) {
            Some(parts) => parts,
            None => {
                error!("split host-port failed, address = {}", addr);
                (String::new(), String::new())
            }
        };

        let conns: Vec<Vec<Arc<BackendConn>>> = (0..owner.database)
            .map(|dbnum| {
                (0..owner.parallel)
                    .map(|_| BackendConn::new(addr, dbnum as u32, config))
                    .collect()
            })
            .collect();

        let single = match (owner.database, owner.parallel) {
            (1, 1) => Some(Arc::clone(&conns[0][0])),
            _ => None,
        };

        Arc::new(Self {
            addr: addr.to_string(),
            host,
            port,
            owner: Arc::downgrade(owner),
            conns,
            single,
            refcnt: AtomicUsize::new(1),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Take another reference to this entry.
    pub fn retain(self: &Arc<Self>) -> Arc<Self> {
        let prev = self.refcnt.fetch_add(1, Ordering::AcqRel);
        assert!(prev > 0, "shared backend conn has been closed");
        Arc::clone(self)
    }

    /// Drop one reference. The final release closes every owned connection
    /// and removes the entry from its pool.
    pub fn release(&self) {
        let prev = self.refcnt.fetch_sub(1, Ordering::AcqRel);
        assert!(
            prev > 0,
            "shared backend conn has been closed, close too many times"
        );
        if prev != 1 {
            return;
        }
        for row in &self.conns {
            for bc in row {
                bc.close();
            }
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.entries.lock().unwrap().remove(&self.addr);
        } else {
            warn!(
                "shared backend conn to {} released after its pool",
                self.addr
            );
        }
    }

    /// Probe every owned connection.
    pub fn keep_alive(&self) {
        for row in &self.conns {
            for bc in row {
                bc.keep_alive();
            }
        }
    }

    /// Pick one connection for `dbnum`.
    ///
    /// Scans the database's slots starting after `seed` and returns the
    /// first connected one. With `must`, slot 0 is returned even when
    /// nothing is connected, so the caller's send surfaces a real error
    /// instead of a silent drop.
    pub fn backend_conn(&self, dbnum: usize, seed: usize, must: bool) -> Option<Arc<BackendConn>> {
        if let Some(bc) = &self.single {
            if must || bc.is_connected() {
                return Some(Arc::clone(bc));
            }
            return None;
        }

        let conns = &self.conns[dbnum];
        let mut i = seed;
        for _ in 0..conns.len() {
            i = (i + 1) % conns.len();
            if conns[i].is_connected() {
                return Some(Arc::clone(&conns[i]));
            }
        }
        if !must {
            return None;
        }
        Some(Arc::clone(&conns[0]))
    }

    #[cfg(test)]
    fn refcnt(&self) -> usize {
        self.refcnt.load(Ordering::Acquire)
    }
}

/// Address-keyed registry of shared backend connections.
pub struct SharedBackendConnPool {
    inner: Arc<PoolInner>,
}

impl SharedBackendConnPool {
    /// Build an empty pool; `parallel` and `database` are clamped to at
    /// least 1.
    pub fn new(parallel: usize, database: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                parallel: parallel.max(1),
                database: database.max(1),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn parallel(&self) -> usize {
        self.inner.parallel
    }

    pub fn database(&self) -> usize {
        self.inner.database
    }

    /// The current entry for `addr`, without touching its refcount.
    pub fn get(&self, addr: &str) -> Option<Arc<SharedBackendConn>> {
        self.inner.entries.lock().unwrap().get(addr).cloned()
    }

    /// Retain the entry for `addr`, building it (and starting its
    /// `database x parallel` connections) on first use.
    pub fn retain(&self, addr: &str, config: &Arc<BackendConfig>) -> Arc<SharedBackendConn> {
        if let Some(entry) = self.get(addr) {
            return entry.retain();
        }
        let entry = SharedBackendConn::new(addr, config, &self.inner);
        self.inner
            .entries
            .lock()
            .unwrap()
            .insert(addr.to_string(), Arc::clone(&entry));
        entry
    }

    /// Probe every connection of every entry.
    pub fn keep_alive(&self) {
        let entries: Vec<Arc<SharedBackendConn>> = self
            .inner
            .entries
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        for entry in entries {
            entry.keep_alive();
        }
    }

    /// Broadcast keep-alive on a fixed period until the handle is aborted.
    pub fn spawn_keepalive(&self, period: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let entries: Vec<Arc<SharedBackendConn>> =
                    inner.entries.lock().unwrap().values().cloned().collect();
                for entry in entries {
                    entry.keep_alive();
                }
            }
        })
    }
}
