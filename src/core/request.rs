//! Request envelope and fan-in synchronization
//!
//! A request is shared between the producer that submitted it and the
//! connection tasks that complete it; the response slot is written exactly
//! once, after which the optional group and batch counters are decremented.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::BackendError;
use crate::resp::RespValue;

/// Completion value attached to a request: either a decoded response frame
/// (error frames included) or a connection-level failure.
pub type Reply = Result<RespValue, BackendError>;

/// Counting barrier with WaitGroup semantics.
///
/// `add` raises the pending count, `done` lowers it, and `wait` resolves
/// once it reaches zero. Completing more times than added is a programming
/// error and panics.
#[derive(Clone, Default)]
pub struct Batch {
    inner: Arc<BatchInner>,
}

#[derive(Default)]
struct BatchInner {
    pending: AtomicUsize,
    zero: Notify,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        self.inner.pending.fetch_add(n, Ordering::AcqRel);
    }

    pub fn done(&self) {
        let prev = self.inner.pending.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "batch completed more times than it was added to");
        if prev == 1 {
            self.inner.zero.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Resolve once the pending count reaches zero.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.zero.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// One command on its way to a backend.
pub struct Request {
    /// Multi-bulk frames forming the command.
    pub multi: Vec<RespValue>,

    read_only: bool,
    broken: Option<Arc<AtomicBool>>,
    batch: Option<Batch>,
    group: Option<Batch>,

    reply: Mutex<Option<Reply>>,
    done: Notify,
}

impl Request {
    pub fn new(multi: Vec<RespValue>) -> Self {
        Self {
            multi,
            read_only: false,
            broken: None,
            batch: None,
            group: None,
            reply: Mutex::new(None),
            done: Notify::new(),
        }
    }

    /// Synthetic keep-alive probe, carries no batch or group.
    pub(crate) fn ping() -> Self {
        Request::new(vec![RespValue::bulk("PING")])
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Attach the session-shared broken flag.
    pub fn with_broken_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.broken = Some(flag);
        self
    }

    pub fn with_batch(mut self, batch: Batch) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_group(mut self, group: Batch) -> Self {
        self.group = Some(group);
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_broken(&self) -> bool {
        self.broken
            .as_ref()
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub(crate) fn batch(&self) -> Option<&Batch> {
        self.batch.as_ref()
    }

    /// Attach the completion and signal everyone waiting on it.
    pub(crate) fn set_response(&self, reply: Reply) {
        {
            let mut slot = self.reply.lock().unwrap();
            debug_assert!(slot.is_none(), "request completed twice");
            *slot = Some(reply);
        }
        self.done.notify_waiters();
        if let Some(group) = &self.group {
            group.done();
        }
        if let Some(batch) = &self.batch {
            batch.done();
        }
    }

    /// The completion value, if one has been attached yet.
    pub fn response(&self) -> Option<Reply> {
        self.reply.lock().unwrap().clone()
    }

    pub fn is_done(&self) -> bool {
        self.reply.lock().unwrap().is_some()
    }

    /// Resolve once a completion has been attached.
    pub async fn wait(&self) {
        loop {
            let notified = self.done.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("multi", &self.multi.len())
            .field("read_only", &self.read_only)
            .field("done", &self.is_done())
            .finish()
    }
}
