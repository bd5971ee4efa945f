use rand::Rng;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use pkg_constants::dispatch::{QUEUE_BASE_BACKOFF_MS, QUEUE_MAX_BACKOFF_SECS};

use crate::reconcile::ReconcileRequest;

/// Per-kind work queue.
///
/// Items are enqueued by key and deduplicated; a key being reconciled
/// is never handed out again until `done` is called for it (per-key
/// serialization). An item added while its key is in flight is parked
/// and re-enqueued when the in-flight pass finishes. Failed items come
/// back through `add_rate_limited` with exponential backoff and jitter.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    base_backoff: Duration,
    max_backoff: Duration,
}

struct Inner {
    ready: VecDeque<ReconcileRequest>,
    queued: HashSet<String>,
    delayed: BinaryHeap<Reverse<DelayedItem>>,
    in_flight: HashSet<String>,
    dirty: HashMap<String, ReconcileRequest>,
    retries: HashMap<String, u32>,
    shutdown: bool,
}

struct DelayedItem {
    at: Instant,
    request: ReconcileRequest,
}

impl PartialEq for DelayedItem {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}
impl Eq for DelayedItem {}
impl PartialOrd for DelayedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DelayedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at)
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ready: VecDeque::new(),
                queued: HashSet::new(),
                delayed: BinaryHeap::new(),
                in_flight: HashSet::new(),
                dirty: HashMap::new(),
                retries: HashMap::new(),
                shutdown: false,
            }),
            notify: Notify::new(),
            base_backoff: Duration::from_millis(QUEUE_BASE_BACKOFF_MS),
            max_backoff: Duration::from_secs(QUEUE_MAX_BACKOFF_SECS),
        }
    }

    /// Enqueue a request now. Duplicates of an already-queued key are
    /// dropped; keys currently in flight are parked until `done`.
    pub fn add(&self, request: ReconcileRequest) {
        let mut inner = self.inner.lock().unwrap();
        if inner.shutdown {
            return;
        }
        Self::enqueue_locked(&mut inner, request);
        drop(inner);
        self.notify.notify_one();
    }

    fn enqueue_locked(inner: &mut Inner, request: ReconcileRequest) {
        let key = request.key();
        if inner.in_flight.contains(&key) {
            inner.dirty.insert(key, request);
            return;
        }
        if inner.queued.contains(&key) {
            return;
        }
        inner.queued.insert(key);
        inner.ready.push_back(request);
    }

    /// Enqueue a request after a delay.
    pub fn add_after(&self, request: ReconcileRequest, delay: Duration) {
        let mut inner = self.inner.lock().unwrap();
        if inner.shutdown {
            return;
        }
        inner.delayed.push(Reverse(DelayedItem {
            at: Instant::now() + delay,
            request,
        }));
        drop(inner);
        // Wake a getter so it recomputes its sleep deadline.
        self.notify.notify_one();
    }

    /// Enqueue a failed request with exponential backoff and jitter.
    pub fn add_rate_limited(&self, request: ReconcileRequest) {
        let key = request.key();
        let attempt = {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner.retries.entry(key.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff);
        let jitter = rand::thread_rng().gen_range(0.9..1.1);
        let delay = backoff.mul_f64(jitter);
        debug!("Requeueing {} after {:?} (attempt {})", key, delay, attempt);
        self.add_after(request, delay);
    }

    /// Clear the retry counter after a successful pass.
    pub fn forget(&self, request: &ReconcileRequest) {
        self.inner.lock().unwrap().retries.remove(&request.key());
    }

    pub fn num_retries(&self, request: &ReconcileRequest) -> u32 {
        *self
            .inner
            .lock()
            .unwrap()
            .retries
            .get(&request.key())
            .unwrap_or(&0)
    }

    /// Mark a key's reconcile finished; re-enqueues any parked arrival.
    pub fn done(&self, request: &ReconcileRequest) {
        let mut inner = self.inner.lock().unwrap();
        let key = request.key();
        inner.in_flight.remove(&key);
        if let Some(parked) = inner.dirty.remove(&key) {
            Self::enqueue_locked(&mut inner, parked);
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Items waiting (ready, delayed, or parked).
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.ready.len() + inner.delayed.len() + inner.dirty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting new work. Getters drain the ready list and then
    /// receive `None`.
    pub fn shutdown(&self) {
        self.inner.lock().unwrap().shutdown = true;
        self.notify.notify_waiters();
    }

    /// Wait for the next ready request, marking its key in flight.
    /// Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<ReconcileRequest> {
        loop {
            let wait_until = {
                let mut inner = self.inner.lock().unwrap();

                // Promote fired delayed items.
                let now = Instant::now();
                loop {
                    match inner.delayed.peek() {
                        Some(Reverse(item)) if item.at <= now => {}
                        _ => break,
                    }
                    let Reverse(item) = inner.delayed.pop().expect("peeked item exists");
                    Self::enqueue_locked(&mut inner, item.request);
                }

                if let Some(request) = inner.ready.pop_front() {
                    let key = request.key();
                    inner.queued.remove(&key);
                    inner.in_flight.insert(key);
                    return Some(request);
                }

                if inner.shutdown {
                    return None;
                }

                inner.delayed.peek().map(|rev| rev.0.at)
            };

            match wait_until {
                Some(at) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
