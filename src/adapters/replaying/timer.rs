//! One background thread that fires the completion deadlines of every
//! simulated process.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError, Weak};
use std::thread;
use std::time::Instant;

/// Something that wants to be told when its deadline passes.
pub(crate) trait Deadline: Send + Sync {
    /// Called on the scheduler thread once the deadline has passed.
    fn fire(&self);
}

struct Entry {
    at: Instant,
    seq: u64,
    target: Weak<dyn Deadline>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the max-heap pops the earliest deadline first; ties fire
    // in scheduling order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

/// Shared deadline queue drained by a single detached thread.
///
/// Entries hold only weak references, so a dropped process is skipped
/// rather than kept alive.
pub(crate) struct CompletionScheduler {
    queue: Arc<(Mutex<Queue>, Condvar)>,
}

impl CompletionScheduler {
    /// The process-wide scheduler, started on first use.
    pub(crate) fn global() -> &'static Self {
        static SCHEDULER: OnceLock<CompletionScheduler> = OnceLock::new();
        SCHEDULER.get_or_init(Self::start)
    }

    fn start() -> Self {
        let queue: Arc<(Mutex<Queue>, Condvar)> = Arc::default();
        let worker = Arc::clone(&queue);
        let spawned = thread::Builder::new()
            .name("procvcr-timer".into())
            .spawn(move || run(&worker));
        if let Err(e) = spawned {
            // Waiters and pollers still complete lazily at their deadline.
            tracing::warn!(error = %e, "failed to start completion timer thread");
        }
        Self { queue }
    }

    /// Fires `target` once `at` has passed.
    pub(crate) fn schedule(&self, at: Instant, target: Weak<dyn Deadline>) {
        let (lock, wake) = &*self.queue;
        let mut queue = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Entry { at, seq, target });
        wake.notify_one();
    }
}

fn run(queue: &(Mutex<Queue>, Condvar)) {
    let (lock, wake) = queue;
    let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        let now = Instant::now();
        let mut due = Vec::new();
        while guard.heap.peek().is_some_and(|entry| entry.at <= now) {
            if let Some(entry) = guard.heap.pop() {
                due.push(entry.target);
            }
        }

        if !due.is_empty() {
            drop(guard);
            for target in due.iter().filter_map(Weak::upgrade) {
                target.fire();
            }
            guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            continue;
        }

        guard = match guard.heap.peek().map(|entry| entry.at) {
            Some(at) => {
                wake.wait_timeout(guard, at.saturating_duration_since(now))
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => wake.wait(guard).unwrap_or_else(PoisonError::into_inner),
        };
    }
}
