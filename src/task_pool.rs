//! Task pool capability: deferred and periodic job scheduling
//! (SPEC_FULL.md §5). The crate drives this trait for ack deadlines,
//! reconnect backoffs, sequencer timeouts, regulator ticks, and the
//! microphone pump — it does not implement a thread pool itself.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Opaque handle to a scheduled job, returned by `TaskPool::schedule_after`
/// and `schedule_periodic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobHandle(u64);

pub trait TaskPool: Send + Sync {
    /// Run `job` once, `delay_ms` from now.
    fn schedule_after(&self, delay_ms: u64, job: Box<dyn FnOnce() + Send>) -> JobHandle;
    /// Run `job` every `period_ms`, starting `period_ms` from now.
    fn schedule_periodic(&self, period_ms: u64, job: Arc<dyn Fn() + Send + Sync>) -> JobHandle;
    /// Cancel a pending or periodic job. Returns `false` if it already ran
    /// (one-shot) or was already cancelled.
    fn try_cancel(&self, handle: JobHandle) -> bool;
}

pub type ArcTaskPool = Arc<dyn TaskPool>;

enum Job {
    Once(Option<Box<dyn FnOnce() + Send>>),
    Periodic { period_ms: u64, job: Arc<dyn Fn() + Send + Sync> },
}

struct Scheduled {
    due_at_ms: u64,
    job: Job,
}

/// In-memory, single-threaded `TaskPool` driven explicitly by `advance()` —
/// provided for tests only, mirroring how a host wires a real scheduler
/// without this crate depending on one.
#[cfg(test)]
pub struct ManualTaskPool {
    now_ms: Mutex<u64>,
    next_id: AtomicU64,
    jobs: Mutex<BTreeMap<u64, Scheduled>>,
}

#[cfg(test)]
impl ManualTaskPool {
    pub fn new() -> Self {
        Self {
            now_ms: Mutex::new(0),
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn now(&self) -> u64 {
        *self.now_ms.lock().unwrap()
    }

    /// Advance the clock and run every job whose deadline has passed, in
    /// deadline order. Periodic jobs reschedule themselves for `period_ms`
    /// after the deadline they just fired at.
    pub fn advance(&self, delta_ms: u64) {
        let target = {
            let mut now = self.now_ms.lock().unwrap();
            *now += delta_ms;
            *now
        };
        loop {
            let due = {
                let jobs = self.jobs.lock().unwrap();
                jobs.iter()
                    .find(|(_, s)| s.due_at_ms <= target)
                    .map(|(id, s)| (*id, s.due_at_ms))
            };
            let Some((id, due_at)) = due else { break };
            let job = {
                let mut jobs = self.jobs.lock().unwrap();
                jobs.remove(&id)
            };
            let Some(mut scheduled) = job else { continue };
            match &mut scheduled.job {
                Job::Once(slot) => {
                    if let Some(f) = slot.take() {
                        f();
                    }
                }
                Job::Periodic { period_ms, job } => {
                    job();
                    let period_ms = *period_ms;
                    let job = job.clone();
                    self.jobs.lock().unwrap().insert(
                        id,
                        Scheduled {
                            due_at_ms: due_at + period_ms,
                            job: Job::Periodic { period_ms, job },
                        },
                    );
                }
            }
        }
    }
}

#[cfg(test)]
impl TaskPool for ManualTaskPool {
    fn schedule_after(&self, delay_ms: u64, job: Box<dyn FnOnce() + Send>) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let due_at_ms = self.now() + delay_ms;
        self.jobs.lock().unwrap().insert(
            id,
            Scheduled {
                due_at_ms,
                job: Job::Once(Some(job)),
            },
        );
        JobHandle(id)
    }

    fn schedule_periodic(&self, period_ms: u64, job: Arc<dyn Fn() + Send + Sync>) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let due_at_ms = self.now() + period_ms;
        self.jobs.lock().unwrap().insert(
            id,
            Scheduled {
                due_at_ms,
                job: Job::Periodic { period_ms, job },
            },
        );
        JobHandle(id)
    }

    fn try_cancel(&self, handle: JobHandle) -> bool {
        self.jobs.lock().unwrap().remove(&handle.0).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn schedule_after_fires_once_at_deadline() {
        let pool = ManualTaskPool::new();
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        pool.schedule_after(100, Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        pool.advance(50);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        pool.advance(50);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        pool.advance(1000);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn try_cancel_prevents_firing() {
        let pool = ManualTaskPool::new();
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let handle = pool.schedule_after(100, Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(pool.try_cancel(handle));
        pool.advance(200);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn schedule_periodic_fires_repeatedly() {
        let pool = ManualTaskPool::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        pool.schedule_periodic(10, Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        pool.advance(35);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
