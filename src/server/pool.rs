//! Bookkeeping for the worker pool. No syscalls here; the supervisor feeds
//! it pids and timestamps and acts on what it reports.

use std::time::{Duration, Instant};

/// One live worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    pub pid: i32,
    pub spawned_at: Instant,
    pub last_heartbeat: Instant,
}

impl WorkerRecord {
    pub fn heartbeat_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat)
    }
}

/// Desired size plus the actual workers, in spawn order.
#[derive(Debug)]
pub struct Pool {
    desired: usize,
    workers: Vec<WorkerRecord>,
}

impl Pool {
    pub fn new(desired: usize) -> Self {
        Self {
            desired: desired.max(1),
            workers: Vec::with_capacity(desired),
        }
    }

    pub fn desired(&self) -> usize {
        self.desired
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn workers(&self) -> &[WorkerRecord] {
        &self.workers
    }

    pub fn pids(&self) -> Vec<i32> {
        self.workers.iter().map(|w| w.pid).collect()
    }

    /// Records a freshly forked worker. Its heartbeat clock starts now.
    pub fn add(&mut self, pid: i32, now: Instant) {
        self.workers.push(WorkerRecord {
            pid,
            spawned_at: now,
            last_heartbeat: now,
        });
    }

    /// Refreshes a worker's heartbeat. Unknown pids (already reaped) are
    /// ignored and reported as `false`.
    pub fn heartbeat(&mut self, pid: i32, now: Instant) -> bool {
        match self.workers.iter_mut().find(|w| w.pid == pid) {
            Some(worker) => {
                worker.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, pid: i32) -> Option<WorkerRecord> {
        let index = self.workers.iter().position(|w| w.pid == pid)?;
        Some(self.workers.remove(index))
    }

    /// Workers whose last heartbeat is older than `timeout`.
    pub fn stale(&self, now: Instant, timeout: Duration) -> Vec<WorkerRecord> {
        self.workers
            .iter()
            .filter(|w| w.heartbeat_age(now) > timeout)
            .cloned()
            .collect()
    }

    /// How many workers must be spawned to reach the desired size.
    pub fn deficit(&self) -> usize {
        self.desired.saturating_sub(self.workers.len())
    }

    /// Pids above the desired size, most recently spawned first.
    pub fn excess(&self) -> Vec<i32> {
        let extra = self.workers.len().saturating_sub(self.desired);
        self.workers.iter().rev().take(extra).map(|w| w.pid).collect()
    }

    pub fn increase(&mut self) -> usize {
        self.desired += 1;
        self.desired
    }

    /// Lowers the desired size by one, never below one.
    pub fn decrease(&mut self) -> usize {
        if self.desired > 1 {
            self.desired -= 1;
        }
        self.desired
    }
}
