// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Periodic job runner with at-least-once semantics. Jobs are registered
//! under a string name so the Serial Supervisor can individually arm and
//! disarm its reconnect-poll job as it enters and leaves the `ERROR` state,
//! independently of the fixed healthcheck and liveness-keepalive jobs.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info};

type BoxedJob = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Shared job registry. Cloning hands out another handle to the same
/// underlying map, matching how the dispatcher's submission handle is
/// cloned across producers.
#[derive(Clone)]
pub struct Scheduler {
    jobs: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers `name` to run `job` every `period`, replacing any
    /// previously registered job under the same name. Firings never
    /// overlap: a slow firing simply delays the next tick rather than
    /// stacking concurrent invocations (`tokio::time::interval`'s default
    /// `Burst` behavior is accepted here since misses coalesce by design).
    pub async fn register(&self, name: &str, period: Duration, job: BoxedJob) {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                job().await;
            }
        });

        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.insert(name.to_string(), handle) {
            previous.abort();
        }
        info!(job = name, period_secs = period.as_secs_f64(), "scheduler job registered");
    }

    /// Removes `name` if present, aborting its task immediately. A no-op if
    /// the job was never registered or already removed — the reconnect job
    /// in particular is removed the instant reconnection succeeds and may
    /// be asked to remove itself twice in a race with a fresh `ERROR`
    /// transition.
    pub async fn cancel(&self, name: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(handle) = jobs.remove(name) {
            handle.abort();
            debug!(job = name, "scheduler job cancelled");
        }
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.jobs.lock().await.contains_key(name)
    }

    /// Stops every job without waiting for in-flight work, per the
    /// shutdown sequence.
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.lock().await;
        for (name, handle) in jobs.drain() {
            handle.abort();
            debug!(job = name, "scheduler job aborted on shutdown");
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn registered_job_fires_repeatedly() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));

        let counted = count.clone();
        scheduler
            .register(
                "test-job",
                Duration::from_millis(10),
                Box::new(move || {
                    let counted = counted.clone();
                    Box::pin(async move {
                        counted.fetch_add(1, Ordering::Relaxed);
                    })
                }),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(55)).await;
        scheduler.cancel("test-job").await;

        assert!(count.load(Ordering::Relaxed) >= 3);
        assert!(!scheduler.is_registered("test-job").await);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let scheduler = Scheduler::new();
        scheduler.cancel("never-registered").await;
    }
}
