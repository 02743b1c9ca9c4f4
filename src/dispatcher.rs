// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Priority Dispatcher: a single consumer loop draining a min-heap keyed so
//! that high-priority submissions run newest-first and low-priority ones
//! run oldest-first, with all high-priority work draining before any
//! low-priority work submitted before it. Exactly one request is in flight
//! at a time — this is the one place in the gateway where SNMP traffic is
//! serialized.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicI64, Ordering as AtomicOrdering},
};

use tokio::sync::mpsc;
use tracing::{debug, info};

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send>>;

struct QueueItem {
    priority_key: i64,
    seq: u64,
    job: BoxedJob,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority_key == other.priority_key && self.seq == other.seq
    }
}
impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    /// `BinaryHeap` is a max-heap; reversing the natural `(priority_key,
    /// seq)` comparison turns it into the min-heap the ordering rule needs.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority_key, other.seq).cmp(&(self.priority_key, self.seq))
    }
}

/// Submission handle shared by every producer (serial supervisor, scheduler
/// jobs, cycle-synthesis sleeps). Cloning is cheap; the counter and channel
/// are shared across clones.
#[derive(Clone)]
pub struct Dispatcher {
    counter: std::sync::Arc<AtomicI64>,
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl Dispatcher {
    /// Spawns the consumer loop and returns the submission handle. The loop
    /// runs until every sender clone is dropped.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueueItem>();
        let dispatcher = Dispatcher {
            counter: std::sync::Arc::new(AtomicI64::new(0)),
            tx,
        };

        tokio::spawn(async move {
            let mut heap = BinaryHeap::new();
            loop {
                // Drain everything currently queued before picking the
                // minimum, so a burst of submissions is ordered correctly
                // rather than processed in arrival order.
                while let Ok(item) = rx.try_recv() {
                    heap.push(item);
                }
                if let Some(item) = heap.pop() {
                    debug!(priority_key = item.priority_key, seq = item.seq, "dispatcher popped item");
                    item.job.await;
                    continue;
                }
                match rx.recv().await {
                    Some(item) => heap.push(item),
                    None => {
                        info!("dispatcher channel closed, consumer loop exiting");
                        break;
                    },
                }
            }
        });

        dispatcher
    }

    /// Non-blocking; never rejects. `high_priority` requests drain ahead of
    /// every low-priority request submitted before them, and newest-first
    /// among themselves; low-priority requests stay FIFO.
    pub fn submit<F>(&self, high_priority: bool, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let n = self.counter.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        let priority_key = if high_priority { -n } else { n };
        let _ = self.tx.send(QueueItem {
            priority_key,
            seq: n as u64,
            job: Box::pin(job),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[tokio::test]
    async fn high_priority_drains_newest_first_ahead_of_low_priority() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::spawn();

        let record = |order: Arc<Mutex<Vec<&'static str>>>, label: &'static str| async move {
            order.lock().expect("test mutex poisoned").push(label);
        };

        dispatcher.submit(false, record(order.clone(), "low-1"));
        dispatcher.submit(false, record(order.clone(), "low-2"));
        dispatcher.submit(true, record(order.clone(), "high-1"));
        dispatcher.submit(true, record(order.clone(), "high-2"));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let observed = order.lock().expect("test mutex poisoned").clone();
        assert_eq!(observed, vec!["high-2", "high-1", "low-1", "low-2"]);
    }
}
