/*!
Bounded outbound buffer between the decision loops and the sink dispatcher
*/

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::core::{
    events::OutputEvent,
    output_plugins::OutputManager,
    stats::GovernorStats,
};

/// Drop-oldest queue of events waiting for the sink.
///
/// Pushing never blocks, so a slow sink cannot stall a decision loop. Gaps left by
/// dropped events are refilled by the next poll cycle through the idempotent upserts.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    buffer: Mutex<VecDeque<OutputEvent>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    stats: Option<Arc<GovernorStats>>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// Queue that also reports every drop to the process counters as it happens
    pub fn with_stats(capacity: usize, stats: Arc<GovernorStats>) -> Self {
        Self::build(capacity, Some(stats))
    }

    fn build(capacity: usize, stats: Option<Arc<GovernorStats>>) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                stats,
            }),
        }
    }

    /// Enqueue an event, evicting the oldest unsent one when full.
    ///
    /// Returns `false` when an event had to be dropped.
    pub fn push(&self, event: OutputEvent) -> bool {
        let evicted = {
            let mut buffer = self.buffer();
            let evicted = if buffer.len() >= self.shared.capacity {
                buffer.pop_front()
            } else {
                None
            };
            buffer.push_back(event);
            evicted
        };
        self.shared.notify.notify_one();

        match evicted {
            Some(oldest) => {
                let total = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(stats) = &self.shared.stats {
                    stats.record_outbound_drop();
                }
                warn!(
                    world_id = oldest.world_id(),
                    dropped_total = total,
                    "outbound buffer full, dropped oldest unsent event"
                );
                false
            }
            None => true,
        }
    }

    pub fn try_pop(&self) -> Option<OutputEvent> {
        self.buffer().pop_front()
    }

    /// Wait for the next event; `None` once the queue is closed and empty
    pub async fn pop(&self) -> Option<OutputEvent> {
        loop {
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Stop waiting consumers once the remaining events are drained
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<OutputEvent>> {
        self.shared
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// How hard the dispatcher tries before giving an event up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff * n`
    pub backoff: Duration,
}

/// Drains the outbound queue into the output handlers
pub struct OutboundDispatcher {
    queue: OutboundQueue,
    outputs: OutputManager,
    policy: RetryPolicy,
    stats: Arc<GovernorStats>,
}

impl OutboundDispatcher {
    pub fn new(
        queue: OutboundQueue,
        outputs: OutputManager,
        policy: RetryPolicy,
        stats: Arc<GovernorStats>,
    ) -> Self {
        Self {
            queue,
            outputs,
            policy,
            stats,
        }
    }

    /// Deliver events until the queue is closed and drained, then finalize the handlers
    pub async fn run(mut self) {
        debug!("outbound dispatcher started");
        let mut delivered = 0u64;
        while let Some(event) = self.queue.pop().await {
            let failures = self.outputs.deliver(&event, self.policy).await;
            for failure in failures {
                self.stats.record_sink_failure(&failure);
            }
            delivered += 1;
        }

        if let Err(e) = self.outputs.finalize().await {
            warn!("failed to finalize output handlers: {}", e);
        }
        info!(delivered, "outbound dispatcher stopped");
    }
}
