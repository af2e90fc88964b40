//! The message bus connecting channel adapters, the agent worker, the cron
//! scheduler, and subagents.
//!
//! Two bounded MPMC queues (inbound, outbound) each mirrored by a counting
//! semaphore that tracks occupancy. Publishing never drops: a full queue is
//! retried with yield-then-sleep backoff. Consuming blocks on the semaphore.
//! A dispatcher task fans outbound envelopes out to the subscribers
//! registered for the envelope's channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::envelope::{InboundEnvelope, OutboundEnvelope};
use crate::queue::ArrayQueue;
use crate::Result;

/// Callback invoked by the dispatcher for each outbound envelope whose
/// channel matches the subscription. Errors are logged and swallowed.
pub type OutboundSubscriber =
    Arc<dyn Fn(OutboundEnvelope) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub const QUEUE_CAPACITY: usize = 1024;

pub struct MessageBus {
    inbound: ArrayQueue<InboundEnvelope>,
    outbound: ArrayQueue<OutboundEnvelope>,
    inbound_sem: Semaphore,
    outbound_sem: Semaphore,
    subscribers: Mutex<HashMap<String, Vec<OutboundSubscriber>>>,
    dispatcher_running: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inbound: ArrayQueue::new(QUEUE_CAPACITY),
            outbound: ArrayQueue::new(QUEUE_CAPACITY),
            inbound_sem: Semaphore::new(0),
            outbound_sem: Semaphore::new(0),
            subscribers: Mutex::new(HashMap::new()),
            dispatcher_running: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
        }
    }

    async fn backoff(spins: &mut u32) {
        if *spins < 64 {
            *spins += 1;
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(Duration::from_micros(100)).await;
        }
    }

    /// Publish an inbound envelope. Retries with backoff on a full queue;
    /// never drops.
    pub async fn publish_inbound(&self, msg: InboundEnvelope) {
        let mut msg = msg;
        let mut spins = 0;
        while let Err(back) = self.inbound.try_push(msg) {
            msg = back;
            Self::backoff(&mut spins).await;
        }
        self.inbound_sem.add_permits(1);
    }

    /// Block until an inbound envelope is available.
    pub async fn consume_inbound(&self) -> InboundEnvelope {
        match self.inbound_sem.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return InboundEnvelope::stop_sentinel(),
        }
        let mut spins = 0;
        loop {
            if let Some(msg) = self.inbound.try_pop() {
                return msg;
            }
            Self::backoff(&mut spins).await;
        }
    }

    /// Non-blocking variant used by the stop-signal poll and the
    /// system-drain path.
    pub async fn try_consume_inbound(&self) -> Option<InboundEnvelope> {
        match self.inbound_sem.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(_) => return None,
        }
        let mut spins = 0;
        loop {
            if let Some(msg) = self.inbound.try_pop() {
                return Some(msg);
            }
            Self::backoff(&mut spins).await;
        }
    }

    pub async fn publish_outbound(&self, msg: OutboundEnvelope) {
        let mut msg = msg;
        let mut spins = 0;
        while let Err(back) = self.outbound.try_push(msg) {
            msg = back;
            Self::backoff(&mut spins).await;
        }
        self.outbound_sem.add_permits(1);
    }

    pub async fn consume_outbound(&self) -> OutboundEnvelope {
        match self.outbound_sem.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return OutboundEnvelope::default(),
        }
        let mut spins = 0;
        loop {
            if let Some(msg) = self.outbound.try_pop() {
                return msg;
            }
            Self::backoff(&mut spins).await;
        }
    }

    /// Register a handler for outbound envelopes on `channel`. Multiple
    /// subscribers per channel are invoked in registration order.
    pub fn subscribe_outbound(&self, channel: &str, subscriber: OutboundSubscriber) {
        self.subscribers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(subscriber);
    }

    /// Spawn the dispatcher worker. Idempotent.
    pub fn start_dispatcher(self: &Arc<Self>) {
        if self.dispatcher_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let bus = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("outbound dispatcher started");
            while bus.dispatcher_running.load(Ordering::SeqCst) {
                let msg = bus.consume_outbound().await;
                if !bus.dispatcher_running.load(Ordering::SeqCst) {
                    break;
                }

                let subscribers: Vec<OutboundSubscriber> = {
                    let table = bus.subscribers.lock();
                    table.get(&msg.channel).cloned().unwrap_or_default()
                };

                for subscriber in subscribers {
                    if let Err(e) = subscriber(msg.clone()).await {
                        error!(channel = %msg.channel, error = %e, "outbound dispatch failed");
                    }
                }
            }
            debug!("outbound dispatcher stopped");
        });
        *self.dispatcher.lock() = Some(handle);
    }

    /// Stop the dispatcher: publish an empty wake sentinel, then join the
    /// worker. A real all-empty envelope may still reach subscribers; the
    /// sentinel is indistinguishable by design.
    pub async fn stop_dispatcher(&self) {
        if !self.dispatcher_running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.publish_outbound(OutboundEnvelope::default()).await;
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
