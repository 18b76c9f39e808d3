use crate::forward::Forward;
use crate::metrics::{
    DROPPED_TOTAL, FORWARDED_TOTAL, FORWARD_FAILURES_TOTAL, FORWARD_LATENCY_SECONDS,
    INVALID_MESSAGES_TOTAL, IN_FLIGHT, MESSAGES_TOTAL,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Where a message entered the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingress {
    Udp,
    Mqtt,
}

impl Ingress {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ingress::Udp => "udp",
            Ingress::Mqtt => "mqtt",
        }
    }
}

impl fmt::Display for Ingress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Spawned,
    /// No permit was available, or the pipeline is shutting down.
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Invalid,
    Forwarded,
    Failed,
}

/// Decode-then-forward, shared by every ingress.
///
/// Each message runs as its own task holding one permit of a semaphore sized
/// to `max_in_flight`. `dispatch` never waits: when every permit is taken the
/// message is dropped and counted, so a slow sink can never stall the
/// receive loop that feeds it.
pub struct Pipeline<F> {
    forwarder: Arc<F>,
    permits: Arc<Semaphore>,
    capacity: u32,
    closing: Arc<AtomicBool>,
}

impl<F> Clone for Pipeline<F> {
    fn clone(&self) -> Self {
        Self {
            forwarder: self.forwarder.clone(),
            permits: self.permits.clone(),
            capacity: self.capacity,
            closing: self.closing.clone(),
        }
    }
}

impl<F: Forward> Pipeline<F> {
    pub fn new(forwarder: F, max_in_flight: usize) -> Self {
        let capacity = u32::try_from(max_in_flight.clamp(1, Semaphore::MAX_PERMITS))
            .unwrap_or(u32::MAX);

        Self {
            forwarder: Arc::new(forwarder),
            permits: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dispatch(&self, payload: Vec<u8>, ingress: Ingress) -> DispatchOutcome {
        MESSAGES_TOTAL.with_label_values(&[ingress.as_str()]).inc();

        if self.closing.load(Ordering::Acquire) {
            DROPPED_TOTAL.with_label_values(&[ingress.as_str()]).inc();
            debug!("Pipeline is shutting down, dropping {} message", ingress);
            return DispatchOutcome::Dropped;
        }

        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                DROPPED_TOTAL.with_label_values(&[ingress.as_str()]).inc();
                warn!(
                    "Pipeline at capacity ({} in flight), dropping {} message",
                    self.capacity, ingress
                );
                return DispatchOutcome::Dropped;
            }
            Err(TryAcquireError::Closed) => {
                DROPPED_TOTAL.with_label_values(&[ingress.as_str()]).inc();
                return DispatchOutcome::Dropped;
            }
        };

        let forwarder = self.forwarder.clone();
        IN_FLIGHT.inc();
        tokio::spawn(async move {
            process(forwarder.as_ref(), &payload, ingress).await;
            IN_FLIGHT.dec();
            drop(permit);
        });

        DispatchOutcome::Spawned
    }

    pub fn in_flight(&self) -> usize {
        self.capacity as usize - self.permits.available_permits()
    }

    /// Stops accepting messages and waits up to `grace` for in-flight tasks.
    /// Returns `true` if every task finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.closing.store(true, Ordering::Release);
        let pending = self.in_flight();
        if pending > 0 {
            info!("Draining {} in-flight messages", pending);
        }

        let drained = match tokio::time::timeout(grace, self.permits.acquire_many(self.capacity)).await {
            Ok(Ok(_all)) => true,
            Ok(Err(_)) => true,
            Err(_) => {
                warn!(
                    "{} messages still in flight after {:?}, abandoning them",
                    self.in_flight(),
                    grace
                );
                false
            }
        };

        self.permits.close();
        drained
    }
}

/// Handles one message end to end; every failure is logged and counted here
pub async fn process<F: Forward>(forwarder: &F, payload: &[u8], ingress: Ingress) -> TaskOutcome {
    let record = match telemetry::decode(payload) {
        Ok(record) => record,
        Err(e) => {
            INVALID_MESSAGES_TOTAL
                .with_label_values(&[ingress.as_str()])
                .inc();
            warn!("Dropping invalid {} message ({} bytes): {}", ingress, payload.len(), e);
            return TaskOutcome::Invalid;
        }
    };

    debug!("Forwarding {} message from drone {}", ingress, record.emitter_id);
    let start = Instant::now();

    match forwarder.forward(&record).await {
        Ok(()) => {
            FORWARDED_TOTAL.inc();
            FORWARD_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
            TaskOutcome::Forwarded
        }
        Err(e) => {
            FORWARD_FAILURES_TOTAL.inc();
            error!("Failed to forward record from drone {}: {}", record.emitter_id, e);
            TaskOutcome::Failed
        }
    }
}
