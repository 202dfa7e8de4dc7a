use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("wait queue is full ({capacity} requests already waiting)")]
    QueueFull { capacity: usize },
    #[error("no execution slot became free within {timeout:?}")]
    QueueTimeout { timeout: Duration },
    #[error("limiter is closed")]
    Closed,
}

/// Caps the number of interpreter processes alive at once. Requests that
/// find every slot taken wait in a bounded queue.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    slots: Arc<Semaphore>,
    waiting: AtomicUsize,
    max_waiting: usize,
    queue_timeout: Duration,
}

impl ConcurrencyLimiter {
    pub fn new(max_running: usize, max_waiting: usize, queue_timeout: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_running)),
            waiting: AtomicUsize::new(0),
            max_waiting,
            queue_timeout,
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AdmissionError> {
        if let Ok(permit) = self.slots.clone().try_acquire_owned() {
            return Ok(permit);
        }

        let _ticket = QueueTicket::take(&self.waiting, self.max_waiting).ok_or(
            AdmissionError::QueueFull {
                capacity: self.max_waiting,
            },
        )?;

        match tokio::time::timeout(self.queue_timeout, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(AdmissionError::Closed),
            Err(_) => Err(AdmissionError::QueueTimeout {
                timeout: self.queue_timeout,
            }),
        }
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }
}

/// One place in the wait queue, given back on drop.
struct QueueTicket<'a> {
    waiting: &'a AtomicUsize,
}

impl<'a> QueueTicket<'a> {
    fn take(waiting: &'a AtomicUsize, max_waiting: usize) -> Option<Self> {
        waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_waiting).then_some(n + 1)
            })
            .ok()
            .map(|_| Self { waiting })
    }
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}
