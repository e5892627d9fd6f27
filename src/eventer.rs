use crate::TaskEvent;

use futures_util::FutureExt;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Fan-out of task events to every `TaskEvents` subscriber.
#[derive(Debug)]
pub(crate) struct Eventer {
    subscribers: Mutex<Vec<mpsc::Sender<TaskEvent>>>,
    buffer: usize,
}

impl Eventer {
    pub(crate) fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
        }
    }

    pub(crate) fn subscribe(
        &self,
        cancel: CancellationToken,
        shutdown: CancellationToken,
    ) -> TaskEvents {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        TaskEvents {
            rx,
            cancel,
            shutdown,
        }
    }

    /// Deliver `event` to all live subscribers; a subscriber with a full queue misses it.
    pub(crate) fn emit(&self, event: TaskEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(task_id = %event.task_id, "task event subscriber lagging; event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Subscriber side of the `TaskEvents` stream.
///
/// Driven by calling `next()` in a loop; yields `None` once the caller's token or the driver's
/// shutdown token fires.
#[derive(Debug)]
pub struct TaskEvents {
    rx: mpsc::Receiver<TaskEvent>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
}

impl TaskEvents {
    pub async fn next(&mut self) -> Option<TaskEvent> {
        futures_util::select_biased! {
            _ = self.cancel.cancelled().fuse() => None,
            _ = self.shutdown.cancelled().fuse() => None,
            event = self.rx.recv().fuse() => event,
        }
    }
}

impl Drop for TaskEvents {
    fn drop(&mut self) {
        self.rx.close();
    }
}
