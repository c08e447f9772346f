//! Bounded single-producer/single-consumer hand-off between the discoverer
//! and the catalog updater.

use std::fmt;

use tokio::sync::mpsc;

/// Constructor for the sender/receiver pair.
#[derive(Debug)]
pub struct BatchQueue;

impl BatchQueue {
    /// `capacity` bounds buffered items; `batch_size` bounds each drain.
    pub fn bounded<T>(
        capacity: usize,
        batch_size: usize,
    ) -> (BatchSender<T>, BatchReceiver<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            BatchSender { tx: Some(tx) },
            BatchReceiver {
                rx,
                batch_size: batch_size.max(1),
                finished: false,
            },
        )
    }
}

/// Producer half. Not cloneable: the queue has exactly one producer.
pub struct BatchSender<T> {
    tx: Option<mpsc::Sender<T>>,
}

impl<T> BatchSender<T> {
    /// Post one item, waiting while the queue is full.
    ///
    /// Returns `false` once the queue is complete or the consumer is gone.
    pub async fn post(&mut self, item: T) -> bool {
        match &self.tx {
            Some(tx) => tx.send(item).await.is_ok(),
            None => false,
        }
    }

    /// Signal that no more items will be posted. Idempotent.
    pub fn complete(&mut self) {
        self.tx = None;
    }

    pub fn is_complete(&self) -> bool {
        self.tx.as_ref().is_none_or(|tx| tx.is_closed())
    }
}

impl<T> fmt::Debug for BatchSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSender")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Consumer half.
pub struct BatchReceiver<T> {
    rx: mpsc::Receiver<T>,
    batch_size: usize,
    finished: bool,
}

impl<T> BatchReceiver<T> {
    /// Wait for at least one item and return up to `batch_size` of them.
    ///
    /// Returns an empty batch once the producer completed and every buffered
    /// item was drained; from then on every call returns empty immediately.
    pub async fn next_batch(&mut self) -> Vec<T> {
        if self.finished {
            return Vec::new();
        }
        let mut batch = Vec::with_capacity(self.batch_size);
        if self.rx.recv_many(&mut batch, self.batch_size).await == 0 {
            self.finished = true;
        }
        batch
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stop accepting items; the producer's next post fails.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<T> fmt::Debug for BatchReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchReceiver")
            .field("batch_size", &self.batch_size)
            .field("buffered", &self.rx.len())
            .field("finished", &self.finished)
            .finish()
    }
}
