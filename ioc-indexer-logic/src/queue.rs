use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Bounded in-process FIFO between the listener and the worker pool.
/// `enqueue` awaits while the queue is full, which is the backpressure the
/// producer relies on; durability comes from upstream redelivery plus the
/// pre-download dedup check, not from the queue itself.
pub fn bounded<T>(capacity: usize) -> (JobSender<T>, JobReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (JobSender(tx), JobReceiver(rx))
}

#[derive(Debug, Clone)]
pub struct JobSender<T>(mpsc::Sender<T>);

#[derive(Debug, thiserror::Error)]
#[error("job queue is closed")]
pub struct QueueClosed;

impl<T> JobSender<T> {
    pub async fn enqueue(&self, job: T) -> Result<(), QueueClosed> {
        self.0.send(job).await.map_err(|_| QueueClosed)
    }
}

#[derive(Debug)]
pub struct JobReceiver<T>(mpsc::Receiver<T>);

impl<T> JobReceiver<T> {
    pub fn into_stream(self) -> ReceiverStream<T> {
        ReceiverStream::new(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_blocks_when_full() {
        let (tx, rx) = bounded::<u32>(1);
        tx.enqueue(1).await.unwrap();

        let blocked = tx.enqueue(2);
        tokio::pin!(blocked);
        assert!(futures::poll!(blocked.as_mut()).is_pending());

        let mut stream = rx.into_stream();
        use tokio_stream::StreamExt;
        assert_eq!(stream.next().await, Some(1));
        blocked.await.unwrap();
        assert_eq!(stream.next().await, Some(2));
    }

    #[tokio::test]
    async fn enqueue_fails_after_receiver_drop() {
        let (tx, rx) = bounded::<u32>(1);
        drop(rx);
        assert!(tx.enqueue(1).await.is_err());
    }
}
