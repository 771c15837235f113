use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    queue::JobSender,
    source::{DocumentSource, SourceError},
    types::DocumentEvent,
};

/// Producer side of the queue: forwards every document event from the
/// subscription into the bounded queue. A full queue makes `enqueue` wait,
/// so events are never dropped here; redelivery after an outage is absorbed
/// by the pre-download dedup check instead.
pub struct Listener<S: DocumentSource> {
    source: Arc<S>,
    sender: JobSender<DocumentEvent<S::Handle>>,
}

impl<S: DocumentSource> Listener<S> {
    pub fn new(source: Arc<S>, sender: JobSender<DocumentEvent<S::Handle>>) -> Self {
        Self { source, sender }
    }

    /// Runs until cancelled or until the subscription fails. The error is
    /// returned to the supervisor, which decides between restart and exit.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), SourceError> {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = self.source.next_document() => event?,
            };
            tracing::debug!(
                external_ref = %event.external_ref,
                filename = %event.filename,
                size_bytes = event.size_bytes,
                "document event"
            );
            if self.sender.enqueue(event).await.is_err() {
                // workers are gone, the process is shutting down
                return Ok(());
            }
        }
    }
}
