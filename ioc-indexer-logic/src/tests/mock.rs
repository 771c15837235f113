use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::{
    source::{ByteStream, DocumentSource, SourceError},
    types::{ChannelMeta, DocumentEvent, ExternalFileRef},
};

/// In-memory stand-in for the platform: a scripted list of document events,
/// each carrying its own payload and an optional number of transient
/// download failures to serve first.
pub struct MockSource {
    events: Mutex<VecDeque<DocumentEvent<MockHandle>>>,
}

#[derive(Debug, Clone)]
pub struct MockHandle {
    payload: Arc<Vec<u8>>,
    failures_left: Arc<AtomicU32>,
}

impl MockHandle {
    pub fn new(payload: Vec<u8>) -> Self {
        Self::failing(payload, 0)
    }

    pub fn failing(payload: Vec<u8>, failures: u32) -> Self {
        Self {
            payload: Arc::new(payload),
            failures_left: Arc::new(AtomicU32::new(failures)),
        }
    }
}

impl MockSource {
    pub fn new(events: Vec<DocumentEvent<MockHandle>>) -> Self {
        Self {
            events: Mutex::new(events.into()),
        }
    }
}

#[async_trait]
impl DocumentSource for MockSource {
    type Handle = MockHandle;

    async fn next_document(&self) -> Result<DocumentEvent<MockHandle>, SourceError> {
        match self.events.lock().await.pop_front() {
            Some(event) => Ok(event),
            // a real subscription idles until the next post
            None => futures::future::pending().await,
        }
    }

    async fn download(&self, handle: &MockHandle) -> Result<ByteStream, SourceError> {
        if handle
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
        {
            return Err(SourceError::Transient("simulated timeout".to_string()));
        }
        let chunks: Vec<Result<Bytes, SourceError>> = handle
            .payload
            .chunks(7)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

pub fn event(
    channel_id: i64,
    message_id: i32,
    document_id: i64,
    filename: &str,
    handle: MockHandle,
) -> DocumentEvent<MockHandle> {
    let size_bytes = handle.payload.len() as i64;
    DocumentEvent {
        external_ref: ExternalFileRef {
            channel_id,
            message_id,
            document_id,
        },
        channel: ChannelMeta {
            channel_id,
            title: format!("channel {channel_id}"),
        },
        filename: filename.to_string(),
        size_bytes,
        handle,
    }
}
