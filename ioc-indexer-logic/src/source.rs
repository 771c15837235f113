use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::types::DocumentEvent;

pub type ByteStream = BoxStream<'static, Result<Bytes, SourceError>>;

/// Failure classes of the upstream platform, mapped once at the adapter
/// boundary so the pipeline can apply a uniform retry policy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("transient source failure: {0}")]
    Transient(String),
    #[error("source failure: {0}")]
    Other(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

/// Capability interface over the messaging platform: a push stream of
/// document events plus on-demand streaming downloads. `Handle` is whatever
/// the platform needs to fetch the bytes later.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    type Handle: Clone + Send + Sync + 'static;

    /// Next document posted to any subscribed channel. Non-document events
    /// are filtered out before this returns.
    async fn next_document(&self) -> Result<DocumentEvent<Self::Handle>, SourceError>;

    /// Streams the artifact's bytes.
    async fn download(&self, handle: &Self::Handle) -> Result<ByteStream, SourceError>;
}
