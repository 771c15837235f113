use std::{fmt, str::FromStr};

pub use ioc_indexer_entity::sea_orm_active_enums::{IndicatorType, JobStatus};

/// Identity of an artifact as known to the upstream platform.
///
/// The string token `"{channel_id}_{message_id}_{document_id}"` is an
/// encoding convenience for persistence; internally the three parts are
/// never reparsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalFileRef {
    pub channel_id: i64,
    pub message_id: i32,
    pub document_id: i64,
}

impl fmt::Display for ExternalFileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.channel_id, self.message_id, self.document_id
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed external file ref: {0}")]
pub struct ParseExternalFileRefError(String);

impl FromStr for ExternalFileRef {
    type Err = ParseExternalFileRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // channel ids may be negative, so split from the right
        let err = || ParseExternalFileRefError(s.to_string());
        let (rest, document_id) = s.rsplit_once('_').ok_or_else(err)?;
        let (channel_id, message_id) = rest.rsplit_once('_').ok_or_else(err)?;
        Ok(Self {
            channel_id: channel_id.parse().map_err(|_| err())?,
            message_id: message_id.parse().map_err(|_| err())?,
            document_id: document_id.parse().map_err(|_| err())?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMeta {
    pub channel_id: i64,
    pub title: String,
}

/// A unit of work produced by the listener. `H` is the source-specific
/// download handle.
#[derive(Debug, Clone)]
pub struct DocumentEvent<H> {
    pub external_ref: ExternalFileRef,
    pub channel: ChannelMeta,
    pub filename: String,
    pub size_bytes: i64,
    pub handle: H,
}

/// An indicator found by the scanner, not yet tied to an archive hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorHit {
    pub indicator_type: IndicatorType,
    pub value: String,
    pub source_relative_path: String,
    pub source_line: i32,
}
