use std::collections::HashSet;

use ioc_indexer_entity::extracted_indicators::{ActiveModel, Column, Entity};
use sea_orm::{
    prelude::Expr, sea_query::OnConflict, ActiveValue::Set, ConnectionTrait, DbErr, EntityTrait,
};

use crate::types::{IndicatorHit, IndicatorType};

/// Upper bound on rows per INSERT to keep statement size flat.
const INSERT_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIndicator {
    pub indicator_type: IndicatorType,
    pub value: String,
    pub source_file_hash: String,
    pub source_relative_path: String,
    pub source_line: i32,
    pub channel_id: i64,
}

impl NewIndicator {
    pub fn from_hit(hit: IndicatorHit, source_file_hash: &str, channel_id: i64) -> Self {
        Self {
            indicator_type: hit.indicator_type,
            value: hit.value,
            source_file_hash: source_file_hash.to_string(),
            source_relative_path: hit.source_relative_path,
            source_line: hit.source_line,
            channel_id,
        }
    }
}

/// Insert-or-update by the composite unique key; a re-seen indicator only
/// bumps `last_seen_at`. Batches are deduplicated first so one statement
/// never touches the same row twice, and chunked into sub-inserts that are
/// each independently idempotent.
pub async fn upsert_many<C: ConnectionTrait>(
    db: &C,
    indicators: Vec<NewIndicator>,
) -> Result<(), DbErr> {
    let mut seen = HashSet::new();
    let deduplicated: Vec<_> = indicators
        .into_iter()
        .filter(|indicator| {
            seen.insert((
                indicator.indicator_type,
                indicator.value.clone(),
                indicator.source_file_hash.clone(),
                indicator.source_line,
            ))
        })
        .collect();

    for chunk in deduplicated.chunks(INSERT_CHUNK_SIZE) {
        let models = chunk.iter().cloned().map(|indicator| ActiveModel {
            indicator_type: Set(indicator.indicator_type),
            value: Set(indicator.value),
            source_file_hash: Set(indicator.source_file_hash),
            source_relative_path: Set(indicator.source_relative_path),
            source_line: Set(indicator.source_line),
            channel_id: Set(indicator.channel_id),
            ..Default::default()
        });
        Entity::insert_many(models)
            .on_conflict(
                OnConflict::columns([
                    Column::IndicatorType,
                    Column::Value,
                    Column::SourceFileHash,
                    Column::SourceLine,
                ])
                .value(Column::LastSeenAt, Expr::current_timestamp())
                .to_owned(),
            )
            .on_empty_do_nothing()
            .exec(db)
            .await?;
    }
    Ok(())
}

pub async fn find_by_source_hash<C: ConnectionTrait>(
    db: &C,
    source_file_hash: &str,
) -> Result<Vec<ioc_indexer_entity::extracted_indicators::Model>, DbErr> {
    use sea_orm::{ColumnTrait, QueryFilter, QueryOrder};
    Entity::find()
        .filter(Column::SourceFileHash.eq(source_file_hash))
        .order_by_asc(Column::SourceLine)
        .all(db)
        .await
}
