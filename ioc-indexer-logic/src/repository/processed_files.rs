use ioc_indexer_entity::processed_files::{ActiveModel, Column, Entity, Model};
use sea_orm::{
    prelude::Expr, sea_query::OnConflict, ActiveValue::NotSet, ActiveValue::Set, ColumnTrait,
    ConnectionTrait, DbErr, EntityTrait, QueryFilter,
};

use crate::types::ExternalFileRef;

/// Everything known about an artifact once its bytes are in the content
/// store. Timestamps are filled by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub external_ref: ExternalFileRef,
    pub channel_id: i64,
    pub channel_title: String,
    pub filename: String,
    pub size_bytes: i64,
    pub file_hash: String,
    pub storage_path: String,
}

/// Pre-download dedup check.
pub async fn is_processed<C: ConnectionTrait>(
    db: &C,
    external_ref: &ExternalFileRef,
) -> Result<bool, DbErr> {
    Ok(Entity::find_by_id(external_ref.to_string())
        .one(db)
        .await?
        .is_some())
}

pub async fn find_by_external_ref<C: ConnectionTrait>(
    db: &C,
    external_ref: &ExternalFileRef,
) -> Result<Option<Model>, DbErr> {
    Entity::find_by_id(external_ref.to_string()).one(db).await
}

pub async fn find_by_hash<C: ConnectionTrait>(
    db: &C,
    file_hash: &str,
) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .filter(Column::FileHash.eq(file_hash))
        .all(db)
        .await
}

/// Insert-or-update by `telegram_file_id`. A re-seen artifact only bumps
/// `last_seen_at`; `first_seen_at` is never touched.
pub async fn upsert<C: ConnectionTrait>(db: &C, file: StoredFile) -> Result<(), DbErr> {
    let active = ActiveModel {
        telegram_file_id: Set(file.external_ref.to_string()),
        channel_id: Set(file.channel_id),
        channel_title: Set(file.channel_title),
        filename: Set(file.filename),
        size_bytes: Set(file.size_bytes),
        file_hash: Set(file.file_hash),
        storage_path: Set(file.storage_path),
        first_seen_at: NotSet,
        last_seen_at: NotSet,
    };
    Entity::insert(active)
        .on_conflict(
            OnConflict::column(Column::TelegramFileId)
                .value(Column::LastSeenAt, Expr::current_timestamp())
                .to_owned(),
        )
        .exec(db)
        .await?;
    Ok(())
}
