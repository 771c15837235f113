use chrono::Utc;
use ioc_indexer_entity::processing_jobs::{ActiveModel, Entity, Model};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectionTrait, DbErr, EntityTrait,
};
use uuid::Uuid;

use crate::types::{ExternalFileRef, JobStatus};

/// Inserts the attempt record in its initial `queued` state.
pub async fn begin<C: ConnectionTrait>(
    db: &C,
    external_ref: &ExternalFileRef,
) -> Result<Uuid, DbErr> {
    let job_id = Uuid::new_v4();
    ActiveModel {
        job_id: Set(job_id),
        telegram_file_id: Set(external_ref.to_string()),
        status: Set(JobStatus::Queued),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(job_id)
}

/// Moves a job along its `queued → processing → {completed, failed}`
/// lifecycle. `error` and `file_hash` are only written when provided.
pub async fn mark<C: ConnectionTrait>(
    db: &C,
    job_id: Uuid,
    status: JobStatus,
    error: Option<String>,
    file_hash: Option<String>,
) -> Result<(), DbErr> {
    let mut active = ActiveModel {
        job_id: Set(job_id),
        status: Set(status),
        updated_at: Set(Utc::now().into()),
        ..Default::default()
    };
    if let Some(error) = error {
        active.error = Set(Some(error));
    }
    if let Some(file_hash) = file_hash {
        active.file_hash = Set(Some(file_hash));
    }
    active.update(db).await.map(|_| ())
}

pub async fn find<C: ConnectionTrait>(db: &C, job_id: Uuid) -> Result<Option<Model>, DbErr> {
    Entity::find_by_id(job_id).one(db).await
}
