use std::{io, path::PathBuf, sync::Arc, time::Duration};

use futures::{StreamExt, TryStreamExt};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tokio::time::sleep;
use tokio_util::{io::StreamReader, sync::CancellationToken};
use uuid::Uuid;

use crate::{
    content_store::{ContentStore, StoredObject},
    extractor::{ArchiveFormat, ExtractError, ExtractedMember, Extractor},
    metrics,
    queue::JobReceiver,
    repository,
    repository::{indicators::NewIndicator, processed_files::StoredFile},
    scanner::Scanner,
    settings::DownloadSettings,
    source::{DocumentSource, SourceError},
    types::{DocumentEvent, IndicatorType, JobStatus},
};

/// Per-job failure, classified per the error policy table. The rendered
/// message always starts with the class, which is what ends up in
/// `processing_jobs.error`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("auth_failed: {0}")]
    Auth(String),
    #[error("transient_network: {0}")]
    TransientNetwork(String),
    #[error("storage_io: {0}")]
    Storage(#[from] io::Error),
    #[error("db_transient: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("unsafe_archive: {0}")]
    UnsafeArchive(ExtractError),
    #[error("password_required")]
    PasswordRequired,
    #[error("unknown: {0}")]
    Unknown(String),
}

impl JobError {
    pub fn class(&self) -> &'static str {
        match self {
            JobError::Auth(_) => "auth_failed",
            JobError::TransientNetwork(_) => "transient_network",
            JobError::Storage(_) => "storage_io",
            JobError::Db(_) => "db_transient",
            JobError::UnsafeArchive(_) => "unsafe_archive",
            JobError::PasswordRequired => "password_required",
            JobError::Unknown(_) => "unknown",
        }
    }
}

impl From<ExtractError> for JobError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::PasswordRequired => JobError::PasswordRequired,
            ExtractError::Io(err) => JobError::Storage(err),
            ExtractError::Corrupt(message) => JobError::Unknown(message),
            unsafe_member => JobError::UnsafeArchive(unsafe_member),
        }
    }
}

/// Everything a worker needs, shared across the pool.
pub struct PipelineContext<S: DocumentSource> {
    pub db: Arc<DatabaseConnection>,
    pub source: Arc<S>,
    pub store: ContentStore,
    pub extractor: Extractor,
    pub scanner: Arc<Scanner>,
    pub download: DownloadSettings,
    /// Parent for per-job extraction directories, removed with each job.
    pub work_root: PathBuf,
}

/// Fixed-size pool draining the queue; each job runs the full pipeline
/// end-to-end and failures never escape the job that caused them.
pub struct WorkerPool<S: DocumentSource> {
    context: Arc<PipelineContext<S>>,
    worker_count: usize,
}

impl<S: DocumentSource + 'static> WorkerPool<S> {
    pub fn new(context: Arc<PipelineContext<S>>, worker_count: usize) -> Self {
        Self {
            context,
            worker_count,
        }
    }

    /// Runs until the queue closes and drains, or until `cancel` fires, at
    /// which point in-flight jobs are interrupted and recorded as failed.
    pub async fn run(self, receiver: JobReceiver<DocumentEvent<S::Handle>>, cancel: CancellationToken) {
        receiver
            .into_stream()
            .take_until(cancel.clone().cancelled_owned())
            .for_each_concurrent(self.worker_count, |job| {
                let context = self.context.clone();
                let cancel = cancel.clone();
                async move {
                    handle_job(context, job, cancel).await;
                }
            })
            .await;
    }
}

async fn handle_job<S: DocumentSource>(
    context: Arc<PipelineContext<S>>,
    job: DocumentEvent<S::Handle>,
    cancel: CancellationToken,
) {
    let external_ref = job.external_ref.clone();

    match repository::processed_files::is_processed(context.db.as_ref(), &external_ref).await {
        Ok(true) => {
            tracing::info!(external_ref = %external_ref, "skipped_duplicate_pre");
            metrics::DUPLICATES_SKIPPED.with_label_values(&["pre"]).inc();
            return;
        }
        Ok(false) => {}
        Err(err) => {
            // leave the event to upstream redelivery
            tracing::error!(external_ref = %external_ref, error = ?err, "dedup lookup failed");
            return;
        }
    }

    let job_id = match repository::jobs::begin(context.db.as_ref(), &external_ref).await {
        Ok(job_id) => job_id,
        Err(err) => {
            tracing::error!(external_ref = %external_ref, error = ?err, "failed to record job");
            return;
        }
    };
    if let Err(err) = repository::jobs::mark(
        context.db.as_ref(),
        job_id,
        JobStatus::Processing,
        None,
        None,
    )
    .await
    {
        tracing::error!(job_id = %job_id, error = ?err, "failed to mark job processing");
    }

    let outcome = tokio::select! {
        outcome = process_job(&context, &job, job_id) => outcome,
        _ = cancel.cancelled() => Err(JobError::TransientNetwork(
            "interrupted by shutdown".to_string(),
        )),
    };

    match outcome {
        Ok(()) => {
            metrics::JOBS_COMPLETED.inc();
        }
        Err(err) => {
            tracing::warn!(
                external_ref = %external_ref,
                job_id = %job_id,
                class = err.class(),
                error = %err,
                "job_failed"
            );
            metrics::JOBS_FAILED.with_label_values(&[err.class()]).inc();
            if let Err(mark_err) = repository::jobs::mark(
                context.db.as_ref(),
                job_id,
                JobStatus::Failed,
                Some(err.to_string()),
                None,
            )
            .await
            {
                tracing::error!(job_id = %job_id, error = ?mark_err, "failed to mark job failed");
            }
        }
    }
}

async fn process_job<S: DocumentSource>(
    context: &PipelineContext<S>,
    job: &DocumentEvent<S::Handle>,
    job_id: Uuid,
) -> Result<(), JobError> {
    let stored = download_with_retries(context, job).await?;
    if stored.deduplicated {
        tracing::info!(
            external_ref = %job.external_ref,
            file_hash = %stored.hash,
            "skipped_duplicate_post"
        );
        metrics::DUPLICATES_SKIPPED.with_label_values(&["post"]).inc();
    }

    repository::jobs::mark(
        context.db.as_ref(),
        job_id,
        JobStatus::Processing,
        None,
        Some(stored.hash.clone()),
    )
    .await?;

    // unpack and scan before anything commits, so an unsafe or encrypted
    // archive leaves a failed job and no processed-file row
    let indicators = match ArchiveFormat::from_filename(&job.filename) {
        Some(format) => extract_and_scan(context, job, &stored, format).await?,
        None => Vec::new(),
    };

    let file = StoredFile {
        external_ref: job.external_ref.clone(),
        channel_id: job.channel.channel_id,
        channel_title: job.channel.title.clone(),
        filename: job.filename.clone(),
        size_bytes: stored.size_bytes as i64,
        file_hash: stored.hash.clone(),
        storage_path: stored.relative_path.clone(),
    };
    commit_with_retries(context, job_id, file, indicators).await
}

const TRANSACTION_ATTEMPTS: u32 = 3;
const TRANSACTION_RETRY_DELAY: Duration = Duration::from_millis(200);

/// The completing transaction: processed-file upsert, indicator upserts and
/// the `completed` transition, all or nothing. Deadlocks and dropped
/// connections are retried; every statement is idempotent so a replay after
/// a commit that half-reported failure is harmless.
async fn commit_with_retries<S: DocumentSource>(
    context: &PipelineContext<S>,
    job_id: Uuid,
    file: StoredFile,
    indicators: Vec<NewIndicator>,
) -> Result<(), JobError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result: Result<(), sea_orm::DbErr> = async {
            let txn = context.db.begin().await?;
            repository::processed_files::upsert(&txn, file.clone()).await?;
            repository::indicators::upsert_many(&txn, indicators.clone()).await?;
            repository::jobs::mark(&txn, job_id, JobStatus::Completed, None, None).await?;
            txn.commit().await
        }
        .await;
        match result {
            Ok(()) => return Ok(()),
            Err(err) if attempt < TRANSACTION_ATTEMPTS => {
                tracing::warn!(job_id = %job_id, attempt, error = ?err, "commit failed, retrying");
                sleep(TRANSACTION_RETRY_DELAY).await;
            }
            Err(err) => return Err(JobError::Db(err)),
        }
    }
}

async fn download_with_retries<S: DocumentSource>(
    context: &PipelineContext<S>,
    job: &DocumentEvent<S::Handle>,
) -> Result<StoredObject, JobError> {
    let settings = &context.download;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        tracing::info!(external_ref = %job.external_ref, attempt, "download_start");
        match download_once(context, job).await {
            Ok(stored) => {
                tracing::info!(
                    external_ref = %job.external_ref,
                    file_hash = %stored.hash,
                    size_bytes = stored.size_bytes,
                    "download_complete"
                );
                return Ok(stored);
            }
            Err(DownloadError::Source(err))
                if err.is_retryable() && attempt < settings.max_retries =>
            {
                let delay = backoff_delay(settings, attempt);
                tracing::warn!(
                    external_ref = %job.external_ref,
                    attempt,
                    ?delay,
                    error = %err,
                    "download_retry"
                );
                metrics::DOWNLOAD_RETRIES.inc();
                sleep(delay).await;
            }
            Err(DownloadError::Source(err)) => {
                return Err(match err {
                    SourceError::Auth(message) => JobError::Auth(message),
                    SourceError::Transient(message) => JobError::TransientNetwork(message),
                    SourceError::NotFound(message) | SourceError::Other(message) => {
                        JobError::Unknown(message)
                    }
                })
            }
            Err(DownloadError::Storage(err)) => return Err(JobError::Storage(err)),
        }
    }
}

enum DownloadError {
    Source(SourceError),
    Storage(io::Error),
}

async fn download_once<S: DocumentSource>(
    context: &PipelineContext<S>,
    job: &DocumentEvent<S::Handle>,
) -> Result<StoredObject, DownloadError> {
    let stream = context
        .source
        .download(&job.handle)
        .await
        .map_err(DownloadError::Source)?;
    let reader = StreamReader::new(stream.map_err(io::Error::other));
    context
        .store
        .put_stream(reader)
        .await
        .map_err(|err| match take_source_error(&err) {
            Some(source) => DownloadError::Source(source),
            None => DownloadError::Storage(err),
        })
}

/// `StreamReader` smuggles source failures through `io::Error`; pull them
/// back out so retry classification survives the crossing.
fn take_source_error(err: &io::Error) -> Option<SourceError> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<SourceError>())
        .cloned()
}

fn backoff_delay(settings: &DownloadSettings, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    settings
        .base_delay
        .saturating_mul(factor)
        .min(settings.max_delay)
}

async fn extract_and_scan<S: DocumentSource>(
    context: &PipelineContext<S>,
    job: &DocumentEvent<S::Handle>,
    stored: &StoredObject,
    format: ArchiveFormat,
) -> Result<Vec<NewIndicator>, JobError> {
    tracing::info!(
        external_ref = %job.external_ref,
        file_hash = %stored.hash,
        ?format,
        "extract_start"
    );

    // the temp dir guard lives here, so the tree is removed on every path
    let work_dir = tempfile::Builder::new()
        .prefix("extract-")
        .tempdir_in(&context.work_root)
        .map_err(JobError::Storage)?;

    let archive_path = context.store.absolute_path(&stored.relative_path);
    let destination = work_dir.path().to_path_buf();
    let extractor = context.extractor.clone();
    let scanner = context.scanner.clone();

    let result = tokio::task::spawn_blocking(move || {
        let members = extractor.extract(&archive_path, format, &destination)?;
        let mut hits = Vec::new();
        for member in &members {
            if !Scanner::is_scannable(&member.relative_path) {
                continue;
            }
            let outcome = scanner
                .scan_file(&member.relative_path, &member.disk_path)
                .map_err(ExtractError::Io)?;
            hits.extend(outcome.hits);
        }
        Ok::<_, ExtractError>((members, hits))
    })
    .await
    .map_err(|err| JobError::Unknown(format!("extraction task: {err}")))?;

    let (members, hits): (Vec<ExtractedMember>, _) = match result {
        Ok(ok) => ok,
        Err(err) => {
            log_extract_abort(job, &err);
            return Err(err.into());
        }
    };

    tracing::info!(
        external_ref = %job.external_ref,
        members = members.len(),
        "extract_complete"
    );

    let mut counts: [u64; 3] = [0, 0, 0];
    for hit in &hits {
        let slot = match hit.indicator_type {
            IndicatorType::Domain => 0,
            IndicatorType::Email => 1,
            IndicatorType::Ipv4 => 2,
        };
        counts[slot] += 1;
    }
    if !hits.is_empty() {
        tracing::info!(
            external_ref = %job.external_ref,
            file_hash = %stored.hash,
            domains = counts[0],
            emails = counts[1],
            ipv4s = counts[2],
            "indicators_found"
        );
        for (indicator_type, count) in [("domain", counts[0]), ("email", counts[1]), ("ipv4", counts[2])] {
            if count > 0 {
                metrics::INDICATORS_FOUND
                    .with_label_values(&[indicator_type])
                    .inc_by(count);
            }
        }
    }

    Ok(hits
        .into_iter()
        .map(|hit| NewIndicator::from_hit(hit, &stored.hash, job.channel.channel_id))
        .collect())
}

fn log_extract_abort<H>(job: &DocumentEvent<H>, err: &ExtractError) {
    let external_ref = &job.external_ref;
    match err {
        ExtractError::PasswordRequired => {
            tracing::warn!(external_ref = %external_ref, "extract_password_required");
            metrics::EXTRACT_ABORTS
                .with_label_values(&["password_required"])
                .inc();
        }
        ExtractError::UnsafeMember { path } => {
            tracing::warn!(external_ref = %external_ref, member = %path, "extract_unsafe_member");
            metrics::EXTRACT_ABORTS
                .with_label_values(&["unsafe_member"])
                .inc();
        }
        ExtractError::BombCeiling { .. } | ExtractError::BombRatio { .. } => {
            tracing::warn!(external_ref = %external_ref, error = %err, "extract_bomb_aborted");
            metrics::EXTRACT_ABORTS.with_label_values(&["bomb"]).inc();
        }
        ExtractError::Corrupt(_) | ExtractError::Io(_) => {
            tracing::warn!(external_ref = %external_ref, error = %err, "extract failed");
        }
    }
}
