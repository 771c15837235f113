use std::sync::Arc;

use anyhow::Context;
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;

use crate::{
    content_store::ContentStore,
    extractor::{ExtractionLimits, Extractor},
    listener::Listener,
    pipeline::{PipelineContext, WorkerPool},
    queue,
    scanner::{IocPatterns, Scanner},
    settings::IndexerSettings,
    source::DocumentSource,
};

const WORK_DIR: &str = "work";

/// Boots the components in dependency order and runs ingestion until a
/// shutdown signal or a subscription failure.
///
/// Shutdown sequence: the listener stops enqueueing, the queue sender drops,
/// workers drain the queue within the grace window, then in-flight jobs are
/// interrupted and recorded as failed.
pub async fn run<S: DocumentSource + 'static>(
    settings: &IndexerSettings,
    db: Arc<DatabaseConnection>,
    source: S,
) -> anyhow::Result<()> {
    let store = ContentStore::new(&settings.storage.root)
        .await
        .context("initializing content store")?;
    let work_root = settings.storage.root.join(WORK_DIR);
    tokio::fs::create_dir_all(&work_root)
        .await
        .context("initializing extraction work dir")?;

    let scanner = Scanner::new(IocPatterns::compile(
        &settings.ioc.domains,
        &settings.ioc.emails,
        &settings.ioc.cidrs().context("compiling ioc patterns")?,
    ));
    let extractor = Extractor::new(ExtractionLimits {
        max_decompressed_bytes: settings.extraction.max_decompressed_bytes,
        max_decompression_ratio: settings.extraction.max_decompression_ratio,
    });

    let source = Arc::new(source);
    let (sender, receiver) = queue::bounded(settings.queue_capacity());

    let context = Arc::new(PipelineContext {
        db,
        source: source.clone(),
        store,
        extractor,
        scanner: Arc::new(scanner),
        download: settings.download.clone(),
        work_root,
    });

    let shutdown = CancellationToken::new();
    let hard_cancel = CancellationToken::new();

    let workers = WorkerPool::new(context, settings.worker_count);
    let worker_task = tokio::spawn(workers.run(receiver, hard_cancel.clone()));

    let listener = Listener::new(source, sender);
    let listener_task = tokio::spawn(listener.run(shutdown.clone()));

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if wait_for_signal().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    // the listener finishes first on both paths: clean shutdown (cancelled)
    // and subscription failure
    let listener_result = listener_task
        .await
        .context("listener task panicked")?;

    // with the listener gone the only queue sender is dropped, so workers
    // drain whatever is left and stop
    shutdown.cancel();
    let mut worker_task = worker_task;
    match tokio::time::timeout(settings.shutdown_grace, &mut worker_task).await {
        Ok(joined) => joined.context("worker pool task panicked")?,
        Err(_) => {
            tracing::warn!(
                grace = ?settings.shutdown_grace,
                "grace window elapsed, interrupting in-flight jobs"
            );
            hard_cancel.cancel();
            worker_task.await.context("worker pool task panicked")?;
        }
    }

    listener_result.context("channel subscription failed")
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
