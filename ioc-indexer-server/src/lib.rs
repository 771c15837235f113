mod settings;

pub use settings::Settings;

use anyhow::Context;
use blockscout_service_launcher::database;
use ioc_indexer_logic::{source::SourceError, supervisor, telegram::TelegramSource};
use migration::Migrator;
use std::sync::Arc;
use tokio::time::sleep;

const SERVICE_NAME: &str = "ioc_indexer";

pub async fn run(settings: Settings) -> Result<(), anyhow::Error> {
    blockscout_service_launcher::tracing::init_logs(
        SERVICE_NAME,
        &settings.tracing,
        &settings.jaeger,
    )?;

    settings
        .indexer
        .validate()
        .context("invalid indexer configuration")?;

    let db_connection = database::initialize_postgres::<Migrator>(&settings.database).await?;
    let db = Arc::new(db_connection);

    // If the first connect fails, the error propagates immediately: a broken
    // session or credentials should stop the process, not retry forever.
    let mut source = TelegramSource::connect(&settings.indexer.telegram).await?;
    let delay = settings.indexer.restart_delay;

    loop {
        match supervisor::run(&settings.indexer, db.clone(), source).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if is_fatal(&err) {
                    return Err(err);
                }
                tracing::error!(error = ?err, ?delay, "ingestion failed, restarting");
            }
        }

        source = loop {
            sleep(delay).await;
            tracing::info!("re-connecting to telegram");
            match TelegramSource::connect(&settings.indexer.telegram).await {
                Ok(source) => break source,
                Err(err @ SourceError::Auth(_)) => return Err(err.into()),
                Err(err) => {
                    tracing::error!(error = ?err, ?delay, "re-connect failed, retrying");
                }
            }
        };
    }
}

fn is_fatal(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<SourceError>(),
        Some(SourceError::Auth(_))
    )
}
