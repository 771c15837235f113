use blockscout_service_launcher::launcher::ConfigSettings;
use ioc_indexer_logic::source::SourceError;
use ioc_indexer_server::Settings;

const EXIT_CONFIG_INVALID: i32 = 1;
const EXIT_AUTH_FAILED: i32 = 2;

#[tokio::main]
async fn main() {
    let settings = match Settings::build() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("invalid configuration: {err:#}");
            std::process::exit(EXIT_CONFIG_INVALID);
        }
    };

    match ioc_indexer_server::run(settings).await {
        Ok(()) => {}
        Err(err) => {
            if matches!(err.downcast_ref::<SourceError>(), Some(SourceError::Auth(_))) {
                tracing::error!(error = ?err, "platform authentication failed");
                std::process::exit(EXIT_AUTH_FAILED);
            }
            tracing::error!(error = ?err, "fatal error");
            std::process::exit(EXIT_CONFIG_INVALID);
        }
    }
}
