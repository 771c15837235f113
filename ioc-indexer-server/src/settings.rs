use blockscout_service_launcher::{
    database::DatabaseSettings,
    launcher::ConfigSettings,
    tracing::{JaegerSettings, TracingSettings},
};
use ioc_indexer_logic::settings::IndexerSettings;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub tracing: TracingSettings,
    #[serde(default)]
    pub jaeger: JaegerSettings,
    pub database: DatabaseSettings,

    pub indexer: IndexerSettings,
}

impl ConfigSettings for Settings {
    const SERVICE_NAME: &'static str = "IOC_INDEXER";
}
