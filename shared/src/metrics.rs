use metrics_exporter_statsd::{StatsdBuilder, StatsdError};
use serde::Deserialize;

const QUEUE_SIZE: usize = 5000;
const BUFFER_SIZE: usize = 1024;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("could not build statsd recorder: {0}")]
    Statsd(#[from] StatsdError),
    #[error("a global metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Installs the statsd recorder as the global `metrics` recorder.
///
/// Without a call to this function every `counter!`/`histogram!` is a no-op,
/// which is what tests and local runs rely on.
pub fn install(config: &MetricsConfig) -> Result<(), MetricsError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .with_queue_size(QUEUE_SIZE)
        .with_buffer_size(BUFFER_SIZE)
        .build(config.prefix.as_deref())?;

    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics exporter installed"
    );
    Ok(())
}
