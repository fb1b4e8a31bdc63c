use crate::layer::SinkLayer;
use crate::logger::Logger;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Targets of the HTTP stack underneath the backend client. Forwarding
/// them would log the delivery of every log record.
pub const TRANSPORT_TARGETS: [&str; 4] = ["hyper", "reqwest", "h2", "rustls"];

/// Settings for the subscriber installed by [`init_tracing_with_config`].
///
/// **Fields**
/// - `enable_stdout`: also install a `tracing_subscriber::fmt` layer.
///   Leave this off when the logger already echoes records to stderr.
/// - `ignored_targets`: target prefixes that are never forwarded to the
///   logger.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub enable_stdout: bool,
    pub ignored_targets: Vec<String>,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            enable_stdout: false,
            ignored_targets: TRANSPORT_TARGETS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Build the [`SinkLayer`] described by `config`.
pub fn sink_layer(logger: Logger, config: &LayerConfig) -> SinkLayer {
    config
        .ignored_targets
        .iter()
        .fold(SinkLayer::new(logger), |layer, target| layer.ignore_target(target.clone()))
}

/// Install a global `tracing` subscriber that routes events into `logger`.
///
/// **Effects**
///
/// A [`Registry`] combined with [`SinkLayer`] (and optionally a `fmt`
/// layer) becomes the global default subscriber. Fails if another global
/// subscriber was installed first.
pub fn init_tracing_with_config(
    logger: Logger,
    config: LayerConfig,
) -> Result<(), SetGlobalDefaultError> {
    let layer = sink_layer(logger, &config);

    // Two branches because the layered subscriber types differ.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    }
}

/// Equivalent to [`init_tracing_with_config`] with [`LayerConfig::default`].
pub fn init_tracing(logger: Logger) -> Result<(), SetGlobalDefaultError> {
    init_tracing_with_config(logger, LayerConfig::default())
}
