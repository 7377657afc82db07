//! OpenTelemetry metrics for the sendgate engine
//!
//! Instruments are exported via OTLP to an OpenTelemetry Collector.
//!
//! - **Quota metrics**: checks by outcome, cache hit rate, lazily provisioned configs
//! - **Dispatch metrics**: identity selections, recorded sends, swallowed store
//!   failures, retry decisions and delays
//!
//! Recording is always optional: engine code goes through [`try_metrics`], so
//! nothing is recorded (and nothing breaks) when [`init_metrics`] was never
//! called or metrics are disabled.

mod config;
mod dispatch;
mod error;
mod exporter;
mod quota;

pub use config::MetricsConfig;
pub use dispatch::DispatchMetrics;
pub use error::MetricsError;
use once_cell::sync::OnceCell;
pub use quota::QuotaMetrics;

/// Global metrics instance
static METRICS_INSTANCE: OnceCell<Metrics> = OnceCell::new();

/// Root metrics container
#[derive(Debug)]
pub struct Metrics {
    pub quota: QuotaMetrics,
    pub dispatch: DispatchMetrics,
}

/// Initialize the metrics system
///
/// Call once at startup. If metrics are disabled in the config this is a no-op.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or if called twice.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        tracing::info!("Metrics collection is disabled");
        return Ok(());
    }

    tracing::info!(
        endpoint = %config.endpoint,
        "Initializing OpenTelemetry metrics with OTLP exporter"
    );

    let provider = exporter::init_otlp_exporter(config.endpoint.clone())?;
    opentelemetry::global::set_meter_provider(provider);

    let metrics = Metrics {
        quota: QuotaMetrics::new(),
        dispatch: DispatchMetrics::new(),
    };

    METRICS_INSTANCE
        .set(metrics)
        .map_err(|_| MetricsError::AlreadyInitialized)?;

    tracing::info!("Metrics collection initialized successfully");

    Ok(())
}

/// The global metrics instance, if initialised
#[must_use]
pub fn try_metrics() -> Option<&'static Metrics> {
    METRICS_INSTANCE.get()
}

/// Check if metrics are enabled
#[must_use]
pub fn is_enabled() -> bool {
    METRICS_INSTANCE.get().is_some()
}
