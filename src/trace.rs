//! Tracing setup. See [`init_tracing`].

use eyre::WrapErr;
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global tracing subscriber that prints events to stdout and
/// exports spans over OTLP/HTTP.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. The exporter
/// endpoint is configured with the standard `OTEL_EXPORTER_OTLP_*`
/// environment variables.
///
/// The returned provider batches spans in the background. Call
/// [`SdkTracerProvider::shutdown`] before the process exits to flush them.
///
/// Libraries should never call this. It belongs in the host binary, which is
/// the only place that knows where its telemetry should go.
pub fn init_tracing() -> eyre::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .build()
        .wrap_err("failed to build OTLP span exporter")?;

    let resource = Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_attribute(KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")))
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    let otel_layer = tracing_opentelemetry::layer().with_tracer(provider.tracer(env!("CARGO_PKG_NAME")));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .try_init()
        .wrap_err("failed to install tracing subscriber")?;

    Ok(provider)
}
