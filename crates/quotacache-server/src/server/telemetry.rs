//! # Telemetry
//!
//! Logs always go to the console through `tracing_subscriber::fmt`, filtered by
//! `RUST_LOG` (default `info`). OpenTelemetry export is opt-in.
//!
//! ## Feature matrix
//!
//! - `otel-tracing`: exports spans (one `rpc` span per call, with the retry
//!   attempts of nested calls as events).
//! - `otel-metrics`: exports call counters and latency histograms.
//! - `stdout`: prints exported data with `opentelemetry-stdout`.
//! - `otlp`: ships exported data over OTLP/gRPC to
//!   `OTEL_EXPORTER_OTLP_ENDPOINT`.
//!
//! Exporters require at least one of `otel-tracing` or `otel-metrics`.
//!
//! ```bash
//! cargo run --bin quotacache-server --features otel-tracing,otel-metrics,stdout
//! ```

#[cfg(all(
    feature = "otlp",
    not(any(feature = "otel-tracing", feature = "otel-metrics"))
))]
compile_error!(
    "The 'otlp' feature requires at least one of 'otel-tracing' or 'otel-metrics' to be enabled."
);

#[cfg(all(
    feature = "stdout",
    not(any(feature = "otel-tracing", feature = "otel-metrics"))
))]
compile_error!(
    "The 'stdout' feature requires at least one of 'otel-tracing' or 'otel-metrics' to be enabled."
);

use core::time::Duration;
use tonic::Code;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "otel-metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "otel-metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "otel-metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "otel-tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel-tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel-tracing")]
use opentelemetry_sdk::trace as sdktrace;

/// Exporter handles that must be flushed before the process exits.
pub struct TelemetryProviders {
    #[cfg(feature = "otel-tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "otel-metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops the exporters. A no-op without OpenTelemetry.
    pub fn shutdown(self) {
        #[cfg(feature = "otel-tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "otel-metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel-tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel-tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "otel-metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
    let scope = InstrumentationScope::builder("quotacache")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        );

    #[cfg(feature = "otel-tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "otel-metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "otel-tracing")]
        tracer_provider,
        #[cfg(feature = "otel-metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("quotacache")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "otel-metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        let exporter = opentelemetry_stdout::MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(Duration::from_secs(5))
            .build();
        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;
        use opentelemetry_otlp::WithExportConfig;

        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build metrics exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "otel-tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        let exporter = opentelemetry_stdout::SpanExporter::default();
        builder.with_span_processor(batch_processor(exporter))
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;
        use opentelemetry_otlp::WithExportConfig;

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build tracer exporter")?;
        builder.with_span_processor(batch_processor(exporter))
    };

    Ok(builder.build())
}

#[cfg(all(feature = "otel-tracing", any(feature = "stdout", feature = "otlp")))]
fn batch_processor<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

#[cfg(feature = "otel-metrics")]
static CALLS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static CALL_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static CALL_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static QUOTA_REJECTIONS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static DRY_RUNS: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "otel-metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = CALLS.set(
        meter
            .u64_counter("calls")
            .with_description("Total unary gRPC calls")
            .build(),
    );

    let _ = CALL_ERRORS.set(
        meter
            .u64_counter("call_errors")
            .with_description("Calls that returned a non-OK status")
            .build(),
    );

    let _ = CALL_DURATION_MS.set(
        meter
            .f64_histogram("call_duration")
            .with_unit("ms")
            .with_description("Server-side call duration")
            .build(),
    );

    let _ = QUOTA_REJECTIONS.set(
        meter
            .u64_counter("quota_rejections")
            .with_description("Stores rejected because the account quota is used up")
            .build(),
    );

    let _ = DRY_RUNS.set(
        meter
            .u64_counter("dry_runs")
            .with_description("Stores validated in dry-run mode")
            .build(),
    );
}

// These compile to no-ops when metrics are disabled.
#[cfg(feature = "otel-metrics")]
pub fn record_call(method: &'static str, duration: Duration, error: Option<Code>) {
    let attrs = [KeyValue::new("method", method)];
    if let Some(counter) = CALLS.get() {
        counter.add(1, &attrs);
    }
    if let Some(histogram) = CALL_DURATION_MS.get() {
        histogram.record(duration.as_secs_f64() * 1000.0, &attrs);
    }
    if let (Some(code), Some(counter)) = (error, CALL_ERRORS.get()) {
        counter.add(
            1,
            &[
                KeyValue::new("method", method),
                KeyValue::new("code", format!("{code:?}")),
            ],
        );
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn record_call(_method: &'static str, _duration: Duration, _error: Option<Code>) {}

#[cfg(feature = "otel-metrics")]
pub fn increment_quota_rejections() {
    if let Some(counter) = QUOTA_REJECTIONS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn increment_quota_rejections() {}

#[cfg(feature = "otel-metrics")]
pub fn increment_dry_runs() {
    if let Some(counter) = DRY_RUNS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn increment_dry_runs() {}
