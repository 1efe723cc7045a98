#![forbid(unsafe_code)]

use std::net::SocketAddr;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::TelemetrySettings;

/// Stderr-only subscriber for the window before the config is loaded.
pub fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
	tracing_subscriber::fmt()
		.with_target(false)
		.with_env_filter(EnvFilter::new("info"))
		.with_writer(std::io::stderr)
		.finish()
}

fn resource(service_name: &str) -> Resource {
	Resource::builder()
		.with_service_name(service_name.to_string())
		.with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
		.build()
}

fn env_filter(directives: &str) -> EnvFilter {
	match EnvFilter::try_new(directives) {
		Ok(filter) => filter,
		Err(e) => {
			eprintln!("invalid log filter {directives:?} ({e}); using the default");
			EnvFilter::new(crate::config::DEFAULT_LOG_FILTER)
		}
	}
}

/// Install the global subscriber. The returned provider must be shut down on exit so
/// batched spans are flushed.
pub fn init_tracing(cfg: &TelemetrySettings) -> Option<SdkTracerProvider> {
	let base = tracing_subscriber::registry()
		.with(env_filter(&cfg.log_filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	let Some(endpoint) = cfg.otlp_endpoint.as_deref() else {
		base.init();
		return None;
	};

	match opentelemetry_otlp::SpanExporter::builder()
		.with_tonic()
		.with_endpoint(endpoint)
		.build()
	{
		Ok(exporter) => {
			let provider = SdkTracerProvider::builder()
				.with_resource(resource(&cfg.service_name))
				.with_batch_exporter(exporter)
				.build();
			let tracer = provider.tracer(cfg.service_name.clone());
			opentelemetry::global::set_tracer_provider(provider.clone());

			base.with(tracing_opentelemetry::layer().with_tracer(tracer)).init();
			info!(endpoint, service = %cfg.service_name, "otlp tracing enabled");
			Some(provider)
		}
		Err(e) => {
			base.init();
			warn!(endpoint, error = %e, "failed to initialize otlp tracing");
			None
		}
	}
}

pub fn shutdown_tracing(provider: Option<SdkTracerProvider>) {
	if let Some(provider) = provider
		&& let Err(e) = provider.shutdown()
	{
		warn!(error = %e, "failed to flush otlp spans");
	}
}

/// Serve Prometheus metrics on `bind`, labelled with the service name.
pub fn init_metrics(bind: Option<&str>, service_name: &str) {
	let Some(bind) = bind else {
		return;
	};

	let addr = match bind.parse::<SocketAddr>() {
		Ok(addr) => addr,
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
			return;
		}
	};

	let installed = metrics_exporter_prometheus::PrometheusBuilder::new()
		.with_http_listener(addr)
		.add_global_label("service", service_name)
		.install();
	if let Err(e) = installed {
		warn!(error = %e, "failed to start metrics exporter");
		return;
	}

	describe_metrics();
	info!(%addr, "metrics exporter listening");
}

fn describe_metrics() {
	metrics::describe_gauge!("overtube_ws_clients", "Overlay sockets currently admitted");
	metrics::describe_gauge!("overtube_active_streams", "Chat connectors attached to the broadcast server");
	metrics::describe_counter!("overtube_ws_accepted_total", "Overlay sockets admitted");
	metrics::describe_counter!("overtube_ws_refused_total", "Overlay sockets refused by origin or capacity");
	metrics::describe_counter!("overtube_ws_evicted_total", "Overlay sockets evicted by the server");
	metrics::describe_counter!("overtube_fanout_messages_total", "Chat messages broadcast to overlays");
	metrics::describe_counter!("overtube_connect_failures_total", "Failed chat stream connects");
	metrics::describe_counter!("overtube_stream_disconnects_total", "Chat streams that ended on their own");
	metrics::describe_counter!("overtube_connector_messages_total", "Chat messages produced by connectors");
	metrics::describe_counter!("overtube_connector_dropped_total", "Chat messages dropped by a full connector buffer");
	metrics::describe_counter!("overtube_parse_errors_total", "Platform payloads that failed to parse");
}
