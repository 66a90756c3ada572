use crate::config::Config;
use anyhow::Result;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime::Tokio, trace::Config as TraceConfig, Resource};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const SERVICE_NAMESPACE: &str = "vehicle-telemetry";

/// Installs the global subscriber for one binary. Logs go to stderr, which
/// keeps stdout free for `store_dump`. `service` becomes the exported
/// `service.name`.
pub fn init_tracing(service: &str, config: &Config) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directives(config.debug).into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    let otel_layer = match config.otlp_endpoint.as_deref().and_then(traces_endpoint) {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(opentelemetry_otlp::new_exporter().http().with_endpoint(endpoint))
                .with_trace_config(TraceConfig::default().with_resource(resource(service)))
                .install_batch(Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;
    Ok(())
}

fn default_directives(debug: bool) -> &'static str {
    if debug {
        "debug,vehicle_telemetry=debug"
    } else {
        "info,vehicle_telemetry=info"
    }
}

fn resource(service: &str) -> Resource {
    Resource::new(vec![
        KeyValue::new("service.name", service.to_string()),
        KeyValue::new("service.namespace", SERVICE_NAMESPACE),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ])
}

/// OTLP/HTTP wants the signal path; a bare collector address gets
/// `/v1/traces` appended. Blank means exporting is off.
fn traces_endpoint(raw: &str) -> Option<String> {
    let base = raw.trim().trim_end_matches('/');
    if base.is_empty() {
        return None;
    }
    if base.ends_with("/v1/traces") {
        Some(base.to_string())
    } else {
        Some(format!("{base}/v1/traces"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_address_gets_traces_path() {
        assert_eq!(
            traces_endpoint("http://collector:4318/").as_deref(),
            Some("http://collector:4318/v1/traces")
        );
        assert_eq!(
            traces_endpoint(" http://collector:4318/v1/traces/ ").as_deref(),
            Some("http://collector:4318/v1/traces")
        );
        assert_eq!(traces_endpoint("   "), None);
    }

    #[test]
    fn debug_raises_the_default_level() {
        assert_eq!(default_directives(true), "debug,vehicle_telemetry=debug");
        assert_eq!(default_directives(false), "info,vehicle_telemetry=info");
    }
}
