use anyhow::{Context, Result};
use base64ct::{Base64, Encoding};
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::{SpanExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{collections::HashMap, env::var, sync::OnceLock, time::Duration};
use tonic::metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue};
use tonic::transport::ClientTlsConfig;
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

const DEFAULT_ENDPOINT: &str = "http://localhost:4317";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Span exporter settings taken from the standard `OTEL_*` variables.
#[derive(Debug)]
struct OtlpSettings {
    endpoint: String,
    headers: HashMap<String, String>,
    instance_id: String,
}

impl OtlpSettings {
    fn from_env() -> Self {
        if let Ok(protocol) = var("OTEL_EXPORTER_OTLP_PROTOCOL")
            && protocol != "grpc"
        {
            debug!("OTEL_EXPORTER_OTLP_PROTOCOL={protocol} ignored, exporting over grpc");
        }

        Self {
            endpoint: with_scheme(
                &var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.into()),
            ),
            headers: var("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|raw| header_pairs(&raw))
                .unwrap_or_default(),
            instance_id: var("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|_| Ulid::new().to_string()),
        }
    }

    /// Host name to verify the collector certificate against, `None` for
    /// plaintext endpoints.
    fn tls_domain(&self) -> Option<&str> {
        let authority = self.endpoint.strip_prefix("https://")?.split('/').next()?;
        let host = authority.split(':').next()?;
        (!host.is_empty()).then_some(host)
    }

    fn exporter(&self) -> Result<SpanExporter> {
        let mut builder = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.endpoint)
            .with_timeout(EXPORT_TIMEOUT);

        if let Some(domain) = self.tls_domain() {
            builder = builder.with_tls_config(
                ClientTlsConfig::new()
                    .domain_name(domain)
                    .with_native_roots(),
            );
        }

        if !self.headers.is_empty() {
            builder = builder.with_metadata(metadata(&self.headers)?);
        }

        builder.build().context("failed to build OTLP span exporter")
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id.clone()),
            ])
            .build()
    }
}

/// `k1=v1,k2=v2`; entries without `=` are dropped.
fn header_pairs(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|entry| entry.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

// gRPC metadata keys ending in "-bin" carry base64 encoded bytes.
fn metadata(headers: &HashMap<String, String>) -> Result<MetadataMap> {
    let mut map = MetadataMap::with_capacity(headers.len());

    for (key, value) in headers {
        let key = key.to_ascii_lowercase();
        if key.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|e| anyhow::anyhow!("header {key}: failed to base64-decode: {e}"))?;
            let name = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .with_context(|| format!("header {key}: invalid binary key"))?;
            map.insert_bin(name, MetadataValue::from_bytes(&bytes));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .with_context(|| format!("header {key}: invalid key"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .with_context(|| format!("header {key}: invalid value"))?;
            map.insert(name, value);
        }
    }

    Ok(map)
}

fn with_scheme(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

fn init_tracer() -> Result<Tracer> {
    let settings = OtlpSettings::from_env();
    debug!(endpoint = %settings.endpoint, tls = settings.tls_domain().is_some(), "exporting spans");

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(settings.exporter()?)
        .with_resource(settings.resource())
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Install the global subscriber. Spans are also exported over OTLP/gRPC
/// when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// # Errors
///
/// Returns an error if the exporter or the subscriber cannot be installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty();

    let mut filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy();
    for directive in ["hyper=error", "tokio=error", "sqlx=warn", "opentelemetry_sdk=warn"] {
        filter = filter.add_directive(directive.parse()?);
    }

    let registry = Registry::default().with(fmt_layer);
    if var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let otel_layer = tracing_opentelemetry::layer().with_tracer(init_tracer()?);
        tracing::subscriber::set_global_default(registry.with(otel_layer).with(filter))?;
    } else {
        tracing::subscriber::set_global_default(registry.with(filter))?;
    }

    Ok(())
}

/// Flush pending spans. Does nothing when no exporter was installed.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = provider.shutdown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn settings(endpoint: &str) -> OtlpSettings {
        OtlpSettings {
            endpoint: with_scheme(endpoint),
            headers: HashMap::new(),
            instance_id: "test".into(),
        }
    }

    #[test]
    fn header_pairs_skip_malformed_entries() {
        assert!(header_pairs("").is_empty());

        let pairs = header_pairs("key1 = value1 , malformed, key2=a=b");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs.get("key1").map(String::as_str), Some("value1"));
        assert_eq!(pairs.get("key2").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn metadata_accepts_ascii_and_binary_values() {
        let headers = HashMap::from([
            ("Authorization".to_string(), "Bearer token123".to_string()),
            ("trace-bin".to_string(), "YmluYXJ5IGRhdGE=".to_string()),
        ]);

        let map = metadata(&headers).unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.get("authorization").is_some());
        assert!(map.get_bin("trace-bin").is_some());
    }

    #[test]
    fn metadata_rejects_invalid_base64() {
        let headers = HashMap::from([("trace-bin".to_string(), "not base64!".to_string())]);
        let err = metadata(&headers).unwrap_err();
        assert!(err.to_string().contains("failed to base64-decode"));
    }

    #[test]
    fn endpoint_without_scheme_uses_https() {
        assert_eq!(with_scheme("http://localhost:4317"), "http://localhost:4317");
        assert_eq!(
            with_scheme("collector.bulwark.dev:4317/"),
            "https://collector.bulwark.dev:4317"
        );
    }

    #[test]
    fn https_endpoints_verify_the_collector_host() {
        assert_eq!(
            settings("https://collector.bulwark.dev:4317/v1/traces").tls_domain(),
            Some("collector.bulwark.dev")
        );
        assert_eq!(
            settings("collector.bulwark.dev").tls_domain(),
            Some("collector.bulwark.dev")
        );
        assert_eq!(settings("http://localhost:4317").tls_domain(), None);
        assert_eq!(settings("https://:4317").tls_domain(), None);
    }

    #[test]
    fn resource_names_the_service() {
        let resource = settings(DEFAULT_ENDPOINT).resource();
        assert_eq!(
            resource
                .get(&opentelemetry::Key::new("service.name"))
                .map(|v| v.to_string()),
            Some(env!("CARGO_PKG_NAME").to_string())
        );
    }

    #[test]
    fn shutdown_without_provider() {
        shutdown_tracer();
    }
}
