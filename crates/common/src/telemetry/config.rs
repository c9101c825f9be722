use opentelemetry_sdk::{logs::LoggerProvider, trace::TracerProvider as SdkTracerProvider};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Reported as `service.name`; nodes of one fleet share it
    pub service_name: String,
    /// OTLP gRPC collector endpoint
    pub otel_endpoint: String,
    /// Without this only JSON logs are written to stdout
    pub otel_enabled: bool,
    /// Default filter; `RUST_LOG` takes precedence
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "canopy".to_string(),
            otel_endpoint: "http://localhost:4317".to_string(),
            otel_enabled: false,
            log_level: "info".to_string(),
        }
    }
}

/// Exporter pipelines that must outlive the node so buffered spans and logs
/// get flushed by `shutdown_telemetry`
pub struct TelemetryProviders {
    pub tracer_provider: SdkTracerProvider,
    pub logger_provider: LoggerProvider,
}
