use crate::services::registration::FunctionSpec;
use anyhow::Result;
use hearth_library::types::Technology;
use prometheus::{Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Bucket ladder covering sub-10ms through 10s latencies so percentile
/// estimates stay meaningful for short function calls.
pub const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

const FUNCTION_LABELS: &[&str] = &["function_id", "function_name", "language", "technology"];
const CONTAINER_LABELS: &[&str] = &["container_name"];

/// Records execution telemetry from every in-flight invocation.
/// All operations are monotonic accumulation or gauge overwrite and are safe
/// under concurrent callers; nothing here blocks the dispatcher meaningfully.
pub struct TelemetrySink {
    registry: Registry,
    pub(crate) requests: IntCounterVec,
    pub(crate) errors: IntCounterVec,
    pub(crate) duration: HistogramVec,
    pub(crate) container_cpu: GaugeVec,
    pub(crate) container_memory: GaugeVec,
}

impl TelemetrySink {
    pub fn new() -> Result<Arc<Self>> {
        let registry = Registry::new();
        let requests = IntCounterVec::new(
            Opts::new("hearth_invocations_total", "Total invocation requests dispatched"),
            FUNCTION_LABELS,
        )?;
        registry.register(Box::new(requests.clone()))?;
        let errors = IntCounterVec::new(
            Opts::new(
                "hearth_invocation_errors_total",
                "Invocations whose function exited non-zero",
            ),
            FUNCTION_LABELS,
        )?;
        registry.register(Box::new(errors.clone()))?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "hearth_invocation_duration_seconds",
                "Wall-clock duration of function execution",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            FUNCTION_LABELS,
        )?;
        registry.register(Box::new(duration.clone()))?;
        let container_cpu = GaugeVec::new(
            Opts::new(
                "hearth_container_cpu_total",
                "Last observed cumulative CPU usage per warm container",
            ),
            CONTAINER_LABELS,
        )?;
        registry.register(Box::new(container_cpu.clone()))?;
        let container_memory = GaugeVec::new(
            Opts::new(
                "hearth_container_memory_bytes",
                "Last observed memory usage per warm container",
            ),
            CONTAINER_LABELS,
        )?;
        registry.register(Box::new(container_memory.clone()))?;
        Ok(Arc::new(TelemetrySink {
            registry,
            requests,
            errors,
            duration,
            container_cpu,
            container_memory,
        }))
    }

    pub fn record_request(&self, function: &FunctionSpec, technology: Technology) {
        let id = function.id.to_string();
        let tech = technology.to_string();
        self.requests
            .with_label_values(&[&id, &function.name, &function.language, &tech])
            .inc();
    }

    pub fn record_error(&self, function: &FunctionSpec, technology: Technology) {
        let id = function.id.to_string();
        let tech = technology.to_string();
        self.errors
            .with_label_values(&[&id, &function.name, &function.language, &tech])
            .inc();
    }

    pub fn record_duration(&self, function: &FunctionSpec, technology: Technology, seconds: f64) {
        let id = function.id.to_string();
        let tech = technology.to_string();
        self.duration
            .with_label_values(&[&id, &function.name, &function.language, &tech])
            .observe(seconds);
    }

    /// Last-observed values keyed by container name, intentionally
    /// overwriting the previous reading for that container.
    pub fn record_container_stats(&self, container_name: &str, cpu: f64, memory: f64) {
        self.container_cpu.with_label_values(&[container_name]).set(cpu);
        self.container_memory.with_label_values(&[container_name]).set(memory);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the full registry in the prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buf = vec![];
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_library::types::Language;

    fn spec() -> FunctionSpec {
        FunctionSpec {
            id: 7,
            name: "hello".to_string(),
            language: Language::Python.to_string(),
            code: "print('hi')".to_string(),
            timeout_sec: 5,
        }
    }

    #[test]
    fn counters_accumulate_per_label_set() {
        let sink = TelemetrySink::new().unwrap();
        let f = spec();
        sink.record_request(&f, Technology::Docker);
        sink.record_request(&f, Technology::Docker);
        sink.record_request(&f, Technology::Gvisor);
        sink.record_error(&f, Technology::Docker);
        let docker = sink
            .requests
            .with_label_values(&["7", "hello", "python", "docker"])
            .get();
        assert_eq!(docker, 2);
        let gvisor = sink
            .requests
            .with_label_values(&["7", "hello", "python", "gvisor"])
            .get();
        assert_eq!(gvisor, 1);
        assert_eq!(sink.errors.with_label_values(&["7", "hello", "python", "docker"]).get(), 1);
    }

    #[test]
    fn histogram_observes_with_reference_buckets() {
        let sink = TelemetrySink::new().unwrap();
        let f = spec();
        sink.record_duration(&f, Technology::Docker, 0.003);
        sink.record_duration(&f, Technology::Docker, 0.8);
        let h = sink.duration.with_label_values(&["7", "hello", "python", "docker"]);
        assert_eq!(h.get_sample_count(), 2);
        let rendered = sink.render().unwrap();
        assert!(rendered.contains("hearth_invocation_duration_seconds_bucket"));
        assert!(rendered.contains("le=\"0.005\""));
        assert!(rendered.contains("le=\"10\""));
    }

    #[test]
    fn gauges_overwrite_per_container() {
        let sink = TelemetrySink::new().unwrap();
        sink.record_container_stats("python_docker_pool_0", 100.0, 2048.0);
        sink.record_container_stats("python_docker_pool_0", 250.0, 4096.0);
        assert_eq!(
            sink.container_cpu.with_label_values(&["python_docker_pool_0"]).get(),
            250.0
        );
        assert_eq!(
            sink.container_memory
                .with_label_values(&["python_docker_pool_0"])
                .get(),
            4096.0
        );
    }
}
