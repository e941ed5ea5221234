//! Metrics helpers and in-process telemetry bookkeeping.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

const METRIC_READS_TOTAL: &str = "jwks_aggregator_reads_total";
const METRIC_AGGREGATIONS_TOTAL: &str = "jwks_aggregator_aggregations_total";
const METRIC_AGGREGATION_DURATION: &str = "jwks_aggregator_aggregation_duration_seconds";
const METRIC_ORIGIN_FAILURES: &str = "jwks_aggregator_origin_failures_total";
const METRIC_KEYS: &str = "jwks_aggregator_keys";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// What caused an aggregation run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
	/// A read found the cache stale.
	Read,
	/// The background refresh task ticked.
	Background,
	/// An explicit refresh call.
	Manual,
}
impl Trigger {
	/// Metric label for the trigger.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Read => "read",
			Self::Background => "background",
			Self::Manual => "manual",
		}
	}
}

/// Thread-safe counters backing [`crate::CacheStatus`].
#[derive(Debug, Default)]
pub struct CacheMetrics {
	reads: AtomicU64,
	hits: AtomicU64,
	aggregations: AtomicU64,
	origin_failures: AtomicU64,
	last_aggregation_micros: AtomicU64,
}
impl CacheMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a read served from cache.
	pub fn record_hit(&self) {
		self.reads.fetch_add(1, Ordering::Relaxed);
		self.hits.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a read that required an aggregation.
	pub fn record_miss(&self) {
		self.reads.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a completed aggregation and its latency.
	pub fn record_aggregation(&self, duration: Duration, failed_origins: usize) {
		self.aggregations.fetch_add(1, Ordering::Relaxed);
		self.origin_failures.fetch_add(failed_origins as u64, Ordering::Relaxed);
		self.last_aggregation_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> CacheMetricsSnapshot {
		CacheMetricsSnapshot {
			reads: self.reads.load(Ordering::Relaxed),
			hits: self.hits.load(Ordering::Relaxed),
			aggregations: self.aggregations.load(Ordering::Relaxed),
			origin_failures: self.origin_failures.load(Ordering::Relaxed),
			last_aggregation_micros: match self.last_aggregation_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of the in-process counters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
	/// Total number of reads observed.
	pub reads: u64,
	/// Reads answered from the cache without aggregating.
	pub hits: u64,
	/// Completed aggregation runs, whatever their trigger.
	pub aggregations: u64,
	/// Origin fetch failures summed over every aggregation.
	pub origin_failures: u64,
	/// Microsecond latency of the most recent aggregation.
	pub last_aggregation_micros: Option<u64>,
}
impl CacheMetricsSnapshot {
	/// Ratio of cache hits to reads.
	pub fn hit_rate(&self) -> f64 {
		if self.reads == 0 { 0.0 } else { self.hits as f64 / self.reads as f64 }
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a read outcome.
pub fn record_read(hit: bool) {
	let outcome = if hit { "hit" } else { "miss" };

	metrics::counter!(METRIC_READS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a completed aggregation with its latency and resulting key count.
pub fn record_aggregation(trigger: Trigger, duration: Duration, keys: usize) {
	metrics::counter!(METRIC_AGGREGATIONS_TOTAL, "trigger" => trigger.as_str()).increment(1);
	metrics::histogram!(METRIC_AGGREGATION_DURATION).record(duration.as_secs_f64());
	metrics::gauge!(METRIC_KEYS).set(keys as f64);
}

/// Record a skipped origin.
pub fn record_origin_failure(kind: &'static str) {
	metrics::counter!(METRIC_ORIGIN_FAILURES, "kind" => kind).increment(1);
}
