//! Fan-out over the configured origins and merge of their key sets.

// self
use crate::{
	_prelude::*,
	cache::state::{CacheStore, CachedJwks},
	http::client::{Fetch, HttpFetcher},
	jwk::JwkSet,
	metrics::{self, CacheMetrics, Trigger},
};

/// Outcome of fetching a single origin during an aggregation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginReport {
	/// Origin that was fetched.
	pub origin: Url,
	/// Keys contributed to the merged set.
	pub keys: usize,
	/// Error kind when the origin was skipped.
	pub error: Option<&'static str>,
}

/// Result of one aggregation run, already committed to the cache.
#[derive(Clone, Debug)]
pub struct Aggregation {
	/// Committed payload.
	pub cached: CachedJwks,
	/// Per-origin outcomes in configuration order.
	pub reports: Vec<OriginReport>,
}
impl Aggregation {
	/// Merged key set.
	pub fn jwks(&self) -> &Arc<JwkSet> {
		&self.cached.jwks
	}

	/// Number of origins skipped because their fetch failed.
	pub fn failed_origins(&self) -> usize {
		self.cached.failed_origins
	}
}

/// Fetches every origin in order and commits the concatenated result.
///
/// This is the only writer of the [`CacheStore`] it was built with.
#[derive(Debug)]
pub struct Aggregator<F = HttpFetcher> {
	fetcher: F,
	origins: Arc<[Url]>,
	store: CacheStore,
	metrics: Arc<CacheMetrics>,
}
impl<F> Aggregator<F>
where
	F: Fetch,
{
	/// Create an aggregator writing into `store`.
	pub fn new(
		fetcher: F,
		origins: impl Into<Arc<[Url]>>,
		store: CacheStore,
		metrics: Arc<CacheMetrics>,
	) -> Self {
		Self { fetcher, origins: origins.into(), store, metrics }
	}

	/// Configured origins in merge order.
	pub fn origins(&self) -> &[Url] {
		&self.origins
	}

	/// Fetch all origins, merge the successful results, and commit them with a fresh timestamp.
	///
	/// Never fails: origins that error are logged and left out of the merge, so the result may be
	/// empty when every origin is down.
	#[tracing::instrument(skip_all, fields(origins = self.origins.len(), trigger = trigger.as_str()))]
	pub async fn aggregate(&self, trigger: Trigger) -> Aggregation {
		let started = Instant::now();
		let mut merged = JwkSet::new();
		let mut reports = Vec::with_capacity(self.origins.len());

		for origin in self.origins.iter() {
			match self.fetcher.fetch(origin).await {
				Ok(jwks) => {
					reports.push(OriginReport { origin: origin.clone(), keys: jwks.len(), error: None });
					merged.extend(jwks);
				},
				Err(err) => {
					tracing::warn!(
						origin = %origin,
						kind = err.kind(),
						error = %err,
						"skipping origin"
					);
					metrics::record_origin_failure(err.kind());
					reports.push(OriginReport {
						origin: origin.clone(),
						keys: 0,
						error: Some(err.kind()),
					});
				},
			}
		}

		let failed = reports.iter().filter(|report| report.error.is_some()).count();
		let keys = merged.len();
		let cached = self.store.commit(Arc::new(merged), failed, self.origins.len()).await;
		let elapsed = started.elapsed();

		self.metrics.record_aggregation(elapsed, failed);
		metrics::record_aggregation(trigger, elapsed, keys);

		if failed == self.origins.len() && failed > 0 {
			tracing::warn!(generation = cached.generation, "every origin failed; cached key set is empty");
		} else {
			tracing::debug!(
				generation = cached.generation,
				keys,
				failed,
				elapsed = ?elapsed,
				"aggregation committed"
			);
		}

		Aggregation { cached, reports }
	}
}
