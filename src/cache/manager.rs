//! Cache manager answering reads and driving background refresh.

// crates.io
use serde::{Deserialize, Serialize};
use tokio::{
	runtime::Handle,
	sync::Mutex,
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	aggregate::{Aggregation, Aggregator},
	cache::state::{CacheState, CacheStore, CachedJwks},
	config::{AggregatorConfig, check_duration},
	http::client::{Fetch, HttpFetcher},
	jwk::JwkSet,
	metrics::{self, CacheMetrics, CacheMetricsSnapshot, Trigger},
};

/// Serves the aggregated key set, aggregating synchronously when the cache is stale.
///
/// Clones share the same cache, aggregator, and counters.
#[derive(Debug)]
pub struct CacheManager<F = HttpFetcher> {
	aggregator: Arc<Aggregator<F>>,
	store: CacheStore,
	freshness_window: Duration,
	collapse_concurrent_refreshes: bool,
	single_flight: Arc<Mutex<()>>,
	metrics: Arc<CacheMetrics>,
}
impl CacheManager<HttpFetcher> {
	/// Build a cache manager with an HTTP fetcher configured from `config`.
	pub fn from_config(config: &AggregatorConfig) -> Result<Self> {
		config.validate()?;

		Ok(Self::with_fetcher(HttpFetcher::new(config)?, config))
	}
}
impl<F> CacheManager<F>
where
	F: Fetch + 'static,
{
	/// Build a cache manager around a custom fetcher.
	pub fn with_fetcher(fetcher: F, config: &AggregatorConfig) -> Self {
		let store = CacheStore::new();
		let metrics = CacheMetrics::new();
		let aggregator =
			Aggregator::new(fetcher, config.origins.clone(), store.clone(), metrics.clone());

		Self {
			aggregator: Arc::new(aggregator),
			store,
			freshness_window: config.freshness_window,
			collapse_concurrent_refreshes: config.collapse_concurrent_refreshes,
			single_flight: Arc::new(Mutex::new(())),
			metrics,
		}
	}

	/// Maximum age at which the cached set is served without aggregating.
	pub fn freshness_window(&self) -> Duration {
		self.freshness_window
	}

	/// Configured origins in merge order.
	pub fn origins(&self) -> &[Url] {
		self.aggregator.origins()
	}

	/// Access the in-process counters.
	pub fn metrics(&self) -> Arc<CacheMetrics> {
		self.metrics.clone()
	}

	/// Clone the current cache state without touching the network.
	pub async fn snapshot(&self) -> CacheState {
		self.store.snapshot().await
	}

	/// Classify the cache at the current instant.
	pub async fn freshness(&self) -> Freshness {
		Freshness::of(&self.store.snapshot().await, Instant::now(), self.freshness_window)
	}

	/// Return the merged key set, aggregating first when the cache is empty or stale.
	pub async fn read(&self) -> Arc<JwkSet> {
		self.read_cached().await.jwks
	}

	/// Like [`CacheManager::read`] but returns the payload metadata as well.
	pub async fn read_cached(&self) -> CachedJwks {
		if let Some(cached) = self.store.fresh(Instant::now(), self.freshness_window).await {
			self.observe_hit();
			tracing::debug!(generation = cached.generation, "serving cached key set");

			return cached;
		}

		if self.collapse_concurrent_refreshes {
			let _guard = self.single_flight.lock().await;

			// Another reader may have refilled the cache while we waited.
			if let Some(cached) = self.store.fresh(Instant::now(), self.freshness_window).await {
				self.observe_hit();

				return cached;
			}

			self.observe_miss();

			return self.aggregator.aggregate(Trigger::Read).await.cached;
		}

		self.observe_miss();
		tracing::debug!("cache stale; aggregating on read path");

		self.aggregator.aggregate(Trigger::Read).await.cached
	}

	/// Aggregate now regardless of freshness.
	pub async fn refresh(&self) -> Aggregation {
		self.aggregator.aggregate(Trigger::Manual).await
	}

	/// Spawn a task aggregating every `interval` until the returned handle is shut down or dropped.
	///
	/// The first run happens one `interval` after the call. Must be invoked from within a Tokio
	/// runtime.
	pub fn start_background_refresh(&self, interval: Duration) -> Result<RefreshHandle> {
		check_duration("refresh_interval", interval)?;

		let runtime = Handle::try_current().map_err(|err| Error::Runtime(err.to_string()))?;
		let cancel = CancellationToken::new();
		let token = cancel.clone();
		let aggregator = self.aggregator.clone();
		let task = runtime.spawn(async move {
			let start = Instant::now();
			let mut ticker =
				time::interval_at(start.checked_add(interval).unwrap_or(start), interval);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			tracing::info!(interval = ?interval, "background refresh started");

			loop {
				tokio::select! {
					() = token.cancelled() => break,
					_ = ticker.tick() => {
						let aggregation = aggregator.aggregate(Trigger::Background).await;

						if aggregation.failed_origins() > 0 {
							tracing::warn!(
								failed = aggregation.failed_origins(),
								total = aggregation.cached.total_origins,
								"background refresh completed with unreachable origins"
							);
						}
					},
				}
			}

			tracing::info!("background refresh stopped");
		});

		Ok(RefreshHandle { cancel, task: Mutex::new(Some(task)) })
	}

	/// Summarise the cache for status reporting.
	pub async fn status(&self) -> CacheStatus {
		let state = self.store.snapshot().await;
		let now = Instant::now();
		let freshness = Freshness::of(&state, now, self.freshness_window);
		let payload = state.payload();

		CacheStatus {
			freshness,
			keys: payload.map(|cached| cached.jwks.len()).unwrap_or(0),
			generation: state.generation(),
			last_fetch: payload.map(|cached| cached.fetched_at_wallclock),
			age_secs: payload.map(|cached| cached.age(now).as_secs_f64()),
			failed_origins: payload.map(|cached| cached.failed_origins).unwrap_or(0),
			total_origins: self.origins().len(),
			metrics: self.metrics.snapshot(),
		}
	}

	fn observe_hit(&self) {
		metrics::record_read(true);

		self.metrics.record_hit();
	}

	fn observe_miss(&self) {
		metrics::record_read(false);

		self.metrics.record_miss();
	}
}
impl<F> Clone for CacheManager<F> {
	fn clone(&self) -> Self {
		Self {
			aggregator: self.aggregator.clone(),
			store: self.store.clone(),
			freshness_window: self.freshness_window,
			collapse_concurrent_refreshes: self.collapse_concurrent_refreshes,
			single_flight: self.single_flight.clone(),
			metrics: self.metrics.clone(),
		}
	}
}

/// Freshness classification of the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Freshness {
	/// No aggregation has completed yet.
	Empty,
	/// The payload is younger than the freshness window.
	Fresh,
	/// The payload has reached the freshness window; the next read aggregates.
	Stale,
}
impl Freshness {
	fn of(state: &CacheState, now: Instant, window: Duration) -> Self {
		match state.payload() {
			None => Self::Empty,
			Some(cached) if cached.is_fresh(now, window) => Self::Fresh,
			Some(_) => Self::Stale,
		}
	}
}

/// Status projection of the cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheStatus {
	/// Freshness at capture time.
	pub freshness: Freshness,
	/// Number of keys in the cached set.
	pub keys: usize,
	/// Generation of the cached set, `0` while empty.
	pub generation: u64,
	/// Wall-clock time of the last committed aggregation.
	pub last_fetch: Option<DateTime<Utc>>,
	/// Age of the cached set in seconds.
	pub age_secs: Option<f64>,
	/// Origins that failed during the last aggregation.
	pub failed_origins: usize,
	/// Configured origins.
	pub total_origins: usize,
	/// In-process counters.
	pub metrics: CacheMetricsSnapshot,
}

/// Lifecycle handle for the background refresh task.
///
/// Dropping the handle cancels the task; [`RefreshHandle::shutdown`] also waits for it to exit.
#[derive(Debug)]
pub struct RefreshHandle {
	cancel: CancellationToken,
	task: Mutex<Option<JoinHandle<()>>>,
}
impl RefreshHandle {
	/// Token observed by the task; cancelling it stops the loop.
	pub fn cancellation_token(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Signal the task to stop and wait until it has exited.
	///
	/// An aggregation already in flight completes before the task exits.
	pub async fn shutdown(&self) {
		self.cancel.cancel();

		let task = self.task.lock().await.take();

		if let Some(task) = task
			&& let Err(err) = task.await
		{
			tracing::warn!(error = %err, "background refresh task ended abnormally");
		}
	}
}
impl Drop for RefreshHandle {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}
