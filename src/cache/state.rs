//! Cache state shared between the read path and aggregation runs.

// crates.io
use tokio::sync::RwLock;
// self
use crate::{_prelude::*, jwk::JwkSet};

/// Merged key set together with the metadata of the aggregation that produced it.
#[derive(Clone, Debug)]
pub struct CachedJwks {
	/// Merged key set.
	pub jwks: Arc<JwkSet>,
	/// Monotonic instant at which the aggregation committed.
	pub fetched_at: Instant,
	/// Wall-clock timestamp aligned with `fetched_at`.
	pub fetched_at_wallclock: DateTime<Utc>,
	/// Commit counter, starting at 1 for the first aggregation.
	pub generation: u64,
	/// Number of origins that failed during the aggregation.
	pub failed_origins: usize,
	/// Number of origins configured at aggregation time.
	pub total_origins: usize,
}
impl CachedJwks {
	/// Time elapsed since the aggregation committed.
	pub fn age(&self, now: Instant) -> Duration {
		now.saturating_duration_since(self.fetched_at)
	}

	/// Whether the payload is younger than `window`.
	pub fn is_fresh(&self, now: Instant, window: Duration) -> bool {
		self.age(now) < window
	}

	/// Freshness left before the payload turns stale.
	pub fn remaining(&self, now: Instant, window: Duration) -> Duration {
		window.saturating_sub(self.age(now))
	}

	/// Whether at least one origin was missing from the merge.
	pub fn is_degraded(&self) -> bool {
		self.failed_origins > 0
	}
}

/// Cache lifecycle states.
#[derive(Clone, Debug, Default)]
pub enum CacheState {
	/// No aggregation has completed yet.
	#[default]
	Empty,
	/// Result of the most recent aggregation.
	Populated(CachedJwks),
}
impl CacheState {
	/// Retrieve the current payload if available.
	pub fn payload(&self) -> Option<&CachedJwks> {
		match self {
			CacheState::Populated(cached) => Some(cached),
			CacheState::Empty => None,
		}
	}

	/// Generation of the current payload, `0` while empty.
	pub fn generation(&self) -> u64 {
		self.payload().map(|cached| cached.generation).unwrap_or(0)
	}
}

/// Shared handle over the [`CacheState`].
///
/// The payload is swapped wholesale under a single write lock, so readers always see a key set
/// paired with the timestamp of the run that produced it.
#[derive(Clone, Debug, Default)]
pub struct CacheStore {
	state: Arc<RwLock<CacheState>>,
}
impl CacheStore {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Clone the current state.
	pub async fn snapshot(&self) -> CacheState {
		self.state.read().await.clone()
	}

	/// Return the payload when it is still fresh at `now`.
	pub async fn fresh(&self, now: Instant, window: Duration) -> Option<CachedJwks> {
		let state = self.state.read().await;

		state.payload().filter(|cached| cached.is_fresh(now, window)).cloned()
	}

	/// Replace the payload with a newly merged key set, stamping it with the current time.
	pub(crate) async fn commit(
		&self,
		jwks: Arc<JwkSet>,
		failed_origins: usize,
		total_origins: usize,
	) -> CachedJwks {
		let mut state = self.state.write().await;
		let cached = CachedJwks {
			jwks,
			fetched_at: Instant::now(),
			fetched_at_wallclock: Utc::now(),
			generation: state.generation() + 1,
			failed_origins,
			total_origins,
		};

		*state = CacheState::Populated(cached.clone());

		cached
	}
}
