//! Aggregator configuration, defaults, and validation.
//!
//! The host passes its extra-config map to [`AggregatorConfig::from_extra`]; this crate only reads
//! the block stored under [`PLUGIN_NAME`].

// crates.io
use serde::{Deserialize, Serialize, de::Deserializer, ser::Serializer};
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

/// Namespace of the configuration block inside the host's extra-config map.
pub const PLUGIN_NAME: &str = "jwk-aggregator";
/// Default path serving the aggregated key set.
pub const DEFAULT_PATH: &str = "/jwk-aggregator";
/// Default freshness window for the cached key set.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Default background refresh interval.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Default per-origin request timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
/// Default per-origin connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default size guard (1 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1_048_576;
/// Maximum redirect depth.
pub const MAX_REDIRECTS: usize = 10;
/// Upper bound accepted for any configured duration (one year).
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration recognised by the aggregator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregatorConfig {
	/// Origins serving JWK set documents, merged in this order.
	pub origins: Vec<Url>,
	/// Whether the background refresh task runs.
	#[serde(default)]
	pub cache: bool,
	/// Request path answered with the aggregated key set.
	#[serde(default = "default_path")]
	pub path: String,
	/// Maximum age at which the cached key set is served without refetching.
	#[serde(
		default = "default_freshness_window",
		deserialize_with = "deserialize_secs",
		serialize_with = "serialize_secs"
	)]
	pub freshness_window: Duration,
	/// Period of the background refresh task.
	#[serde(
		default = "default_refresh_interval",
		deserialize_with = "deserialize_secs",
		serialize_with = "serialize_secs"
	)]
	pub refresh_interval: Duration,
	/// Timeout applied to each origin request.
	#[serde(
		default = "default_fetch_timeout",
		deserialize_with = "deserialize_secs",
		serialize_with = "serialize_secs"
	)]
	pub fetch_timeout: Duration,
	/// Timeout applied while establishing origin connections.
	#[serde(
		default = "default_connect_timeout",
		deserialize_with = "deserialize_secs",
		serialize_with = "serialize_secs"
	)]
	pub connect_timeout: Duration,
	/// Maximum size allowed for a single origin document in bytes.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
	/// Whether origins must use HTTPS.
	#[serde(default)]
	pub require_https: bool,
	/// Collapse concurrent stale-read refreshes into a single aggregation.
	#[serde(default)]
	pub collapse_concurrent_refreshes: bool,
}
impl AggregatorConfig {
	/// Construct a configuration with default settings for the given origins.
	pub fn new<I, S>(origins: I) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let origins = origins
			.into_iter()
			.map(|origin| Url::parse(origin.as_ref()))
			.collect::<std::result::Result<Vec<_>, _>>()?;

		Ok(Self {
			origins,
			cache: false,
			path: default_path(),
			freshness_window: DEFAULT_FRESHNESS_WINDOW,
			refresh_interval: DEFAULT_REFRESH_INTERVAL,
			fetch_timeout: DEFAULT_FETCH_TIMEOUT,
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			require_https: false,
			collapse_concurrent_refreshes: false,
		})
	}

	/// Read the configuration block out of a host extra-config map.
	pub fn from_extra(extra: &Map<String, Value>) -> Result<Self> {
		let block = match extra.get(PLUGIN_NAME) {
			Some(block @ Value::Object(_)) => block.clone(),
			_ => return Err(Error::ConfigurationMissing(PLUGIN_NAME)),
		};
		let config: Self = serde_json::from_value(block)?;

		config.validate()?;

		Ok(config)
	}

	/// Enable or disable the background refresh task.
	pub fn with_cache(mut self, cache: bool) -> Self {
		self.cache = cache;

		self
	}

	/// Override the freshness window.
	pub fn with_freshness_window(mut self, window: Duration) -> Self {
		self.freshness_window = window;

		self
	}

	/// Override the background refresh interval.
	pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
		self.refresh_interval = interval;

		self
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.origins.is_empty() {
			return Err(Error::Validation {
				field: "origins",
				reason: "Must contain at least one origin.".into(),
			});
		}
		if self.require_https {
			for origin in &self.origins {
				enforce_https(origin)?;
			}
		}
		if !self.path.starts_with('/') {
			return Err(Error::Validation { field: "path", reason: "Must start with '/'.".into() });
		}
		for (field, value) in [
			("freshness_window", self.freshness_window),
			("refresh_interval", self.refresh_interval),
			("fetch_timeout", self.fetch_timeout),
			("connect_timeout", self.connect_timeout),
		] {
			check_duration(field, value)?;
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}

		if self.cache && self.refresh_interval > self.freshness_window {
			tracing::warn!(
				refresh_interval = ?self.refresh_interval,
				freshness_window = ?self.freshness_window,
				"refresh interval exceeds freshness window; reads may refetch synchronously"
			);
		}

		Ok(())
	}
}

/// Ensure the provided URL uses HTTPS.
pub fn enforce_https(url: &Url) -> Result<()> {
	if url.scheme() == "https" {
		Ok(())
	} else {
		Err(Error::Validation { field: "origins", reason: format!("Origin {url} must use HTTPS.") })
	}
}

/// Reject durations that are zero or exceed [`MAX_DURATION`].
pub fn check_duration(field: &'static str, value: Duration) -> Result<()> {
	if value.is_zero() {
		return Err(Error::Validation { field, reason: "Must be greater than zero.".into() });
	}
	if value > MAX_DURATION {
		return Err(Error::Validation {
			field,
			reason: format!("Must not exceed {} seconds.", MAX_DURATION.as_secs()),
		});
	}

	Ok(())
}

/// `serde` helper accepting durations as (possibly fractional) seconds.
pub fn deserialize_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
	D: Deserializer<'de>,
{
	let secs = f64::deserialize(deserializer)?;

	Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

fn serialize_secs<S>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
	S: Serializer,
{
	serializer.serialize_f64(value.as_secs_f64())
}

fn default_path() -> String {
	DEFAULT_PATH.into()
}

fn default_freshness_window() -> Duration {
	DEFAULT_FRESHNESS_WINDOW
}

fn default_refresh_interval() -> Duration {
	DEFAULT_REFRESH_INTERVAL
}

fn default_fetch_timeout() -> Duration {
	DEFAULT_FETCH_TIMEOUT
}

fn default_connect_timeout() -> Duration {
	DEFAULT_CONNECT_TIMEOUT
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}
