//! Async JWKS aggregator: fetches key sets from many origins, merges them into one document, and
//! keeps the result cached with lazy revalidation plus an optional background refresh.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod http;
pub mod jwk;
pub mod metrics;
pub mod service;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;
	pub use url::Url;

	pub use crate::{Error, FetchError, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	aggregate::{Aggregation, Aggregator, OriginReport},
	cache::{
		manager::{CacheManager, CacheStatus, Freshness, RefreshHandle},
		state::{CacheState, CacheStore, CachedJwks},
	},
	config::{AggregatorConfig, PLUGIN_NAME},
	error::{Error, FetchError, Result},
	http::client::{Fetch, HttpFetcher},
	jwk::{Jwk, JwkSet},
	metrics::Trigger,
	service::{JwksAggregator, JwksLayer, JwksService, register_handlers, try_register_handlers},
};
