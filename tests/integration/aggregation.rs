//! End-to-end coverage for merging, caching, and background refresh.

// std
use std::time::Duration;
// crates.io
use jwks_aggregator::{CacheManager, Freshness, HttpFetcher, JwksAggregator, Result};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::{JWKS_A, JWKS_C, config, kids, mount_jwks};

#[tokio::test]
async fn merges_reachable_origins_in_order() -> Result<()> {
	let _ = tracing_subscriber::fmt().with_env_filter("jwks_aggregator=debug").try_init();
	let server = MockServer::start().await;

	mount_jwks(&server, "/a", JWKS_A, 1).await;
	Mock::given(method("GET"))
		.and(path("/b"))
		.respond_with(ResponseTemplate::new(500))
		.expect(1)
		.mount(&server)
		.await;
	mount_jwks(&server, "/c", JWKS_C, 1).await;

	let manager = CacheManager::from_config(&config(&server, &["/a", "/b", "/c"]))?;
	let aggregation = manager.refresh().await;

	assert_eq!(kids(aggregation.jwks()), ["origin-a", "origin-c-1", "origin-c-2"]);
	assert_eq!(aggregation.failed_origins(), 1);
	assert_eq!(aggregation.reports[1].error, Some("unreachable"));

	let status = manager.status().await;

	assert_eq!(status.freshness, Freshness::Fresh);
	assert_eq!(status.keys, 3);
	assert_eq!(status.failed_origins, 1);
	assert_eq!(status.total_origins, 3);

	Ok(())
}

#[tokio::test]
async fn fresh_reads_are_served_from_cache() -> Result<()> {
	let server = MockServer::start().await;

	mount_jwks(&server, "/a", JWKS_A, 1).await;

	let manager = CacheManager::from_config(&config(&server, &["/a"]))?;

	for _ in 0..5 {
		assert_eq!(kids(&*manager.read().await), ["origin-a"]);
	}

	let metrics = manager.metrics().snapshot();

	assert_eq!(metrics.reads, 5);
	assert_eq!(metrics.hits, 4);
	assert_eq!(metrics.aggregations, 1);

	Ok(())
}

#[tokio::test]
async fn stale_read_aggregates_again() -> Result<()> {
	let server = MockServer::start().await;

	mount_jwks(&server, "/a", JWKS_A, 2).await;

	let config = config(&server, &["/a"]).with_freshness_window(Duration::from_millis(200));
	let manager = CacheManager::from_config(&config)?;
	let first = manager.read_cached().await;

	tokio::time::sleep(Duration::from_millis(300)).await;

	assert_eq!(manager.freshness().await, Freshness::Stale);

	let second = manager.read_cached().await;

	assert_eq!(second.generation, first.generation + 1);
	assert_eq!(second.jwks, first.jwks);

	Ok(())
}

#[tokio::test]
async fn unreachable_origin_does_not_poison_cache() -> Result<()> {
	let server = MockServer::start().await;
	let mut config = config(&server, &["/a"]);

	config.origins.insert(0, "http://127.0.0.1:9/jwks".parse()?);
	config.fetch_timeout = Duration::from_millis(500);
	config.connect_timeout = Duration::from_millis(500);
	mount_jwks(&server, "/a", JWKS_A, 1).await;

	let manager = CacheManager::with_fetcher(HttpFetcher::new(&config)?, &config);
	let aggregation = manager.refresh().await;

	assert_eq!(kids(aggregation.jwks()), ["origin-a"]);
	assert_eq!(aggregation.reports[0].error, Some("unreachable"));

	Ok(())
}

#[tokio::test]
async fn background_refresh_keeps_cache_warm() -> Result<()> {
	let server = MockServer::start().await;

	mount_jwks(&server, "/a", JWKS_A, 2..).await;

	let config = config(&server, &["/a"])
		.with_cache(true)
		.with_freshness_window(Duration::from_millis(400))
		.with_refresh_interval(Duration::from_millis(150));
	let aggregator = JwksAggregator::from_config(config)?;
	let manager = aggregator.manager();

	assert_eq!(manager.freshness().await, Freshness::Empty);

	tokio::time::sleep(Duration::from_millis(550)).await;

	let status = manager.status().await;

	assert_eq!(status.freshness, Freshness::Fresh);
	assert!(status.generation >= 2, "generation {}", status.generation);

	let aggregations = manager.metrics().snapshot().aggregations;

	assert_eq!(kids(&*manager.read().await), ["origin-a"]);
	assert_eq!(manager.metrics().snapshot().aggregations, aggregations);

	aggregator.shutdown().await;

	let generation = manager.status().await.generation;

	tokio::time::sleep(Duration::from_millis(400)).await;

	assert_eq!(manager.status().await.generation, generation);

	Ok(())
}
