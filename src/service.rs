//! Tower integration serving the aggregated key set in front of a host service.
//!
//! Requests to the configured path are answered from the [`CacheManager`]; everything else is
//! passed to the wrapped service untouched.

// std
use std::{
	future::Future,
	pin::Pin,
	task::{Context, Poll},
};
// crates.io
use http::{
	HeaderValue, Method, Request, Response, StatusCode,
	header::{ALLOW, CACHE_CONTROL, CONTENT_TYPE, LAST_MODIFIED, WARNING},
};
use serde_json::{Map, Value};
use tower::{Layer, Service, util::Either};
// self
use crate::{
	_prelude::*,
	cache::{
		manager::{CacheManager, RefreshHandle},
		state::CachedJwks,
	},
	config::{AggregatorConfig, PLUGIN_NAME},
	http::client::{Fetch, HttpFetcher},
};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Fully wired aggregator: HTTP fetcher, cache manager, and optional background refresh.
#[derive(Debug)]
pub struct JwksAggregator {
	config: AggregatorConfig,
	manager: CacheManager,
	refresh: Option<Arc<RefreshHandle>>,
}
impl JwksAggregator {
	/// Build the aggregator, starting the background refresh when `config.cache` is set.
	///
	/// Must be called from within a Tokio runtime when the background refresh is enabled.
	pub fn from_config(config: AggregatorConfig) -> Result<Self> {
		let manager = CacheManager::from_config(&config)?;
		let refresh = if config.cache {
			Some(Arc::new(manager.start_background_refresh(config.refresh_interval)?))
		} else {
			None
		};

		tracing::info!(
			origins = config.origins.len(),
			path = %config.path,
			background_refresh = config.cache,
			"jwk aggregator configured"
		);

		Ok(Self { config, manager, refresh })
	}

	/// Build the aggregator from the host's extra-config map.
	pub fn from_extra(extra: &Map<String, Value>) -> Result<Self> {
		Self::from_config(AggregatorConfig::from_extra(extra)?)
	}

	/// Active configuration.
	pub fn config(&self) -> &AggregatorConfig {
		&self.config
	}

	/// Underlying cache manager.
	pub fn manager(&self) -> &CacheManager {
		&self.manager
	}

	/// Layer serving the aggregated set; it keeps the background refresh alive while in use.
	pub fn layer(&self) -> JwksLayer {
		JwksLayer {
			manager: self.manager.clone(),
			path: Arc::from(self.config.path.as_str()),
			refresh: self.refresh.clone(),
		}
	}

	/// Stop the background refresh, if any, and wait for it to exit.
	pub async fn shutdown(&self) {
		if let Some(refresh) = &self.refresh {
			refresh.shutdown().await;
		}
	}
}

/// Wrap `inner` with the aggregator configured under [`PLUGIN_NAME`] in `extra`.
///
/// On failure the error is returned together with the untouched inner service.
pub fn try_register_handlers<S>(
	extra: &Map<String, Value>,
	inner: S,
) -> std::result::Result<JwksService<S>, (Error, S)> {
	match JwksAggregator::from_extra(extra) {
		Ok(aggregator) => Ok(aggregator.layer().layer(inner)),
		Err(err) => Err((err, inner)),
	}
}

/// Like [`try_register_handlers`], but falls back to the inner service after logging the error.
pub fn register_handlers<S>(extra: &Map<String, Value>, inner: S) -> Either<JwksService<S>, S> {
	match try_register_handlers(extra, inner) {
		Ok(service) => Either::Left(service),
		Err((err, inner)) => {
			tracing::warn!(
				plugin = PLUGIN_NAME,
				error = %err,
				"aggregator disabled; passing requests through"
			);

			Either::Right(inner)
		},
	}
}

/// [`Layer`] producing [`JwksService`].
#[derive(Debug)]
pub struct JwksLayer<F = HttpFetcher> {
	manager: CacheManager<F>,
	path: Arc<str>,
	refresh: Option<Arc<RefreshHandle>>,
}
impl<F> JwksLayer<F>
where
	F: Fetch + 'static,
{
	/// Serve `manager` at `path`.
	pub fn new(manager: CacheManager<F>, path: impl Into<Arc<str>>) -> Self {
		Self { manager, path: path.into(), refresh: None }
	}

	/// Tie a background refresh to the lifetime of the layer and the services it builds.
	pub fn with_refresh(mut self, refresh: RefreshHandle) -> Self {
		self.refresh = Some(Arc::new(refresh));

		self
	}
}
impl<F> Clone for JwksLayer<F> {
	fn clone(&self) -> Self {
		Self { manager: self.manager.clone(), path: self.path.clone(), refresh: self.refresh.clone() }
	}
}
impl<S, F> Layer<S> for JwksLayer<F> {
	type Service = JwksService<S, F>;

	fn layer(&self, inner: S) -> Self::Service {
		JwksService {
			inner,
			manager: self.manager.clone(),
			path: self.path.clone(),
			_refresh: self.refresh.clone(),
		}
	}
}

/// Service answering the aggregated key set path and delegating everything else.
#[derive(Debug)]
pub struct JwksService<S, F = HttpFetcher> {
	inner: S,
	manager: CacheManager<F>,
	path: Arc<str>,
	_refresh: Option<Arc<RefreshHandle>>,
}
impl<S, F> Clone for JwksService<S, F>
where
	S: Clone,
{
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
			manager: self.manager.clone(),
			path: self.path.clone(),
			_refresh: self._refresh.clone(),
		}
	}
}
impl<S, F, ReqBody, ResBody> Service<Request<ReqBody>> for JwksService<S, F>
where
	S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
	S::Future: Send + 'static,
	F: Fetch + 'static,
	ReqBody: Send + 'static,
	ResBody: From<String> + Send + 'static,
{
	type Error = S::Error;
	type Future = BoxFuture<std::result::Result<Self::Response, Self::Error>>;
	type Response = Response<ResBody>;

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
		if req.uri().path() != &*self.path {
			// Call the instance that was driven to readiness.
			let clone = self.inner.clone();
			let mut inner = std::mem::replace(&mut self.inner, clone);

			return Box::pin(inner.call(req));
		}

		let manager = self.manager.clone();
		let method = req.method().clone();

		Box::pin(async move { Ok(respond(&manager, &method).await) })
	}
}

async fn respond<F, B>(manager: &CacheManager<F>, method: &Method) -> Response<B>
where
	F: Fetch + 'static,
	B: From<String>,
{
	if *method != Method::GET && *method != Method::HEAD {
		let mut response = empty(StatusCode::METHOD_NOT_ALLOWED);

		response.headers_mut().insert(ALLOW, HeaderValue::from_static("GET, HEAD"));

		return response;
	}

	let cached = manager.read_cached().await;
	let body = match serde_json::to_string(&*cached.jwks) {
		Ok(body) => body,
		Err(err) => {
			tracing::error!(error = %err, "failed to encode aggregated key set");

			return empty(StatusCode::INTERNAL_SERVER_ERROR);
		},
	};
	let body = if *method == Method::HEAD { String::new() } else { body };
	let mut response = Response::new(B::from(body));

	insert_cache_headers(&mut response, &cached, manager.freshness_window());
	tracing::debug!(
		keys = cached.jwks.len(),
		generation = cached.generation,
		degraded = cached.is_degraded(),
		"served aggregated key set"
	);

	response
}

fn insert_cache_headers<B>(response: &mut Response<B>, cached: &CachedJwks, window: Duration) {
	let headers = response.headers_mut();
	let max_age = cached.remaining(Instant::now(), window).as_secs();

	headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

	if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={max_age}")) {
		headers.insert(CACHE_CONTROL, value);
	}
	if let Ok(value) =
		HeaderValue::from_str(&httpdate::fmt_http_date(cached.fetched_at_wallclock.into()))
	{
		headers.insert(LAST_MODIFIED, value);
	}
	if cached.is_degraded() {
		let warning = format!(
			"199 {PLUGIN_NAME} \"{failed} of {total} origins unavailable\"",
			failed = cached.failed_origins,
			total = cached.total_origins,
		);

		if let Ok(value) = HeaderValue::from_str(&warning) {
			headers.insert(WARNING, value);
		}
	}
}

fn empty<B>(status: StatusCode) -> Response<B>
where
	B: From<String>,
{
	let mut response = Response::new(B::from(String::new()));

	*response.status_mut() = status;

	response
}
