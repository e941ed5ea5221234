//! HTTP client integration for origin JWK set retrieval.

// std
use std::future::Future;
// crates.io
use http::{HeaderValue, header::ACCEPT};
use reqwest::{Client, Response, redirect::Policy};
// self
use crate::{
	_prelude::*,
	config::{AggregatorConfig, MAX_REDIRECTS},
	jwk::JwkSet,
};

/// Retrieves the JWK set document served by a single origin.
pub trait Fetch: Send + Sync {
	/// Fetch and parse the key set at `origin`.
	fn fetch(
		&self,
		origin: &Url,
	) -> impl Future<Output = std::result::Result<JwkSet, FetchError>> + Send;
}
impl<T> Fetch for Arc<T>
where
	T: Fetch,
{
	fn fetch(
		&self,
		origin: &Url,
	) -> impl Future<Output = std::result::Result<JwkSet, FetchError>> + Send {
		(**self).fetch(origin)
	}
}

/// [`Fetch`] implementation backed by a shared reqwest client.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
	client: Client,
	timeout: Duration,
	max_response_bytes: u64,
}
impl HttpFetcher {
	/// Build a fetcher with a client configured from `config`.
	pub fn new(config: &AggregatorConfig) -> Result<Self> {
		let client = Client::builder()
			.redirect(Policy::limited(MAX_REDIRECTS))
			.user_agent(format!("jwks-aggregator/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(config.connect_timeout)
			.build()?;

		Ok(Self::with_client(client, config))
	}

	/// Build a fetcher using the supplied HTTP client (primarily for tests).
	pub fn with_client(client: Client, config: &AggregatorConfig) -> Self {
		Self {
			client,
			timeout: config.fetch_timeout,
			max_response_bytes: config.max_response_bytes,
		}
	}

	/// Execute a GET against `origin` and parse the body as a JWK set.
	pub async fn fetch_jwks(&self, origin: &Url) -> std::result::Result<JwkSet, FetchError> {
		let start = Instant::now();
		let response = self
			.client
			.get(origin.clone())
			.header(ACCEPT, HeaderValue::from_static("application/json"))
			.timeout(self.timeout)
			.send()
			.await
			.map_err(|err| FetchError::Unreachable {
				origin: origin.clone(),
				status: None,
				reason: err.to_string(),
			})?;
		let status = response.status();

		if !status.is_success() {
			return Err(FetchError::Unreachable {
				origin: origin.clone(),
				status: Some(status),
				reason: format!("Upstream HTTP status {status}."),
			});
		}

		let body = read_body(origin, response, self.max_response_bytes).await?;
		let jwks: JwkSet = serde_json::from_slice(&body)
			.map_err(|source| FetchError::ParseFailed { origin: origin.clone(), source })?;

		tracing::debug!(
			origin = %origin,
			status = %status,
			keys = jwks.len(),
			elapsed = ?start.elapsed(),
			"jwks fetch complete"
		);

		Ok(jwks)
	}
}
impl Fetch for HttpFetcher {
	fn fetch(
		&self,
		origin: &Url,
	) -> impl Future<Output = std::result::Result<JwkSet, FetchError>> + Send {
		self.fetch_jwks(origin)
	}
}

async fn read_body(
	origin: &Url,
	mut response: Response,
	limit: u64,
) -> std::result::Result<Vec<u8>, FetchError> {
	let too_large = |size: u64| FetchError::ReadFailed {
		origin: origin.clone(),
		reason: format!(
			"Response size {size} bytes exceeds the configured guard of {limit} bytes."
		),
	};

	if let Some(length) = response.content_length()
		&& length > limit
	{
		return Err(too_large(length));
	}

	let mut body = Vec::new();

	while let Some(chunk) = response.chunk().await.map_err(|err| FetchError::ReadFailed {
		origin: origin.clone(),
		reason: err.to_string(),
	})? {
		let size = (body.len() + chunk.len()) as u64;

		if size > limit {
			return Err(too_large(size));
		}

		body.extend_from_slice(&chunk);
	}

	Ok(body)
}
