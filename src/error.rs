//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the JWKS aggregator crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Configuration block '{0}' not found.")]
	ConfigurationMissing(&'static str),
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Runtime error: {0}")]
	Runtime(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}

/// Failure retrieving a single origin's key set.
///
/// Every variant is local to its origin: the aggregator logs it and moves on.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
	#[error("Origin {origin} is unreachable: {reason}")]
	Unreachable { origin: url::Url, status: Option<http::StatusCode>, reason: String },
	#[error("Failed to read response body from {origin}: {reason}")]
	ReadFailed { origin: url::Url, reason: String },
	#[error("Failed to parse JWK set from {origin}: {source}")]
	ParseFailed {
		origin: url::Url,
		#[source]
		source: serde_json::Error,
	},
}
impl FetchError {
	/// Stable label used in logs and metrics.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Unreachable { .. } => "unreachable",
			Self::ReadFailed { .. } => "read_failed",
			Self::ParseFailed { .. } => "parse_failed",
		}
	}

	/// Origin the failure belongs to.
	pub fn origin(&self) -> &url::Url {
		match self {
			Self::Unreachable { origin, .. }
			| Self::ReadFailed { origin, .. }
			| Self::ParseFailed { origin, .. } => origin,
		}
	}
}
