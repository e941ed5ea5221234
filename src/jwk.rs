//! Opaque JWK and JWK set document types.

// crates.io
use serde::{Deserialize, Serialize};

/// A single JSON Web Key, passed through without interpretation.
pub type Jwk = serde_json::Value;

/// Ordered collection of JWKs shaped as `{"keys": [...]}`.
///
/// Deserialisation requires a `keys` array and ignores any other top-level members; serialisation
/// only ever emits `keys`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JwkSet {
	/// Keys in origin order.
	pub keys: Vec<Jwk>,
}
impl JwkSet {
	/// Create an empty key set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of keys in the set.
	pub fn len(&self) -> usize {
		self.keys.len()
	}

	/// Whether the set holds no keys.
	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}

	/// Append another set's keys, preserving their order.
	pub fn extend(&mut self, other: JwkSet) {
		self.keys.extend(other.keys);
	}
}
impl FromIterator<Jwk> for JwkSet {
	fn from_iter<I: IntoIterator<Item = Jwk>>(iter: I) -> Self {
		Self { keys: iter.into_iter().collect() }
	}
}
