//! HTTP helpers for retrieving origin JWK sets.

pub mod client;
