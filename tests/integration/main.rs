//! Integration tests against wiremock origins.

mod aggregation;
mod boundary;

// std
use std::time::Duration;
// crates.io
use jwks_aggregator::AggregatorConfig;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

const JWKS_A: &str = r#"{
    "keys": [
        {
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "kid": "origin-a",
            "n": "AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyAhIiMkJSYnKCkqKywtLi8wMTIzNDU2Nzg5Ojs8PT4_QEFCQ0RFRkdISUpLTE1OT1BRUlNUVVZXWFlaW1xdXl9gYWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXp7fH1-f4A",
            "e": "AQAB"
        }
    ]
}"#;

const JWKS_C: &str = r#"{
    "keys": [
        { "kty": "OKP", "crv": "Ed25519", "kid": "origin-c-1", "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo" },
        { "kty": "OKP", "crv": "Ed25519", "kid": "origin-c-2", "x": "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a" }
    ]
}"#;

/// Mount a JWKS document at `route`, expecting `calls` requests.
async fn mount_jwks(
	server: &MockServer,
	route: &str,
	body: &str,
	calls: impl Into<wiremock::Times>,
) {
	Mock::given(method("GET"))
		.and(path(route))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string(body)
				.insert_header("content-type", "application/json"),
		)
		.expect(calls)
		.mount(server)
		.await;
}

fn config(server: &MockServer, routes: &[&str]) -> AggregatorConfig {
	let mut config =
		AggregatorConfig::new(routes.iter().map(|route| format!("{}{route}", server.uri())))
			.expect("config");

	config.fetch_timeout = Duration::from_secs(2);

	config
}

fn kids(jwks: &jwks_aggregator::JwkSet) -> Vec<String> {
	jwks.keys.iter().map(|key| key["kid"].as_str().unwrap_or_default().to_owned()).collect()
}
