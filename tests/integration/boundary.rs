//! Serving the aggregated set through host extra-config registration.

// std
use std::convert::Infallible;
// crates.io
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Full};
use jwks_aggregator::{Error, JwksAggregator, PLUGIN_NAME, register_handlers, try_register_handlers};
use serde_json::{Map, Value, json};
use tower::{Layer, ServiceExt, service_fn, util::Either};
use wiremock::MockServer;
// self
use crate::{JWKS_A, JWKS_C, mount_jwks};

type Body = Full<Bytes>;

fn extra(block: Value) -> Map<String, Value> {
	let mut extra = Map::new();

	extra.insert(PLUGIN_NAME.into(), block);

	extra
}

async fn send<S>(service: S, method: Method, path: &str) -> Response<Body>
where
	S: tower::Service<Request<Body>, Response = Response<Body>>,
	S::Error: std::fmt::Debug,
{
	let request = Request::builder().method(method).uri(path).body(Body::default()).expect("request");

	service.oneshot(request).await.expect("response")
}

async fn body(response: Response<Body>) -> Bytes {
	response.into_body().collect().await.expect("body").to_bytes()
}

#[tokio::test]
async fn registered_handler_serves_merged_keys() {
	let server = MockServer::start().await;

	mount_jwks(&server, "/a", JWKS_A, 1).await;
	mount_jwks(&server, "/c", JWKS_C, 1).await;

	let extra = extra(json!({
		"origins": [format!("{}/a", server.uri()), format!("{}/c", server.uri())],
		"cache": false,
	}));
	let inner = service_fn(|req: Request<Body>| async move {
		Ok::<_, Infallible>(Response::new(Body::from(format!("inner:{}", req.uri().path()))))
	});
	let service = register_handlers(&extra, inner);

	assert!(matches!(service, Either::Left(_)));

	let response = send(service.clone(), Method::GET, "/jwk-aggregator").await;

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
	assert!(response.headers().get(header::WARNING).is_none());

	let document: Value = serde_json::from_slice(&body(response).await).expect("json");
	let kids = document["keys"]
		.as_array()
		.expect("keys array")
		.iter()
		.map(|key| key["kid"].as_str().expect("kid"))
		.collect::<Vec<_>>();

	assert_eq!(kids, ["origin-a", "origin-c-1", "origin-c-2"]);

	// Served from cache; the mocks expect a single hit each.
	let response = send(service.clone(), Method::GET, "/jwk-aggregator").await;

	assert_eq!(response.status(), StatusCode::OK);

	let response = send(service, Method::GET, "/health").await;

	assert_eq!(&body(response).await[..], b"inner:/health");
}

#[tokio::test]
async fn degraded_origins_are_flagged() {
	let server = MockServer::start().await;

	mount_jwks(&server, "/a", JWKS_A, 1).await;

	let extra = extra(json!({
		"origins": [format!("{}/a", server.uri()), format!("{}/missing", server.uri())],
		"path": "/.well-known/jwks.json",
	}));
	let aggregator = JwksAggregator::from_extra(&extra).expect("aggregator");
	let inner = service_fn(|_: Request<Body>| async {
		Ok::<_, Infallible>(Response::new(Body::from("inner")))
	});
	let service = aggregator.layer().layer(inner);
	let response = send(service, Method::GET, "/.well-known/jwks.json").await;

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(
		response.headers()[header::WARNING],
		"199 jwk-aggregator \"1 of 2 origins unavailable\""
	);

	let document: Value = serde_json::from_slice(&body(response).await).expect("json");

	assert_eq!(document["keys"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn missing_configuration_passes_through() {
	let inner = service_fn(|req: Request<Body>| async move {
		Ok::<_, Infallible>(Response::new(Body::from(format!("inner:{}", req.uri().path()))))
	});

	match try_register_handlers(&Map::new(), inner.clone()) {
		Err((Error::ConfigurationMissing(name), _)) => assert_eq!(name, PLUGIN_NAME),
		Err((err, _)) => panic!("unexpected error: {err}"),
		Ok(_) => panic!("registration must fail without a configuration block"),
	}

	let service = register_handlers(&Map::new(), inner);

	assert!(matches!(service, Either::Right(_)));

	let response = send(service, Method::GET, "/jwk-aggregator").await;

	assert_eq!(&body(response).await[..], b"inner:/jwk-aggregator");
}
