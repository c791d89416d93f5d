//! Drives the coordinator against a mocked ISP backend over reqwest: a policy table from JSON,
//! an expired access token refreshed transparently, and an error toast subscriber.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde::Deserialize;
use serde_json::json;
// self
use resilient_api_client::{
	RequestCoordinator, RequestSpec,
	auth::{JwtRefreshProvider, MemoryCredentials},
	http::ReqwestTransport,
	policy::EndpointPolicyRegistry,
};

#[derive(Debug, Deserialize)]
struct Customer {
	id: u64,
	name: String,
	plan: String,
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let _expired = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/customers/").header("authorization", "Bearer expired");
			then.status(401).json_body(json!({ "detail": "Given token not valid" }));
		})
		.await;
	let customers = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/customers/").header("authorization", "Bearer renewed");
			then.status(200).json_body(json!([
				{ "id": 1, "name": "Acme Networks", "plan": "fiber-500" },
				{ "id": 2, "name": "Northwind", "plan": "dsl-50" }
			]));
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/refresh/");
			then.status(200).json_body(json!({ "access": "renewed" }));
		})
		.await;
	let _missing = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/routers/404/");
			then.status(404).json_body(json!({ "detail": "Router not found." }));
		})
		.await;
	let policies = EndpointPolicyRegistry::from_json_str(
		r#"{
			"default": { "max_requests": 100, "window_ms": 60000 },
			"endpoints": [
				{ "method": "POST", "path": "/auth/login", "max_requests": 5,
				  "window_ms": 60000, "retry_after_ms": 60000 }
			]
		}"#,
	)?;
	let transport = Arc::new(ReqwestTransport::new(&server.url("/api"))?);
	let credentials = MemoryCredentials::new("expired", "refresh-token").with_identity("noc-operator");
	let auth = JwtRefreshProvider::new(transport.clone(), credentials, "/auth/refresh/");
	let client = RequestCoordinator::builder(transport)
		.with_policies(policies)
		.with_auth(Arc::new(auth))
		.with_login_redirect(Arc::new(|| println!("Session ended; redirecting to /login.")))
		.build();
	let _toasts = client.subscribe(|err| println!("[toast] {}: {}", err.code, err.message));
	let listing =
		client.send_json::<Vec<Customer>>(RequestSpec::get("/customers/")).await?;

	for customer in &listing {
		println!("Customer #{} {} on {}.", customer.id, customer.name, customer.plan);
	}

	if let Err(err) = client.send(RequestSpec::get("/routers/404/")).await {
		println!("Lookup failed with {} (HTTP {:?}).", err.code, err.http_status);
	}

	customers.assert_async().await;
	refresh.assert_async().await;

	println!("Refresh cycles: {}.", client.refresh_metrics().attempts());

	Ok(())
}
