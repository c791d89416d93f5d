//! Plugs a hand-written [`ApiTransport`] into the coordinator: a flaky in-process backend that
//! fails twice with 503 before answering, showing backoff retries and deduplication.

// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use color_eyre::Result;
use serde_json::json;
// self
use resilient_api_client::{
	ApiResponse, ClientConfig, RequestCoordinator, RequestSpec,
	http::{ApiTransport, HttpRequest, TransportFuture},
};

#[derive(Default)]
struct FlakyBackend {
	calls: AtomicUsize,
}
impl ApiTransport for FlakyBackend {
	fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
		let call = self.calls.fetch_add(1, Ordering::SeqCst);

		println!("-> {} {} (dispatch #{})", request.method, request.path, call + 1);

		Box::pin(async move {
			tokio::time::sleep(std::time::Duration::from_millis(20)).await;

			if call < 2 {
				Ok(ApiResponse::new(503))
			} else {
				Ok(ApiResponse::json(200, &json!({ "online": 42, "offline": 3 })))
			}
		})
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let backend = Arc::new(FlakyBackend::default());
	let config = ClientConfig::default()
		.with_backoff(std::time::Duration::from_millis(50), std::time::Duration::from_millis(400))
		.with_jitter(true);
	let client = RequestCoordinator::builder(backend.clone()).with_config(config).build();
	let spec = RequestSpec::get("/routers/status");
	let (first, second) = tokio::join!(client.send(spec.clone()), client.send(spec));
	let first = first?;

	assert_eq!(first, second?);

	println!(
		"Status {} after {} dispatches: {}.",
		first.status,
		backend.calls.load(Ordering::SeqCst),
		String::from_utf8_lossy(&first.body)
	);

	Ok(())
}
