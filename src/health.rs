//! Health endpoint
//!
//! A trivial HTTP server reporting the detector's state: `200 - OK` while
//! clean, `503 - Detected` once a hit or fail-safe has occurred. A 404 is
//! deliberately never used for the status route, since "not found" could be
//! misread as "clean". Served from a dedicated thread on its own
//! current-thread runtime so the detector itself stays synchronous.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use std::sync::Arc;
use tracing::{error, info};

use crate::detect::DetectorShared;

async fn respond_health(State(shared): State<Arc<DetectorShared>>) -> (StatusCode, &'static str) {
	if shared.is_detected() {
		(StatusCode::SERVICE_UNAVAILABLE, "503 - Detected\n")
	} else {
		(StatusCode::OK, "200 - OK\n")
	}
}

async fn respond_log(State(shared): State<Arc<DetectorShared>>) -> (StatusCode, String) {
	match shared.hits_csv() {
		Some(csv) => (StatusCode::OK, csv),
		None => (StatusCode::NOT_FOUND, "404 - Not found\n".to_string()),
	}
}

fn router(shared: Arc<DetectorShared>) -> Router {
	let mut app = Router::new().route("/", get(respond_health));
	if shared.disclose {
		app = app.route("/log", get(respond_log));
	}
	app.with_state(shared)
}

fn serve(port: u16, shared: Arc<DetectorShared>) -> std::io::Result<()> {
	let rt = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()?;
	rt.block_on(async move {
		let app = router(shared);
		let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
		info!("health endpoint listening on port {port}");
		axum::serve(listener, app).await
	})
}

/// Start the endpoint on its own thread. A server that cannot run means
/// status can no longer be reported, which is itself a coverage failure:
/// the detector fails safe.
pub fn spawn(port: u16, shared: Arc<DetectorShared>) {
	std::thread::spawn(move || {
		if let Err(err) = serve(port, shared.clone()) {
			error!("health endpoint failed: {err}");
			shared.mark_detected();
		}
	});
}
