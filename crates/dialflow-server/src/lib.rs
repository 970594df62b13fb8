pub mod error;
pub mod notify;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use tower_http::cors::{Any, CorsLayer};

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
///
/// Fails when the data root has no config; the session store and signal
/// ledger are opened once here, not per request.
pub fn build_router(root: PathBuf) -> anyhow::Result<Router> {
    let app_state = state::AppState::new(root)?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        // Sessions
        .route("/api/sessions", get(routes::sessions::list_sessions))
        .route("/api/sessions", post(routes::sessions::create_session))
        .route("/api/sessions/{id}", get(routes::sessions::get_session))
        .route(
            "/api/sessions/{id}/advance",
            post(routes::sessions::advance_session),
        )
        .route(
            "/api/sessions/{id}/approve",
            post(routes::sessions::approve_session),
        )
        .route(
            "/api/sessions/{id}/reject",
            post(routes::sessions::reject_session),
        )
        .route(
            "/api/sessions/{id}/edit",
            post(routes::sessions::edit_session),
        )
        .route(
            "/api/sessions/{id}/retry",
            post(routes::sessions::retry_session),
        )
        .route(
            "/api/sessions/{id}/abort",
            post(routes::sessions::abort_session),
        )
        // Events (SSE)
        .route("/api/sessions/{id}/events", get(routes::events::sse_events))
        // Call sheet
        .route(
            "/api/sessions/{id}/call-sheet",
            get(routes::callsheet::get_call_sheet),
        )
        // Signals
        .route("/api/signals", post(routes::signals::ingest_signal))
        .route("/api/contacts/{id}/tier", get(routes::signals::get_tier))
        .route(
            "/api/contacts/{id}/disposition",
            post(routes::signals::apply_disposition),
        )
        .layer(cors)
        .with_state(app_state);

    Ok(router)
}

/// Start the dialflow API server.
pub async fn serve(root: PathBuf, port: u16) -> anyhow::Result<()> {
    let app = build_router(root)?;

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("dialflow API server listening on http://localhost:{port}");

    axum::serve(listener, app).await?;
    Ok(())
}
