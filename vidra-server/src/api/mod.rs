//! HTTP surface: only the job-producing shape. Players, admin UIs, and
//! auth live elsewhere.

pub mod uploads;
pub mod videos;
pub mod ws;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/videos", post(videos::create_video))
        .route("/api/videos/{id}", get(videos::get_video))
        .route(
            "/api/videos/{id}/retranscode",
            post(videos::retranscode_video),
        )
        .route("/api/uploads", post(uploads::init_upload))
        .route(
            "/api/uploads/{upload_id}/complete",
            post(uploads::complete_upload),
        )
        .route("/api/uploads/{upload_id}", delete(uploads::abort_upload))
        .route("/ws/progress/{video_id}", get(ws::progress_socket))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
