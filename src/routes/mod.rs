mod courses;
mod health;
mod reviews;

use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::response::AppError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/reviews/due", get(reviews::due_cards))
        .route("/api/reviews", post(reviews::submit_review))
        .route("/api/courses/:course_id/cards", post(courses::generate_cards))
        .nest("/health", health::router())
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    AppError::not_found("resource not found").into_response()
}
