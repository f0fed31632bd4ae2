use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::response::AppError;
use crate::routes::reviews::{authenticate, store_error};
use crate::services::generation::{self, GenerationSummary};
use crate::state::AppState;

#[derive(Serialize)]
struct SuccessResponse<T> {
    success: bool,
    data: T,
}

pub async fn generate_cards(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let (store, user) = match authenticate(&state, &headers).await {
        Ok(value) => value,
        Err(response) => return response,
    };

    if course_id.trim().is_empty() {
        return AppError::validation("courseId is required").into_response();
    }

    match generation::generate_cards(store.as_ref(), &user.id, &course_id, Utc::now()).await {
        Ok(summary) => Json(SuccessResponse::<GenerationSummary> {
            success: true,
            data: summary,
        })
        .into_response(),
        Err(err) => store_error(err).into_response(),
    }
}
