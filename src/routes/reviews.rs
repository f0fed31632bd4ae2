use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{self, AuthUser};
use crate::db::card_store::{Card, CardStore, SqliteCardStore, StoreError};
use crate::response::AppError;
use crate::services::fsrs::Rating;
use crate::services::interleave;
use crate::services::review::{self, ReviewError, ReviewInput};
use crate::services::scheduler::{self, SchedulerError};
use crate::state::AppState;

#[derive(Serialize)]
struct SuccessResponse<T> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DueCardsResponse {
    cards_due: usize,
    new_cards: usize,
    review_cards: usize,
    cards: Vec<Card>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitReviewRequest {
    card_id: String,
    rating: i64,
    #[serde(default)]
    duration_ms: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitReviewResponse {
    next_due: String,
    scheduled_days: f64,
    new_state: String,
}

pub async fn due_cards(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (store, user) = match authenticate(&state, &headers).await {
        Ok(value) => value,
        Err(response) => return response,
    };

    let now = Utc::now();
    let settings = match store.srs_settings(&user.id).await {
        Ok(settings) => settings,
        Err(err) => return store_error(err).into_response(),
    };

    let selection = match scheduler::select_due(store.as_ref(), &user.id, now, &settings).await {
        Ok(selection) => selection,
        Err(SchedulerError::Store(err)) => return store_error(err).into_response(),
    };

    let new_count = selection.new_cards.len();
    let review_count = selection.due_cards.len();

    // Reviews carry priority over new material in the session pool.
    let mut pool = selection.due_cards;
    pool.extend(selection.new_cards);
    let cards = if settings.interleave_reviews {
        interleave::interleave(pool, now)
    } else {
        pool
    };

    Json(SuccessResponse {
        success: true,
        data: DueCardsResponse {
            cards_due: cards.len(),
            new_cards: new_count,
            review_cards: review_count,
            cards,
        },
    })
    .into_response()
}

pub async fn submit_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SubmitReviewRequest>, JsonRejection>,
) -> Response {
    let (store, user) = match authenticate(&state, &headers).await {
        Ok(value) => value,
        Err(response) => return response,
    };

    let Ok(Json(payload)) = payload else {
        return AppError::validation("request body is not valid JSON").into_response();
    };

    if payload.card_id.trim().is_empty() {
        return AppError::validation("cardId is required").into_response();
    }
    let Some(rating) = Rating::try_from_i64(payload.rating) else {
        return AppError::validation("rating must be an integer between 1 and 4").into_response();
    };
    if payload.duration_ms.is_some_and(|ms| ms < 0) {
        return AppError::validation("durationMs must be non-negative").into_response();
    }

    let input = ReviewInput {
        card_id: payload.card_id,
        rating,
        duration_ms: payload.duration_ms,
        now: Utc::now(),
    };

    match review::submit_review(store.as_ref(), &user.id, input).await {
        Ok(outcome) => Json(SuccessResponse {
            success: true,
            data: SubmitReviewResponse {
                next_due: outcome
                    .next_due
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
                scheduled_days: outcome.scheduled_days,
                new_state: outcome.new_state.as_str().to_string(),
            },
        })
        .into_response(),
        Err(ReviewError::NotFound) => AppError::not_found("card not found").into_response(),
        Err(ReviewError::Conflict) => {
            AppError::conflict("card was updated concurrently; re-fetch and retry").into_response()
        }
        Err(ReviewError::Store(err)) => store_error(err).into_response(),
    }
}

pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(Arc<SqliteCardStore>, AuthUser), Response> {
    let Some(token) = auth::extract_token(headers) else {
        return Err(AppError::unauthorized("authentication token required").into_response());
    };
    let Some(store) = state.store() else {
        return Err(AppError::store_unavailable().into_response());
    };
    match auth::verify_request_token(store.as_ref(), &token).await {
        Ok(user) => Ok((store, user)),
        Err(err) => {
            tracing::debug!(error = %err, "token verification failed");
            Err(AppError::unauthorized("authentication failed").into_response())
        }
    }
}

pub(crate) fn store_error(err: StoreError) -> AppError {
    match err {
        StoreError::Unavailable(detail) => {
            tracing::warn!(error = %detail, "store unavailable");
            AppError::store_unavailable()
        }
        StoreError::Conflict => AppError::conflict("conflicting write"),
        StoreError::Internal(detail) => AppError::internal(detail),
    }
}
