//! Gateway-facing endpoints

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use shared::error::{ApiResponse, AppError, ErrorCode};
use shared::request::GatewayCallbackQuery;
use shared::response::GatewayInfo;

use crate::payments::FinalizeOutcome;
use crate::state::AppState;

/// GET /api/payments/gateways
pub async fn list_gateways(State(state): State<AppState>) -> ApiResponse<Vec<GatewayInfo>> {
    ApiResponse::success(state.gateways.available_gateways())
}

/// GET /api/payments/callback
///
/// The gateway only distinguishes 200 (settled), 400 (payment failed) and
/// 500 (anything else, worth retrying). A query that does not parse is
/// answered with 500 too, never with axum's plain-text 400.
pub async fn callback(
    State(state): State<AppState>,
    query: Result<Query<GatewayCallbackQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Malformed gateway callback");
            let err = AppError::validation(rejection.body_text());
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<()>::error(&err)),
            )
                .into_response();
        }
    };

    match state.payments.handle_callback(&query).await {
        Ok(outcome) => ApiResponse::success(serde_json::json!({
            "trackId": query.track_id,
            "alreadyApplied": outcome == FinalizeOutcome::AlreadyApplied,
        }))
        .into_response(),
        Err(e) => {
            let status = if e.code() == ErrorCode::PaymentFailed {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            let err: AppError = e.into();
            (status, Json(ApiResponse::<()>::error(&err))).into_response()
        }
    }
}
