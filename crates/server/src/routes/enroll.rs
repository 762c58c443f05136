//! Mobile-style onboarding: trade a one-time enrollment code for a freshly
//! issued token (spec §4.7).

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::error::ApiResult;
use crate::models::{EnrollRequest, EnrollResponse};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/v1/enroll",
    request_body = EnrollRequest,
    responses(
        (status = 200, description = "Token issued", body = EnrollResponse),
        (status = 422, description = "Code invalid, used, or expired", body = crate::error::ApiError),
    )
)]
pub async fn enroll(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnrollRequest>,
) -> ApiResult<Json<EnrollResponse>> {
    let issued = meshctl_store::tokens::redeem_enrollment_code(&state.db, &request.code, &state.token_pepper.0).await?;

    meshctl_store::tokens::record_audit_event(
        &state.db,
        "token.enrolled",
        &issued.token.client_id.to_string(),
        serde_json::json!({ "token_prefix": issued.token.token_prefix }),
    )
    .await;

    Ok(Json(EnrollResponse {
        client_id: issued.token.client_id,
        token: issued.plaintext,
    }))
}
