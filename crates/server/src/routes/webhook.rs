//! Leak-scanner integration (spec §6.2, §4.6): a public secret-scanning
//! service discovers tokens committed to source repositories and reports
//! them back here over a signed webhook.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};

use crate::auth::verify_webhook_signature;
use crate::error::{ApiError, ApiResult};
use crate::models::{SecretScanningItem, SecretScanningPattern, SecretScanningRevokeResult, SecretScanningVerifyResult};
use crate::state::AppState;

const PATTERN_TAG: &str = "meshctl-client-token";
// Real tokens are `mct_` followed by 32 secret bytes, hex-encoded (64 chars) —
// see `meshctl_store::tokens::{TOKEN_TAG, TOKEN_SECRET_BYTES}`.
const PATTERN_REGEX: &str = "mct_[a-z0-9]{64}";
const SIGNATURE_HEADER: &str = "X-Signature-256";

#[utoipa::path(
    get,
    path = "/.well-known/secret-scanning.json",
    responses((status = 200, description = "Token shape patterns", body = [SecretScanningPattern]))
)]
pub async fn patterns() -> Json<Vec<SecretScanningPattern>> {
    Json(vec![SecretScanningPattern {
        kind: PATTERN_TAG.to_string(),
        pattern: PATTERN_REGEX.to_string(),
    }])
}

fn require_signature(headers: &HeaderMap, secret: &[u8], body: &[u8]) -> ApiResult<()> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing webhook signature header"))?;

    if verify_webhook_signature(secret, body, signature) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("webhook signature does not match"))
    }
}

fn parse_items(body: &Bytes) -> ApiResult<Vec<SecretScanningItem>> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid webhook payload: {e}")))
}

#[utoipa::path(
    post,
    path = "/v1/secret-scanning/verify",
    responses(
        (status = 200, description = "Per-token active/inactive metadata", body = [SecretScanningVerifyResult]),
        (status = 401, description = "Bad or missing signature", body = ApiError),
    )
)]
pub async fn verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Vec<SecretScanningVerifyResult>>> {
    require_signature(&headers, &state.webhook_secret.0, &body)?;
    let items = parse_items(&body)?;

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let active = meshctl_store::tokens::resolve(&state.db, &item.token, &state.token_pepper.0)
            .await?
            .is_some();
        results.push(SecretScanningVerifyResult {
            token_prefix: item.token.chars().take(8).collect(),
            active,
        });
    }

    Ok(Json(results))
}

#[utoipa::path(
    post,
    path = "/v1/secret-scanning/revoke",
    responses(
        (status = 200, description = "Count of tokens deactivated", body = SecretScanningRevokeResult),
        (status = 401, description = "Bad or missing signature", body = ApiError),
    )
)]
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<SecretScanningRevokeResult>> {
    require_signature(&headers, &state.webhook_secret.0, &body)?;
    let items = parse_items(&body)?;

    let mut revoked_count = 0u64;
    for item in items {
        let deactivated = meshctl_store::tokens::deactivate_leaked(&state.db, &item.token, &item.url, &state.token_pepper.0).await?;
        if deactivated > 0 {
            revoked_count += deactivated;
            meshctl_store::tokens::record_audit_event(
                &state.db,
                "token.leak_revoked",
                &item.token.chars().take(8).collect::<String>(),
                serde_json::json!({ "found_url": item.url }),
            )
            .await;
        }
    }

    Ok(Json(SecretScanningRevokeResult { revoked_count }))
}
