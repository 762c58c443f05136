//! The node agent's distribution endpoint (spec §6.1).

use std::sync::Arc;

use axum::{extract::State, Json};
use base64::Engine;
use chrono::Utc;

use crate::error::{ApiError, ApiResult};
use crate::models::{ClientConfigRequest, ClientConfigResponse};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/v1/client/config",
    request_body = ClientConfigRequest,
    responses(
        (status = 200, description = "Bundle assembled", body = ClientConfigResponse),
        (status = 401, description = "Invalid or inactive token", body = ApiError),
        (status = 403, description = "Client is blocked", body = ApiError),
        (status = 409, description = "Client has no IP assignment", body = ApiError),
        (status = 429, description = "Rate limited", body = ApiError),
        (status = 503, description = "No signing CA configured", body = ApiError),
    )
)]
pub async fn fetch_config(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClientConfigRequest>,
) -> ApiResult<Json<ClientConfigResponse>> {
    let client_id = meshctl_store::tokens::resolve(&state.db, &request.token, &state.token_pepper.0)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid or inactive token"))?;

    let rate_limit_key = rate_limit_key(&request.token);
    if let Err(retry_after) = state.rate_limiter.check(&rate_limit_key).await {
        return Err(ApiError::rate_limited(
            "rate limit exceeded for this token",
            retry_after.as_secs().max(1),
        ));
    }

    if request.client_version.is_some() || request.nebula_version.is_some() {
        meshctl_store::client_repo::record_reported_versions(
            &state.db,
            client_id,
            request.client_version.as_deref(),
            request.nebula_version.as_deref(),
        )
        .await?;
    }

    let spki_der = decode_public_key(&request.public_key)?;

    let bundle = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        meshctl_assembler::assemble(&state.db, client_id, spki_der, &state.assembler_settings, Utc::now()),
    )
    .await
    .map_err(|_| ApiError::transient("bundle assembly exceeded its request deadline"))??;

    Ok(Json(ClientConfigResponse {
        config: bundle.config_yaml,
        client_cert_pem: bundle.client_cert_pem,
        ca_chain_pems: bundle.ca_chain_pems,
        cert_not_before: bundle.cert_not_before,
        cert_not_after: bundle.cert_not_after,
        lighthouse: bundle.is_lighthouse,
        key_path: bundle.expected_private_key_path,
    }))
}

/// Accepts either raw PEM text or base64-encoded DER, since agents across
/// platforms differ in which their local keygen tooling emits.
fn decode_public_key(input: &str) -> ApiResult<Vec<u8>> {
    let trimmed = input.trim();
    if trimmed.starts_with("-----BEGIN") {
        let (_, block) = x509_parser::pem::parse_x509_pem(trimmed.as_bytes())
            .map_err(|e| ApiError::bad_request(format!("invalid PEM public key: {e}")))?;
        return Ok(block.contents);
    }

    base64::engine::general_purpose::STANDARD
        .decode(trimmed)
        .map_err(|e| ApiError::bad_request(format!("public_key is neither valid PEM nor base64 DER: {e}")))
}

/// Rate-limit buckets are keyed by token (spec §9), but never by the
/// plaintext — reuse the same hash the resolver already computed indirectly
/// by hashing again here; cheap, and avoids threading the hash back out of
/// `tokens::resolve`.
fn rate_limit_key(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
