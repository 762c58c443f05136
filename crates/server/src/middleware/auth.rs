/// Admin JWT validation middleware, applied only to `/v1/admin/...` routes.
use std::sync::Arc;

use axum::{body::Body, extract::Request, http::header, middleware::Next, response::Response};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn jwt_auth_middleware(mut request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("invalid authorization header format"))?;

    let state = request
        .extensions()
        .get::<Arc<AppState>>()
        .cloned()
        .ok_or_else(|| ApiError::internal_error("application state missing from request"))?;

    let claims = state.auth_config.validate_token(token)?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
