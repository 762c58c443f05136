/// CORS layer, configurable by environment. The admin surface is the only
/// browser-facing consumer (node agents never send CORS preflights), but
/// the wildcard ban mirrors the teacher unchanged.
use axum::http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tracing::info;

pub fn create_cors_layer() -> CorsLayer {
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());

    if allowed_origins.contains('*') {
        panic!("CORS_ALLOWED_ORIGINS cannot contain wildcard (*)");
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|origin| {
            let origin = origin.trim();
            if origin.is_empty() {
                return None;
            }
            origin.parse::<HeaderValue>().ok()
        })
        .collect();

    if origins.is_empty() {
        panic!("CORS_ALLOWED_ORIGINS must contain at least one explicit origin");
    }

    info!("configuring CORS with {} allowed origins", origins.len());

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "wildcard")]
    fn wildcard_origin_rejected() {
        std::env::set_var("CORS_ALLOWED_ORIGINS", "*");
        let _layer = create_cors_layer();
    }
}
