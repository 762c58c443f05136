pub mod auth;
pub mod cors;
pub mod headers;
pub mod logging;
pub mod metrics;
