//! The authoritative policy store (C3): clients, hierarchical groups,
//! firewall rulesets, IP pools/assignments, CAs, tokens, enrollment codes,
//! and the audit log. Every mutation that could change a client's emitted
//! bundle bumps that client's `config_dirty_at` in the same transaction.

pub mod ca_repo;
pub mod cert_repo;
pub mod client_repo;
pub mod db;
pub mod error;
pub mod firewall_repo;
pub mod group_repo;
pub mod ip_repo;
pub mod models;
pub mod tokens;

pub use error::{Error, Result};

use sqlx::PgPool;

/// Thin handle bundling the connection pool other crates depend on, mirroring
/// the teacher's `AppState` pattern of carrying the pool as shared state
/// rather than threading it through every call individually.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        db::health_check(&self.pool).await.map_err(|e| Error::Transient(e.to_string()))
    }
}
