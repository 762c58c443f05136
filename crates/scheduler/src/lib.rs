//! Rotation Scheduler (C5): time-driven advancement of CA and client
//! certificate lifecycles. Exposes a pure `run_once` step so the wake loop
//! in `main.rs`-style callers stays a thin `tokio::time::interval` shim
//! around it, the same split the teacher uses for `sweep_connect_sessions`
//! and `sweep_offline_nodes`.

pub mod error;

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

pub use error::{Error, Result};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub ca_rotate_at: Duration,
    pub ca_total_validity: Duration,
    pub cert_renew_before: Duration,
    pub overlap_window: Duration,
    pub wake_interval: StdDuration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            ca_rotate_at: Duration::days(365),
            ca_total_validity: Duration::days(548),
            cert_renew_before: Duration::days(90),
            overlap_window: Duration::days(90),
            wake_interval: StdDuration::from_secs(3600),
        }
    }
}

/// What one wake accomplished, logged by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub ca_rotated: bool,
    pub cas_demoted_from_chain: u64,
    pub clients_marked_dirty: u64,
    pub certs_pruned: u64,
}

/// Performs one wake's worth of work (spec §4.5 steps 1–3), in order. Every
/// decision is a pure function of `now` and committed store state, so
/// running this twice within the same period is safe: the second call finds
/// nothing left to do.
pub async fn run_once(pool: &PgPool, settings: &SchedulerSettings, now: DateTime<Utc>) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    report.ca_rotated = rotate_ca_if_due(pool, settings, now).await?;
    report.cas_demoted_from_chain =
        meshctl_store::ca_repo::demote_expired_from_chain(pool, now, settings.overlap_window).await?;
    report.clients_marked_dirty =
        meshctl_store::cert_repo::mark_renewal_dirty(pool, now, settings.cert_renew_before).await?;
    report.certs_pruned = meshctl_store::cert_repo::prune_revoked_expired(pool, now).await?;

    Ok(report)
}

/// Step 1: at most one rotation per wake. `None` current CA is treated as
/// "nothing to rotate" here — bootstrapping the first CA is an operator
/// action (the `cli` crate), not something the scheduler originates.
async fn rotate_ca_if_due(pool: &PgPool, settings: &SchedulerSettings, now: DateTime<Utc>) -> Result<bool> {
    let current = match meshctl_store::ca_repo::get_signing_ca(pool).await {
        Ok(ca) => ca,
        Err(meshctl_store::Error::ServiceUnavailable) => return Ok(false),
        Err(other) => return Err(other.into()),
    };

    let age = now - current.not_before;
    if age < settings.ca_rotate_at {
        return Ok(false);
    }

    let new_name = format!("{}-rotated-{}", current.name, now.format("%Y%m%d%H%M%S"));
    meshctl_store::ca_repo::create_and_activate(pool, &new_name, now, now + settings.ca_total_validity).await?;

    tracing::info!(
        previous = current.name,
        new_ca = new_name,
        age_days = age.num_days(),
        "rotated current signing CA"
    );

    Ok(true)
}

/// Spawns the wake loop as a background task, in the shape of the teacher's
/// `main.rs` sweep tasks: a named interval ticker that logs and swallows
/// per-wake failures so a single bad tick never aborts the process.
pub fn spawn(pool: PgPool, settings: SchedulerSettings) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(settings.wake_interval);
        loop {
            ticker.tick().await;
            match run_once(&pool, &settings, Utc::now()).await {
                Ok(report) => {
                    if report.ca_rotated || report.cas_demoted_from_chain > 0 || report.clients_marked_dirty > 0 {
                        tracing::info!(
                            ca_rotated = report.ca_rotated,
                            cas_demoted = report.cas_demoted_from_chain,
                            clients_dirtied = report.clients_marked_dirty,
                            certs_pruned = report.certs_pruned,
                            "rotation scheduler wake completed"
                        );
                    }
                }
                Err(err) => {
                    tracing::error!(%err, "rotation scheduler wake failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults_match_spec_durations() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.ca_rotate_at, Duration::days(365));
        assert_eq!(settings.ca_total_validity, Duration::days(548));
        assert_eq!(settings.cert_renew_before, Duration::days(90));
        assert_eq!(settings.overlap_window, Duration::days(90));
        assert_eq!(settings.wake_interval, StdDuration::from_secs(3600));
    }

    #[test]
    fn report_default_is_all_zero() {
        let report = SweepReport::default();
        assert_eq!(report, SweepReport::default());
        assert!(!report.ca_rotated);
        assert_eq!(report.cas_demoted_from_chain, 0);
    }
}
