//! Per-upload feature computation.
//!
//! Each feature is one aggregate query against state that existed before
//! the current upload row is inserted, so the upload never counts itself.
//! The computed vector is persisted on the upload (`decision_inputs_json`)
//! for replay and explainability.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;

use origin_core::policy::Features;

/// Computes the feature vector for a submission.
///
/// # Errors
///
/// Returns the underlying sqlx error on failure.
pub async fn compute(
    conn: &mut PgConnection,
    tenant_id: i64,
    account_id: i64,
    account_created_at: DateTime<Utc>,
    device_hash: Option<&str>,
    pvid: &str,
    now: DateTime<Utc>,
) -> Result<Features, sqlx::Error> {
    let account_age_days = (now - account_created_at).num_days().max(0);
    let since = now - Duration::hours(24);

    let upload_velocity_24h: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM uploads \
         WHERE tenant_id = $1 AND account_id = $2 AND received_at >= $3",
    )
    .bind(tenant_id)
    .bind(account_id)
    .bind(since)
    .fetch_one(&mut *conn)
    .await?;

    let device_velocity_24h: i64 = match device_hash {
        None => 0,
        Some(device_hash) => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM uploads \
                 WHERE tenant_id = $1 AND device_hash = $2 AND received_at >= $3",
            )
            .bind(tenant_id)
            .bind(device_hash)
            .bind(since)
            .fetch_one(&mut *conn)
            .await?
        }
    };

    let (prior_quarantine_count, prior_reject_count): (i64, i64) = sqlx::query_as(
        "SELECT \
             COUNT(*) FILTER (WHERE decision = 'QUARANTINE'), \
             COUNT(*) FILTER (WHERE decision = 'REJECT') \
         FROM uploads WHERE tenant_id = $1 AND account_id = $2",
    )
    .bind(tenant_id)
    .bind(account_id)
    .fetch_one(&mut *conn)
    .await?;

    let (pvid_prior_quarantine_count, pvid_prior_reject_count, pvid_prior_sightings): (
        i64,
        i64,
        i64,
    ) = sqlx::query_as(
        "SELECT \
             COUNT(*) FILTER (WHERE decision = 'QUARANTINE'), \
             COUNT(*) FILTER (WHERE decision = 'REJECT'), \
             COUNT(*) \
         FROM uploads WHERE tenant_id = $1 AND pvid = $2",
    )
    .bind(tenant_id)
    .bind(pvid)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Features {
        account_age_days,
        upload_velocity_24h,
        device_velocity_24h,
        prior_quarantine_count,
        prior_reject_count,
        pvid_prior_quarantine_count,
        pvid_prior_reject_count,
        pvid_prior_sightings,
    })
}
