//! Enrollment source: who is graded in this run.

use async_trait::async_trait;
use labgrade_core::config::PostgresConfig;
use labgrade_core::{EnrollmentEntry, LaunchContext};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::error::EnrollmentError;

#[async_trait]
pub trait EnrollmentSource: Send + Sync {
    /// All learners launched from the given grading context.
    async fn entries(&self, context_id: &str) -> Result<Vec<EnrollmentEntry>, EnrollmentError>;
}

/// Reads LTI launch records from the hub's PostgreSQL database.
#[derive(Debug, Clone)]
pub struct PgEnrollmentSource {
    pool: PgPool,
}

impl PgEnrollmentSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool and verify it with a round trip, so an unreachable
    /// database fails the run before anything is scheduled.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, EnrollmentError> {
        let mut options = PgConnectOptions::new()
            .port(config.port)
            .username(&config.username)
            .database(&config.database);
        options = if config.is_socket() {
            options.socket(&config.host)
        } else {
            options.host(&config.host)
        };
        if let Some(ref password) = config.password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;
        sqlx::query("SELECT 1").execute(&pool).await?;

        info!(host = %config.host, db = %config.database, "connected to enrollment database");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl EnrollmentSource for PgEnrollmentSource {
    async fn entries(&self, context_id: &str) -> Result<Vec<EnrollmentEntry>, EnrollmentError> {
        let rows = sqlx::query(
            "SELECT user_id::text AS user_id, launch_info::text AS launch_info \
             FROM lti_launch_info_v1 \
             WHERE resource_link_id = $1",
        )
        .bind(context_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let identity: String = row.try_get("user_id")?;
            let raw: Option<String> = row.try_get("launch_info")?;
            entries.push(EnrollmentEntry::new(identity.clone(), parse_launch_info(&identity, raw)));
        }

        info!(context_id, count = entries.len(), "loaded enrollment");
        Ok(entries)
    }
}

/// Unreadable launch info still yields an entry: the learner gets graded
/// and the missing outcome fields surface later as a report failure.
fn parse_launch_info(identity: &str, raw: Option<String>) -> LaunchContext {
    let Some(raw) = raw else {
        warn!(identity, "launch info is NULL");
        return LaunchContext::default();
    };
    match LaunchContext::from_json_str(&raw) {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!(identity, error = %e, "launch info is not a JSON object");
            LaunchContext::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_launch_info_object() {
        let ctx = parse_launch_info(
            "u1",
            Some(r#"{"lis_result_sourcedid":"s-1","lis_outcome_service_url":"https://lms/x"}"#.into()),
        );
        assert_eq!(ctx.result_sourcedid(), Some("s-1"));
    }

    #[test]
    fn null_or_malformed_launch_info_is_empty() {
        assert_eq!(parse_launch_info("u1", None), LaunchContext::default());
        assert_eq!(
            parse_launch_info("u1", Some("not json".into())),
            LaunchContext::default()
        );
    }
}
