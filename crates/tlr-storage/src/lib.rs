//! Postgres access + HTTP fetch utilities for the tender reconciler.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use tlr_core::{Tender, TenderStatus};

pub const CRATE_NAME: &str = "tlr-storage";

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// A tender still missing its deadline, eligible for backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillCandidate {
    pub id: Uuid,
    pub title: String,
    pub url: String,
}

/// The two writes the backfill loop needs, behind a trait so the loop can be
/// exercised without a live database.
#[async_trait]
pub trait DeadlineStore: Send + Sync {
    async fn missing_deadline_batch(&self, limit: i64) -> Result<Vec<BackfillCandidate>>;
    async fn set_deadline(&self, id: Uuid, deadline: DateTime<Utc>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct TenderRepository {
    pool: PgPool,
}

impl TenderRepository {
    /// Build a repository over a lazily-connecting pool; nothing touches the
    /// network until the first query runs.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect_lazy(database_url).context("building postgres pool")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .context("running tenders migrations")
    }

    /// Full status distribution, folded client-side from a plain status read
    /// so the buckets match whatever strings are actually in the column.
    pub async fn status_histogram(&self) -> Result<BTreeMap<String, i64>> {
        let rows = sqlx::query("SELECT status FROM tenders")
            .fetch_all(&self.pool)
            .await
            .context("reading tender statuses")?;
        let statuses = rows
            .into_iter()
            .map(|row| row.try_get::<Option<String>, _>("status"))
            .collect::<Result<Vec<_>, _>>()
            .context("decoding tender statuses")?;
        Ok(fold_status_histogram(statuses))
    }

    /// Status distribution restricted to tenders whose deadline has passed.
    pub async fn expired_status_histogram(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<BTreeMap<String, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT status
              FROM tenders
             WHERE deadline_date IS NOT NULL
               AND deadline_date <= $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("reading expired tender statuses")?;
        let statuses = rows
            .into_iter()
            .map(|row| row.try_get::<Option<String>, _>("status"))
            .collect::<Result<Vec<_>, _>>()
            .context("decoding expired tender statuses")?;
        Ok(fold_status_histogram(statuses))
    }

    /// Expired tenders not yet marked closed, newest deadline first. Used by
    /// the audit report to show operators what the next run would touch.
    pub async fn expired_mismatches(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Tender>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, org_name, url, publish_date, deadline_date,
                   status, created_at, updated_at
              FROM tenders
             WHERE deadline_date IS NOT NULL
               AND deadline_date <= $1
               AND status <> 'closed'
             ORDER BY deadline_date DESC
             LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("reading expired status mismatches")?;
        rows.iter().map(row_to_tender).collect()
    }

    /// Close every open tender whose deadline is at or before `cutoff`, as a
    /// single bulk statement. Terminal states and null deadlines are excluded
    /// by the predicate, and re-running is a no-op, so overlapping scheduler
    /// triggers are harmless.
    pub async fn close_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            UPDATE tenders
               SET status = 'closed',
                   updated_at = now()
             WHERE status = 'open'
               AND deadline_date IS NOT NULL
               AND deadline_date <= $1
         RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("closing expired tenders")?;
        rows.into_iter()
            .map(|row| row.try_get::<Uuid, _>("id").context("decoding closed tender id"))
            .collect()
    }
}

#[async_trait]
impl DeadlineStore for TenderRepository {
    async fn missing_deadline_batch(&self, limit: i64) -> Result<Vec<BackfillCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, url
              FROM tenders
             WHERE deadline_date IS NULL
               AND url IS NOT NULL
             ORDER BY created_at
             LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("selecting backfill candidates")?;
        rows.into_iter()
            .map(|row| {
                Ok(BackfillCandidate {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    url: row.try_get("url")?,
                })
            })
            .collect()
    }

    async fn set_deadline(&self, id: Uuid, deadline: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tenders
               SET deadline_date = $2,
                   updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(deadline)
        .execute(&self.pool)
        .await
        .with_context(|| format!("writing deadline for tender {id}"))?;
        Ok(())
    }
}

fn row_to_tender(row: &PgRow) -> Result<Tender> {
    let status: String = row.try_get("status")?;
    let status = TenderStatus::parse(&status)
        .ok_or_else(|| anyhow!("unknown tender status {status:?} in database"))?;
    Ok(Tender {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        org_name: row.try_get("org_name")?,
        url: row.try_get("url")?,
        publish_date: row.try_get("publish_date")?,
        deadline_date: row.try_get("deadline_date")?,
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Fold raw status strings into ordered buckets; missing statuses land in a
/// `"null"` bucket rather than being dropped.
pub fn fold_status_histogram(
    statuses: impl IntoIterator<Item = Option<String>>,
) -> BTreeMap<String, i64> {
    let mut histogram = BTreeMap::new();
    for status in statuses {
        let bucket = status.unwrap_or_else(|| "null".to_string());
        *histogram.entry(bucket).or_insert(0) += 1;
    }
    histogram
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

/// One page fetch. Implemented over `reqwest` in production; the backfill
/// loop only sees this trait so failures can be simulated in tests.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

#[derive(Debug)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    /// Single attempt, no automatic retries: a failed page is reported and
    /// left for the next scheduled run.
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let span = info_span!("page_fetch", url);
        async {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }
            Ok(resp.text().await?)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets_and_orders_statuses() {
        let histogram = fold_status_histogram(vec![
            Some("open".to_string()),
            Some("closed".to_string()),
            Some("open".to_string()),
            None,
            Some("awarded".to_string()),
        ]);
        assert_eq!(histogram.get("open"), Some(&2));
        assert_eq!(histogram.get("closed"), Some(&1));
        assert_eq!(histogram.get("awarded"), Some(&1));
        assert_eq!(histogram.get("null"), Some(&1));
        assert_eq!(histogram.len(), 4);
    }

    #[test]
    fn histogram_of_nothing_is_empty() {
        assert!(fold_status_histogram(Vec::new()).is_empty());
    }

    #[test]
    fn http_status_errors_carry_the_final_url() {
        let err = FetchError::HttpStatus {
            status: 404,
            url: "https://example.test/tender/1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "http status 404 for https://example.test/tender/1"
        );
    }
}
