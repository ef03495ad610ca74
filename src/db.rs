use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::factors::{join_factors, split_factors};
use crate::models::{
    AssessmentResult, FeatureVector, MonitoringRow, StoredAssessment, StressLabel, FEATURE_COUNT,
    FEATURE_NAMES,
};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Append-only store of completed assessments.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save(
        &self,
        features: &FeatureVector,
        result: &AssessmentResult,
    ) -> Result<i64, PersistenceError>;

    /// Monitoring projection in ascending id order.
    async fn list_all(&self) -> Result<Vec<MonitoringRow>, PersistenceError>;

    async fn count(&self) -> Result<i64, PersistenceError>;

    async fn records_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredAssessment>, PersistenceError>;
}

pub async fn init_db(pool: &PgPool) -> Result<(), PersistenceError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

static INSERT_SQL: LazyLock<String> = LazyLock::new(|| {
    let columns = FEATURE_NAMES.join(", ");
    let placeholders: Vec<String> = (1..=FEATURE_COUNT + 2).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO stress_assessment.prediction_records \
         ({columns}, predicted_label, predicted_factors) \
         VALUES ({}) RETURNING id",
        placeholders.join(", ")
    )
});

static SELECT_SINCE_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT id, {}, predicted_label, predicted_factors, created_at \
         FROM stress_assessment.prediction_records \
         WHERE created_at >= $1 \
         ORDER BY id",
        FEATURE_NAMES.join(", ")
    )
});

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn stored_from_row(row: &PgRow) -> Result<StoredAssessment, sqlx::Error> {
    let mut values = [0i64; FEATURE_COUNT];
    for (slot, name) in values.iter_mut().zip(FEATURE_NAMES) {
        *slot = row.try_get(name)?;
    }
    let label: String = row.try_get("predicted_label")?;
    let factors: String = row.try_get("predicted_factors")?;

    Ok(StoredAssessment {
        id: row.try_get("id")?,
        features: FeatureVector::from_values(values),
        label: StressLabel::parse(&label),
        factors: split_factors(&factors),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn save(
        &self,
        features: &FeatureVector,
        result: &AssessmentResult,
    ) -> Result<i64, PersistenceError> {
        let mut query = sqlx::query(INSERT_SQL.as_str());
        for value in features.values() {
            query = query.bind(value);
        }
        let id: i64 = query
            .bind(result.label.as_str())
            .bind(join_factors(&result.factors))
            .fetch_one(&self.pool)
            .await?
            .try_get("id")?;
        Ok(id)
    }

    async fn list_all(&self) -> Result<Vec<MonitoringRow>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT id, predicted_label, anxiety_level, sleep_quality, study_load
            FROM stress_assessment.prediction_records
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(MonitoringRow {
                id: row.try_get("id")?,
                predicted_label: row.try_get("predicted_label")?,
                anxiety_level: row.try_get("anxiety_level")?,
                sleep_quality: row.try_get("sleep_quality")?,
                study_load: row.try_get("study_load")?,
            });
        }
        Ok(records)
    }

    async fn count(&self) -> Result<i64, PersistenceError> {
        let count: i64 =
            sqlx::query("SELECT COUNT(*) AS total FROM stress_assessment.prediction_records")
                .fetch_one(&self.pool)
                .await?
                .try_get("total")?;
        Ok(count)
    }

    async fn records_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredAssessment>, PersistenceError> {
        let rows = sqlx::query(SELECT_SINCE_SQL.as_str())
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            records.push(stored_from_row(row)?);
        }
        Ok(records)
    }
}

/// Picks the store for the service. An unreachable database does not stop
/// startup: the pool connects lazily, and each failed save is logged by the
/// pipeline. Only an unusable URL falls back to memory.
pub async fn open_store(
    database_url: Option<&str>,
    acquire_timeout: Duration,
) -> Arc<dyn RecordStore> {
    let Some(url) = database_url else {
        tracing::warn!("DATABASE_URL not set, assessments are kept in memory only");
        return Arc::new(MemoryRecordStore::new());
    };

    let pool = match PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(acquire_timeout)
        .connect_lazy(url)
    {
        Ok(pool) => pool,
        Err(err) => {
            tracing::error!(error = %err, "invalid DATABASE_URL, assessments are kept in memory only");
            return Arc::new(MemoryRecordStore::new());
        }
    };

    match init_db(&pool).await {
        Ok(()) => tracing::info!("recording assessments in Postgres"),
        Err(err) => tracing::error!(
            error = %err,
            "database schema not ready, saves will fail until Postgres is reachable"
        ),
    }
    Arc::new(PgRecordStore::new(pool))
}

/// Process-local store used when no database is configured.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<StoredAssessment>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save(
        &self,
        features: &FeatureVector,
        result: &AssessmentResult,
    ) -> Result<i64, PersistenceError> {
        let mut records = self.records.lock().await;
        let id = records.last().map(|r| r.id + 1).unwrap_or(1);
        records.push(StoredAssessment {
            id,
            features: *features,
            label: result.label,
            factors: result.factors.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list_all(&self) -> Result<Vec<MonitoringRow>, PersistenceError> {
        let records = self.records.lock().await;
        Ok(records.iter().map(StoredAssessment::monitoring_row).collect())
    }

    async fn count(&self) -> Result<i64, PersistenceError> {
        Ok(self.records.lock().await.len() as i64)
    }

    async fn records_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredAssessment>, PersistenceError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| r.created_at >= since)
            .cloned()
            .collect())
    }
}
