use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};

use permitly_core::domain::permit::{
    Permit, PermitId, PermitNumber, PermitStatus, SiteId, StateHistoryEntry, UserId, Worker,
};
use permitly_core::domain::permit_type::PermitTypeId;

use super::{PermitRepository, RepositoryError};
use crate::DbPool;

const PERMIT_COLUMNS: &str = "id,
    permit_number,
    permit_type_id,
    site_id,
    location,
    work_description,
    hazards,
    special_conditions,
    status,
    start_time,
    end_time,
    actual_start_time,
    actual_end_time,
    requested_by,
    approved_by,
    workers_json,
    controls_json,
    version,
    created_at,
    updated_at";

pub struct SqlPermitRepository {
    pool: DbPool,
}

impl SqlPermitRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PermitRepository for SqlPermitRepository {
    async fn find_by_id(&self, id: &PermitId) -> Result<Option<Permit>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PERMIT_COLUMNS} FROM permit WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(permit_from_row).transpose()
    }

    async fn insert(&self, permit: Permit) -> Result<(), RepositoryError> {
        let workers_json = encode_workers(&permit.workers)?;
        let controls_json = encode_controls(&permit.controls)?;

        sqlx::query(
            "INSERT INTO permit (
                id,
                permit_number,
                permit_type_id,
                site_id,
                location,
                work_description,
                hazards,
                special_conditions,
                status,
                start_time,
                end_time,
                actual_start_time,
                actual_end_time,
                requested_by,
                approved_by,
                workers_json,
                controls_json,
                version,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&permit.id.0)
        .bind(&permit.permit_number.0)
        .bind(&permit.permit_type_id.0)
        .bind(&permit.site_id.0)
        .bind(permit.location.as_deref())
        .bind(&permit.work_description)
        .bind(permit.hazards.as_deref())
        .bind(permit.special_conditions.as_deref())
        .bind(permit.status.as_str())
        .bind(permit.start_time.to_rfc3339())
        .bind(permit.end_time.to_rfc3339())
        .bind(permit.actual_start_time.map(|value| value.to_rfc3339()))
        .bind(permit.actual_end_time.map(|value| value.to_rfc3339()))
        .bind(&permit.requested_by.0)
        .bind(permit.approved_by.as_ref().map(|user| user.0.as_str()))
        .bind(workers_json)
        .bind(controls_json)
        .bind(i64::from(permit.version))
        .bind(permit.created_at.to_rfc3339())
        .bind(permit.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, permit: Permit, expected_version: u32) -> Result<(), RepositoryError> {
        let result = versioned_update(&permit, expected_version)?.execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::StaleVersion {
                permit_id: permit.id.0,
                expected_version,
            });
        }

        Ok(())
    }

    async fn commit_transition(
        &self,
        permit: Permit,
        expected_version: u32,
        entry: StateHistoryEntry,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = versioned_update(&permit, expected_version)?.execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Err(RepositoryError::StaleVersion {
                permit_id: permit.id.0,
                expected_version,
            });
        }

        sqlx::query(
            "INSERT INTO permit_state_history (
                id, permit_id, from_status, to_status, changed_by, changed_at, notes
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(&entry.permit_id.0)
        .bind(entry.from_status.as_ref().map(PermitStatus::as_str))
        .bind(entry.to_status.as_str())
        .bind(&entry.changed_by.0)
        .bind(entry.changed_at.to_rfc3339())
        .bind(entry.notes.as_deref())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_conflict_candidates(
        &self,
        site_id: &SiteId,
    ) -> Result<Vec<Permit>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PERMIT_COLUMNS} FROM permit
             WHERE site_id = ?
               AND status IN ('submitted', 'approved', 'active', 'suspended')
             ORDER BY start_time ASC",
        ))
        .bind(&site_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(permit_from_row).collect()
    }

    async fn list_expirable(&self, now: DateTime<Utc>) -> Result<Vec<Permit>, RepositoryError> {
        // RFC3339 UTC timestamps sort lexicographically, so text comparison
        // against the cutoff is sound.
        let rows = sqlx::query(&format!(
            "SELECT {PERMIT_COLUMNS} FROM permit
             WHERE status IN ('submitted', 'approved', 'active', 'suspended')
               AND end_time <= ?
             ORDER BY end_time ASC",
        ))
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(permit_from_row).collect()
    }

    async fn list_for_board(
        &self,
        site_id: Option<&SiteId>,
        permit_type_id: Option<&PermitTypeId>,
    ) -> Result<Vec<Permit>, RepositoryError> {
        // Filters are optional, so the WHERE clause falls back to an
        // always-true comparison when a filter is absent.
        let rows = sqlx::query(&format!(
            "SELECT {PERMIT_COLUMNS} FROM permit
             WHERE (?1 IS NULL OR site_id = ?1)
               AND (?2 IS NULL OR permit_type_id = ?2)
             ORDER BY start_time ASC, created_at ASC",
        ))
        .bind(site_id.map(|site| site.0.as_str()))
        .bind(permit_type_id.map(|permit_type| permit_type.0.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(permit_from_row).collect()
    }
}

fn versioned_update(
    permit: &Permit,
    expected_version: u32,
) -> Result<sqlx::query::Query<'_, Sqlite, SqliteArguments<'_>>, RepositoryError> {
    let workers_json = encode_workers(&permit.workers)?;
    let controls_json = encode_controls(&permit.controls)?;

    Ok(sqlx::query(
        "UPDATE permit SET
            permit_number = ?,
            permit_type_id = ?,
            site_id = ?,
            location = ?,
            work_description = ?,
            hazards = ?,
            special_conditions = ?,
            status = ?,
            start_time = ?,
            end_time = ?,
            actual_start_time = ?,
            actual_end_time = ?,
            requested_by = ?,
            approved_by = ?,
            workers_json = ?,
            controls_json = ?,
            version = ?,
            updated_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(&permit.permit_number.0)
    .bind(&permit.permit_type_id.0)
    .bind(&permit.site_id.0)
    .bind(permit.location.as_deref())
    .bind(&permit.work_description)
    .bind(permit.hazards.as_deref())
    .bind(permit.special_conditions.as_deref())
    .bind(permit.status.as_str())
    .bind(permit.start_time.to_rfc3339())
    .bind(permit.end_time.to_rfc3339())
    .bind(permit.actual_start_time.map(|value| value.to_rfc3339()))
    .bind(permit.actual_end_time.map(|value| value.to_rfc3339()))
    .bind(&permit.requested_by.0)
    .bind(permit.approved_by.as_ref().map(|user| user.0.as_str()))
    .bind(workers_json)
    .bind(controls_json)
    .bind(i64::from(permit.version))
    .bind(permit.updated_at.to_rfc3339())
    .bind(&permit.id.0)
    .bind(i64::from(expected_version)))
}

fn permit_from_row(row: SqliteRow) -> Result<Permit, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = PermitStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown permit status `{status_raw}`")))?;

    let workers_raw = row.try_get::<String, _>("workers_json")?;
    let workers: Vec<Worker> = serde_json::from_str(&workers_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid workers_json: {error}")))?;

    let controls_raw = row.try_get::<String, _>("controls_json")?;
    let controls: BTreeMap<String, bool> = serde_json::from_str(&controls_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid controls_json: {error}")))?;

    Ok(Permit {
        id: PermitId(row.try_get("id")?),
        permit_number: PermitNumber(row.try_get("permit_number")?),
        permit_type_id: PermitTypeId(row.try_get("permit_type_id")?),
        site_id: SiteId(row.try_get("site_id")?),
        location: row.try_get("location")?,
        work_description: row.try_get("work_description")?,
        hazards: row.try_get("hazards")?,
        special_conditions: row.try_get("special_conditions")?,
        status,
        start_time: parse_timestamp("start_time", row.try_get("start_time")?)?,
        end_time: parse_timestamp("end_time", row.try_get("end_time")?)?,
        actual_start_time: parse_optional_timestamp(
            "actual_start_time",
            row.try_get("actual_start_time")?,
        )?,
        actual_end_time: parse_optional_timestamp(
            "actual_end_time",
            row.try_get("actual_end_time")?,
        )?,
        requested_by: UserId(row.try_get("requested_by")?),
        approved_by: row.try_get::<Option<String>, _>("approved_by")?.map(UserId),
        workers,
        controls,
        version: parse_u32("version", row.try_get("version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn encode_workers(workers: &[Worker]) -> Result<String, RepositoryError> {
    serde_json::to_string(workers)
        .map_err(|error| RepositoryError::Decode(format!("could not encode workers: {error}")))
}

fn encode_controls(controls: &BTreeMap<String, bool>) -> Result<String, RepositoryError> {
    serde_json::to_string(controls)
        .map_err(|error| RepositoryError::Decode(format!("could not encode controls: {error}")))
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
