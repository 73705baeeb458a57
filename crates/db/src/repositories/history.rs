use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use permitly_core::domain::permit::{
    HistoryEntryId, PermitId, PermitStatus, StateHistoryEntry, UserId,
};

use super::{HistoryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlHistoryRepository {
    pool: DbPool,
}

impl SqlHistoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl HistoryRepository for SqlHistoryRepository {
    async fn append(&self, entry: StateHistoryEntry) -> Result<(), RepositoryError> {
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
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_permit(
        &self,
        permit_id: &PermitId,
    ) -> Result<Vec<StateHistoryEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, permit_id, from_status, to_status, changed_by, changed_at, notes
             FROM permit_state_history
             WHERE permit_id = ?
             ORDER BY changed_at ASC, id ASC",
        )
        .bind(&permit_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn find_by_id(
        &self,
        id: &HistoryEntryId,
    ) -> Result<Option<StateHistoryEntry>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, permit_id, from_status, to_status, changed_by, changed_at, notes
             FROM permit_state_history
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }
}

fn entry_from_row(row: SqliteRow) -> Result<StateHistoryEntry, RepositoryError> {
    let from_status = row
        .try_get::<Option<String>, _>("from_status")?
        .map(|value| {
            PermitStatus::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown from_status `{value}`")))
        })
        .transpose()?;

    let to_status_raw = row.try_get::<String, _>("to_status")?;
    let to_status = PermitStatus::parse(&to_status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown to_status `{to_status_raw}`")))?;

    Ok(StateHistoryEntry {
        id: HistoryEntryId(row.try_get("id")?),
        permit_id: PermitId(row.try_get("permit_id")?),
        from_status,
        to_status,
        changed_by: UserId(row.try_get("changed_by")?),
        changed_at: parse_timestamp("changed_at", row.try_get("changed_at")?)?,
        notes: row.try_get("notes")?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
