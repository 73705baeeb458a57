use sqlx::{sqlite::SqliteRow, Row};

use permitly_core::domain::permit_type::{ControlPhase, PermitType, PermitTypeId, RequiredControl};

use super::{PermitTypeRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPermitTypeRepository {
    pool: DbPool,
}

impl SqlPermitTypeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_controls(
        &self,
        permit_type_id: &str,
    ) -> Result<Vec<RequiredControl>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT control_id, description, phase, required
             FROM permit_type_control
             WHERE permit_type_id = ?
             ORDER BY position ASC, control_id ASC",
        )
        .bind(permit_type_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(control_from_row).collect()
    }

    async fn assemble(&self, row: SqliteRow) -> Result<PermitType, RepositoryError> {
        let id = row.try_get::<String, _>("id")?;
        let controls = self.load_controls(&id).await?;

        Ok(PermitType {
            id: PermitTypeId(id),
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            icon: row.try_get("icon")?,
            default_validity_hours: parse_u32(
                "default_validity_hours",
                row.try_get("default_validity_hours")?,
            )?,
            requires_approval: row.try_get::<i64, _>("requires_approval")? != 0,
            controls,
        })
    }
}

#[async_trait::async_trait]
impl PermitTypeRepository for SqlPermitTypeRepository {
    async fn find_by_id(&self, id: &PermitTypeId) -> Result<Option<PermitType>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, code, name, icon, default_validity_hours, requires_approval
             FROM permit_type
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.assemble(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<PermitType>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, code, name, icon, default_validity_hours, requires_approval
             FROM permit_type
             WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.assemble(row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<PermitType>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, code, name, icon, default_validity_hours, requires_approval
             FROM permit_type
             ORDER BY code ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut permit_types = Vec::with_capacity(rows.len());
        for row in rows {
            permit_types.push(self.assemble(row).await?);
        }
        Ok(permit_types)
    }

    async fn save(&self, permit_type: PermitType) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO permit_type (id, code, name, icon, default_validity_hours, requires_approval)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                code = excluded.code,
                name = excluded.name,
                icon = excluded.icon,
                default_validity_hours = excluded.default_validity_hours,
                requires_approval = excluded.requires_approval",
        )
        .bind(&permit_type.id.0)
        .bind(&permit_type.code)
        .bind(&permit_type.name)
        .bind(permit_type.icon.as_deref())
        .bind(i64::from(permit_type.default_validity_hours))
        .bind(i64::from(permit_type.requires_approval))
        .execute(&mut *tx)
        .await?;

        // Checklist rows are replaced wholesale so removed controls do not
        // linger.
        sqlx::query("DELETE FROM permit_type_control WHERE permit_type_id = ?")
            .bind(&permit_type.id.0)
            .execute(&mut *tx)
            .await?;

        for (position, control) in permit_type.controls.iter().enumerate() {
            sqlx::query(
                "INSERT INTO permit_type_control (
                    permit_type_id, control_id, description, phase, required, position
                 ) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&permit_type.id.0)
            .bind(&control.id)
            .bind(&control.description)
            .bind(control.phase.as_str())
            .bind(i64::from(control.required))
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn control_from_row(row: SqliteRow) -> Result<RequiredControl, RepositoryError> {
    let phase_raw = row.try_get::<String, _>("phase")?;
    let phase = ControlPhase::parse(&phase_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown control phase `{phase_raw}`")))?;

    Ok(RequiredControl {
        id: row.try_get("control_id")?,
        description: row.try_get("description")?,
        phase,
        required: row.try_get::<i64, _>("required")? != 0,
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}
