use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use permitly_core::domain::permit::{
    HistoryEntryId, Permit, PermitId, SiteId, StateHistoryEntry,
};
use permitly_core::domain::permit_type::{PermitType, PermitTypeId};

pub mod history;
pub mod memory;
pub mod permit;
pub mod permit_type;

pub use history::SqlHistoryRepository;
pub use memory::{InMemoryHistoryRepository, InMemoryPermitRepository, InMemoryPermitTypeRepository};
pub use permit::SqlPermitRepository;
pub use permit_type::SqlPermitTypeRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("permit `{permit_id}` version check failed (expected {expected_version})")]
    StaleVersion { permit_id: String, expected_version: u32 },
    #[error("permit `{permit_id}` does not exist")]
    MissingPermit { permit_id: String },
}

#[async_trait]
pub trait PermitRepository: Send + Sync {
    async fn find_by_id(&self, id: &PermitId) -> Result<Option<Permit>, RepositoryError>;

    async fn insert(&self, permit: Permit) -> Result<(), RepositoryError>;

    /// Persists the permit only if the stored row still carries
    /// `expected_version`. The caller bumps `permit.version` before calling.
    async fn update(&self, permit: Permit, expected_version: u32) -> Result<(), RepositoryError>;

    /// Version-checked update plus the matching history row, committed
    /// atomically. Either both land or neither does.
    async fn commit_transition(
        &self,
        permit: Permit,
        expected_version: u32,
        entry: StateHistoryEntry,
    ) -> Result<(), RepositoryError>;

    /// Permits on the site whose status can participate in a scheduling
    /// conflict (submitted, approved, active, suspended).
    async fn find_conflict_candidates(
        &self,
        site_id: &SiteId,
    ) -> Result<Vec<Permit>, RepositoryError>;

    /// Permits in an expirable status whose window has already ended.
    async fn list_expirable(&self, now: DateTime<Utc>) -> Result<Vec<Permit>, RepositoryError>;

    async fn list_for_board(
        &self,
        site_id: Option<&SiteId>,
        permit_type_id: Option<&PermitTypeId>,
    ) -> Result<Vec<Permit>, RepositoryError>;
}

#[async_trait]
pub trait PermitTypeRepository: Send + Sync {
    async fn find_by_id(&self, id: &PermitTypeId) -> Result<Option<PermitType>, RepositoryError>;
    async fn find_by_code(&self, code: &str) -> Result<Option<PermitType>, RepositoryError>;
    async fn list(&self) -> Result<Vec<PermitType>, RepositoryError>;
    async fn save(&self, permit_type: PermitType) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn append(&self, entry: StateHistoryEntry) -> Result<(), RepositoryError>;

    async fn list_for_permit(
        &self,
        permit_id: &PermitId,
    ) -> Result<Vec<StateHistoryEntry>, RepositoryError>;

    async fn find_by_id(
        &self,
        id: &HistoryEntryId,
    ) -> Result<Option<StateHistoryEntry>, RepositoryError>;
}
