use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use permitly_core::domain::permit::{
    HistoryEntryId, Permit, PermitId, SiteId, StateHistoryEntry,
};
use permitly_core::domain::permit_type::{PermitType, PermitTypeId};

use super::{
    HistoryRepository, PermitRepository, PermitTypeRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryPermitRepository {
    permits: RwLock<HashMap<String, Permit>>,
    history: InMemoryHistoryRepository,
}

impl InMemoryPermitRepository {
    /// Shares a history log with the read side, so rows written by
    /// `commit_transition` are visible through the same handle.
    pub fn with_history(history: InMemoryHistoryRepository) -> Self {
        Self { permits: RwLock::default(), history }
    }
}

#[async_trait::async_trait]
impl PermitRepository for InMemoryPermitRepository {
    async fn find_by_id(&self, id: &PermitId) -> Result<Option<Permit>, RepositoryError> {
        let permits = self.permits.read().await;
        Ok(permits.get(&id.0).cloned())
    }

    async fn insert(&self, permit: Permit) -> Result<(), RepositoryError> {
        let mut permits = self.permits.write().await;
        permits.insert(permit.id.0.clone(), permit);
        Ok(())
    }

    async fn update(&self, permit: Permit, expected_version: u32) -> Result<(), RepositoryError> {
        let mut permits = self.permits.write().await;
        match permits.get(&permit.id.0) {
            None => Err(RepositoryError::MissingPermit { permit_id: permit.id.0 }),
            Some(stored) if stored.version != expected_version => {
                Err(RepositoryError::StaleVersion {
                    permit_id: permit.id.0,
                    expected_version,
                })
            }
            Some(_) => {
                permits.insert(permit.id.0.clone(), permit);
                Ok(())
            }
        }
    }

    async fn commit_transition(
        &self,
        permit: Permit,
        expected_version: u32,
        entry: StateHistoryEntry,
    ) -> Result<(), RepositoryError> {
        // Permit write and history append happen under the same write lock,
        // mirroring the transactional SQL commit.
        let mut permits = self.permits.write().await;
        match permits.get(&permit.id.0) {
            None => Err(RepositoryError::MissingPermit { permit_id: permit.id.0 }),
            Some(stored) if stored.version != expected_version => {
                Err(RepositoryError::StaleVersion {
                    permit_id: permit.id.0,
                    expected_version,
                })
            }
            Some(_) => {
                permits.insert(permit.id.0.clone(), permit);
                self.history.entries.write().await.push(entry);
                Ok(())
            }
        }
    }

    async fn find_conflict_candidates(
        &self,
        site_id: &SiteId,
    ) -> Result<Vec<Permit>, RepositoryError> {
        let permits = self.permits.read().await;
        let mut candidates: Vec<Permit> = permits
            .values()
            .filter(|permit| permit.site_id == *site_id)
            .filter(|permit| permit.status.is_conflict_relevant())
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(candidates)
    }

    async fn list_expirable(&self, now: DateTime<Utc>) -> Result<Vec<Permit>, RepositoryError> {
        let permits = self.permits.read().await;
        let mut expirable: Vec<Permit> = permits
            .values()
            .filter(|permit| permit.status.is_expirable())
            .filter(|permit| permit.end_time <= now)
            .cloned()
            .collect();
        expirable.sort_by(|a, b| a.end_time.cmp(&b.end_time));
        Ok(expirable)
    }

    async fn list_for_board(
        &self,
        site_id: Option<&SiteId>,
        permit_type_id: Option<&PermitTypeId>,
    ) -> Result<Vec<Permit>, RepositoryError> {
        let permits = self.permits.read().await;
        let mut listed: Vec<Permit> = permits
            .values()
            .filter(|permit| site_id.map_or(true, |site| permit.site_id == *site))
            .filter(|permit| {
                permit_type_id.map_or(true, |permit_type| permit.permit_type_id == *permit_type)
            })
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(listed)
    }
}

#[derive(Default)]
pub struct InMemoryPermitTypeRepository {
    permit_types: RwLock<HashMap<String, PermitType>>,
}

#[async_trait::async_trait]
impl PermitTypeRepository for InMemoryPermitTypeRepository {
    async fn find_by_id(&self, id: &PermitTypeId) -> Result<Option<PermitType>, RepositoryError> {
        let permit_types = self.permit_types.read().await;
        Ok(permit_types.get(&id.0).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<PermitType>, RepositoryError> {
        let permit_types = self.permit_types.read().await;
        Ok(permit_types.values().find(|permit_type| permit_type.code == code).cloned())
    }

    async fn list(&self) -> Result<Vec<PermitType>, RepositoryError> {
        let permit_types = self.permit_types.read().await;
        let mut listed: Vec<PermitType> = permit_types.values().cloned().collect();
        listed.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(listed)
    }

    async fn save(&self, permit_type: PermitType) -> Result<(), RepositoryError> {
        let mut permit_types = self.permit_types.write().await;
        permit_types.insert(permit_type.id.0.clone(), permit_type);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryHistoryRepository {
    entries: Arc<RwLock<Vec<StateHistoryEntry>>>,
}

#[async_trait::async_trait]
impl HistoryRepository for InMemoryHistoryRepository {
    async fn append(&self, entry: StateHistoryEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.push(entry);
        Ok(())
    }

    async fn list_for_permit(
        &self,
        permit_id: &PermitId,
    ) -> Result<Vec<StateHistoryEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut listed: Vec<StateHistoryEntry> =
            entries.iter().filter(|entry| entry.permit_id == *permit_id).cloned().collect();
        listed.sort_by(|a, b| a.changed_at.cmp(&b.changed_at));
        Ok(listed)
    }

    async fn find_by_id(
        &self,
        id: &HistoryEntryId,
    ) -> Result<Option<StateHistoryEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|entry| entry.id == *id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};

    use permitly_core::domain::permit::{
        HistoryEntryId, Permit, PermitId, PermitNumber, PermitStatus, SiteId, StateHistoryEntry,
        UserId,
    };
    use permitly_core::domain::permit_type::PermitTypeId;

    use crate::repositories::{
        HistoryRepository, InMemoryHistoryRepository, InMemoryPermitRepository, PermitRepository,
        RepositoryError,
    };

    fn sample_permit(id: &str, status: PermitStatus) -> Permit {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        Permit {
            id: PermitId(id.to_string()),
            permit_number: PermitNumber(format!("PTW-2026-{id}")),
            permit_type_id: PermitTypeId("pt-hot-work".to_string()),
            site_id: SiteId("site-1".to_string()),
            location: None,
            work_description: "torch cutting".to_string(),
            hazards: None,
            special_conditions: None,
            status,
            start_time: start,
            end_time: Utc.with_ymd_and_hms(2026, 3, 1, 16, 0, 0).unwrap(),
            actual_start_time: None,
            actual_end_time: None,
            requested_by: UserId("u-req".to_string()),
            approved_by: None,
            workers: Vec::new(),
            controls: BTreeMap::new(),
            version: 1,
            created_at: start,
            updated_at: start,
        }
    }

    fn history_entry(id: &str, permit_id: &PermitId) -> StateHistoryEntry {
        StateHistoryEntry {
            id: HistoryEntryId(id.to_string()),
            permit_id: permit_id.clone(),
            from_status: Some(PermitStatus::Submitted),
            to_status: PermitStatus::Approved,
            changed_by: UserId("u-mgr".to_string()),
            changed_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn in_memory_permit_repo_round_trip() {
        let repo = InMemoryPermitRepository::default();
        let permit = sample_permit("p-1", PermitStatus::Draft);

        repo.insert(permit.clone()).await.expect("insert permit");
        let found = repo.find_by_id(&permit.id).await.expect("find permit");

        assert_eq!(found, Some(permit));
    }

    #[tokio::test]
    async fn in_memory_update_honors_version_check() {
        let repo = InMemoryPermitRepository::default();
        let permit = sample_permit("p-1", PermitStatus::Submitted);
        repo.insert(permit.clone()).await.expect("insert permit");

        let mut winner = permit.clone();
        winner.status = PermitStatus::Approved;
        winner.version = 2;
        repo.update(winner, 1).await.expect("update with matching version");

        let mut loser = permit.clone();
        loser.status = PermitStatus::Rejected;
        loser.version = 2;
        let error = repo.update(loser, 1).await.expect_err("stale update fails");
        assert!(matches!(error, RepositoryError::StaleVersion { .. }));
    }

    #[tokio::test]
    async fn update_of_a_missing_permit_is_not_reported_as_stale() {
        let repo = InMemoryPermitRepository::default();
        let ghost = sample_permit("p-ghost", PermitStatus::Draft);

        let error = repo.update(ghost, 1).await.expect_err("missing permit must fail");
        assert!(matches!(error, RepositoryError::MissingPermit { .. }));
    }

    #[tokio::test]
    async fn commit_transition_appends_history_only_when_the_version_check_passes() {
        let history = InMemoryHistoryRepository::default();
        let repo = InMemoryPermitRepository::with_history(history.clone());
        let permit = sample_permit("p-1", PermitStatus::Submitted);
        repo.insert(permit.clone()).await.expect("insert permit");

        let mut approved = permit.clone();
        approved.status = PermitStatus::Approved;
        approved.version = 2;

        let error = repo
            .commit_transition(approved.clone(), 9, history_entry("h-stale", &permit.id))
            .await
            .expect_err("stale commit fails");
        assert!(matches!(error, RepositoryError::StaleVersion { .. }));

        let stored = repo.find_by_id(&permit.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, PermitStatus::Submitted);
        assert!(history.list_for_permit(&permit.id).await.expect("list").is_empty());

        repo.commit_transition(approved, 1, history_entry("h-1", &permit.id))
            .await
            .expect("commit transition");

        let stored = repo.find_by_id(&permit.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, PermitStatus::Approved);
        let listed = history.list_for_permit(&permit.id).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].to_status, PermitStatus::Approved);
    }

    #[tokio::test]
    async fn expirable_listing_skips_terminal_permits() {
        let repo = InMemoryPermitRepository::default();
        repo.insert(sample_permit("p-active", PermitStatus::Active)).await.expect("insert");
        repo.insert(sample_permit("p-closed", PermitStatus::Closed)).await.expect("insert");

        let cutoff = Utc.with_ymd_and_hms(2026, 3, 1, 16, 0, 0).unwrap();
        let expirable = repo.list_expirable(cutoff).await.expect("list expirable");

        assert_eq!(expirable.len(), 1);
        assert_eq!(expirable[0].id.0, "p-active");
    }
}
