//! Scheduling conflict detection across a shared site.
//!
//! Conflicts are a warning surfaced to the operator, never a hard block;
//! site managers may consciously accept an overlap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::permit::{Permit, PermitId, PermitNumber, PermitStatus};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Half-open interval overlap: `[s1,e1)` and `[s2,e2)` conflict iff
    /// `s1 < e2 && s2 < e1`. Touching endpoints do not conflict.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictWarning {
    pub permit_id: PermitId,
    pub permit_number: PermitNumber,
    pub status: PermitStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    /// Best-effort location narrowing: true when both permits name the same
    /// spot (exact or substring match). A site-level overlap is reported
    /// either way, since unnamed spots of one site may still be unsafe
    /// together.
    pub location_match: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Scans candidate permits (already scoped to one site by the caller)
    /// for window overlaps. Pure read; produces warnings only.
    pub fn find_conflicts(
        &self,
        candidates: &[Permit],
        window: &TimeWindow,
        location_hint: Option<&str>,
        exclude: Option<&PermitId>,
    ) -> Vec<ConflictWarning> {
        candidates
            .iter()
            .filter(|permit| Some(&permit.id) != exclude)
            .filter(|permit| permit.status.is_conflict_relevant())
            .filter(|permit| {
                window.overlaps(&TimeWindow::new(permit.start_time, permit.end_time))
            })
            .map(|permit| ConflictWarning {
                permit_id: permit.id.clone(),
                permit_number: permit.permit_number.clone(),
                status: permit.status.clone(),
                start_time: permit.start_time,
                end_time: permit.end_time,
                location: permit.location.clone(),
                location_match: locations_match(location_hint, permit.location.as_deref()),
            })
            .collect()
    }
}

fn locations_match(hint: Option<&str>, candidate: Option<&str>) -> bool {
    let (Some(hint), Some(candidate)) = (hint, candidate) else {
        return false;
    };
    let hint = hint.trim().to_ascii_lowercase();
    let candidate = candidate.trim().to_ascii_lowercase();
    if hint.is_empty() || candidate.is_empty() {
        return false;
    }
    hint == candidate || hint.contains(&candidate) || candidate.contains(&hint)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};

    use crate::domain::permit::{
        Permit, PermitId, PermitNumber, PermitStatus, SiteId, UserId, Worker,
    };
    use crate::domain::permit_type::PermitTypeId;

    use super::{ConflictDetector, TimeWindow};

    fn permit(id: &str, status: PermitStatus, start_hour: u32, end_hour: u32) -> Permit {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, start_hour, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 1, end_hour, 0, 0).unwrap();
        Permit {
            id: PermitId(id.to_string()),
            permit_number: PermitNumber(format!("PTW-2026-{id}")),
            permit_type_id: PermitTypeId("pt-hot-work".to_string()),
            site_id: SiteId("site-1".to_string()),
            location: Some("north stairwell".to_string()),
            work_description: "welding".to_string(),
            hazards: None,
            special_conditions: None,
            status,
            start_time: start,
            end_time: end,
            actual_start_time: None,
            actual_end_time: None,
            requested_by: UserId("u-req".to_string()),
            approved_by: None,
            workers: vec![Worker { name: "A. Mason".to_string(), role: None }],
            controls: BTreeMap::new(),
            version: 1,
            created_at: start,
            updated_at: start,
        }
    }

    fn window(start_hour: u32, end_hour: u32) -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2026, 3, 1, start_hour, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 1, end_hour, 0, 0).unwrap(),
        )
    }

    #[test]
    fn overlapping_windows_are_reported_both_ways() {
        let detector = ConflictDetector::new();
        let first = permit("a", PermitStatus::Active, 8, 16);
        let second = permit("b", PermitStatus::Submitted, 15, 20);

        let from_first = detector.find_conflicts(
            std::slice::from_ref(&second),
            &window(8, 16),
            None,
            Some(&first.id),
        );
        assert_eq!(from_first.len(), 1);
        assert_eq!(from_first[0].permit_id, second.id);

        let from_second = detector.find_conflicts(
            std::slice::from_ref(&first),
            &window(15, 20),
            None,
            Some(&second.id),
        );
        assert_eq!(from_second.len(), 1);
        assert_eq!(from_second[0].permit_id, first.id);
    }

    #[test]
    fn touching_endpoints_do_not_conflict() {
        let detector = ConflictDetector::new();
        let existing = permit("a", PermitStatus::Active, 8, 16);

        let warnings = detector.find_conflicts(&[existing], &window(16, 20), None, None);
        assert!(warnings.is_empty());
    }

    #[test]
    fn drafts_and_terminal_permits_never_conflict() {
        let detector = ConflictDetector::new();
        let candidates = vec![
            permit("a", PermitStatus::Draft, 8, 16),
            permit("b", PermitStatus::Closed, 8, 16),
            permit("c", PermitStatus::Expired, 8, 16),
            permit("d", PermitStatus::Cancelled, 8, 16),
            permit("e", PermitStatus::Rejected, 8, 16),
        ];

        let warnings = detector.find_conflicts(&candidates, &window(9, 12), None, None);
        assert!(warnings.is_empty());
    }

    #[test]
    fn excluded_permit_does_not_conflict_with_itself() {
        let detector = ConflictDetector::new();
        let existing = permit("a", PermitStatus::Submitted, 8, 16);
        let id = existing.id.clone();

        let warnings = detector.find_conflicts(&[existing], &window(9, 12), None, Some(&id));
        assert!(warnings.is_empty());
    }

    #[test]
    fn location_hint_narrows_without_dropping_site_level_hits() {
        let detector = ConflictDetector::new();
        let mut elsewhere = permit("b", PermitStatus::Active, 9, 12);
        elsewhere.location = Some("loading dock".to_string());
        let candidates = vec![permit("a", PermitStatus::Active, 8, 16), elsewhere];

        let warnings =
            detector.find_conflicts(&candidates, &window(9, 12), Some("North Stairwell"), None);
        assert_eq!(warnings.len(), 2, "site-level overlaps are always reported");
        assert!(warnings.iter().any(|w| w.location_match));
        assert!(warnings.iter().any(|w| !w.location_match));
    }

    #[test]
    fn substring_location_match_is_best_effort() {
        let detector = ConflictDetector::new();
        let existing = permit("a", PermitStatus::Active, 8, 16);

        let warnings =
            detector.find_conflicts(&[existing], &window(9, 12), Some("stairwell"), None);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].location_match);
    }
}
