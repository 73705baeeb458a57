//! Built-in permit type catalog.
//!
//! Sites start from a standard set of high-risk work categories; each carries
//! its regulatory checklist. Seeding is an upsert, so re-running it refreshes
//! checklist definitions without touching issued permits.

use permitly_core::domain::permit_type::{ControlPhase, PermitType, PermitTypeId, RequiredControl};

use crate::connection::DbPool;
use crate::repositories::{PermitTypeRepository, RepositoryError, SqlPermitTypeRepository};

pub fn builtin_permit_types() -> Vec<PermitType> {
    vec![
        PermitType {
            id: PermitTypeId("pt-hot-work".to_string()),
            code: "hot_work".to_string(),
            name: "Hot Work".to_string(),
            icon: Some("flame".to_string()),
            default_validity_hours: 8,
            requires_approval: true,
            controls: vec![
                control("fire-watch", "Fire watch posted", ControlPhase::PreWork, true),
                control(
                    "combustibles-removed",
                    "Combustibles removed or shielded within 11m",
                    ControlPhase::PreWork,
                    true,
                ),
                control("extinguisher", "Fire extinguisher at work point", ControlPhase::PreWork, true),
                control(
                    "hot-surface-check",
                    "Monitor area for smouldering during breaks",
                    ControlPhase::DuringWork,
                    false,
                ),
                control(
                    "final-fire-check",
                    "Final fire check 60 minutes after last spark",
                    ControlPhase::CloseOut,
                    true,
                ),
            ],
        },
        PermitType {
            id: PermitTypeId("pt-confined-space".to_string()),
            code: "confined_space".to_string(),
            name: "Confined Space Entry".to_string(),
            icon: Some("door-closed".to_string()),
            default_validity_hours: 4,
            requires_approval: true,
            controls: vec![
                control("gas-test", "Atmosphere tested and within limits", ControlPhase::PreWork, true),
                control("standby-person", "Standby person assigned at entry", ControlPhase::PreWork, true),
                control("rescue-plan", "Rescue plan communicated", ControlPhase::PreWork, true),
                control(
                    "continuous-monitoring",
                    "Continuous atmosphere monitoring in place",
                    ControlPhase::DuringWork,
                    false,
                ),
                control("headcount", "All entrants accounted for", ControlPhase::CloseOut, true),
            ],
        },
        PermitType {
            id: PermitTypeId("pt-work-at-height".to_string()),
            code: "work_at_height".to_string(),
            name: "Work at Height".to_string(),
            icon: Some("ladder".to_string()),
            default_validity_hours: 8,
            requires_approval: true,
            controls: vec![
                control("harness-inspection", "Harnesses inspected and tagged", ControlPhase::PreWork, true),
                control("anchor-points", "Anchor points verified", ControlPhase::PreWork, true),
                control("exclusion-zone", "Drop zone barricaded below", ControlPhase::PreWork, false),
                control("equipment-retrieved", "Tools and equipment retrieved", ControlPhase::CloseOut, true),
            ],
        },
        PermitType {
            id: PermitTypeId("pt-electrical".to_string()),
            code: "electrical".to_string(),
            name: "Electrical Work".to_string(),
            icon: Some("zap".to_string()),
            default_validity_hours: 8,
            requires_approval: true,
            controls: vec![
                control("lockout-tagout", "Lockout/tagout applied and verified", ControlPhase::PreWork, true),
                control("zero-energy", "Zero energy state confirmed", ControlPhase::PreWork, true),
                control("locks-removed", "Locks and tags removed, circuits restored", ControlPhase::CloseOut, true),
            ],
        },
    ]
}

pub async fn seed_permit_type_catalog(pool: &DbPool) -> Result<usize, RepositoryError> {
    let repo = SqlPermitTypeRepository::new(pool.clone());
    let catalog = builtin_permit_types();
    let count = catalog.len();

    for permit_type in catalog {
        repo.save(permit_type).await?;
    }

    Ok(count)
}

fn control(id: &str, description: &str, phase: ControlPhase, required: bool) -> RequiredControl {
    RequiredControl {
        id: id.to_string(),
        description: description.to_string(),
        phase,
        required,
    }
}
