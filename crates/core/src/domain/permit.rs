use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::permit_type::PermitTypeId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermitId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermitNumber(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermitStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Active,
    Suspended,
    Closed,
    Expired,
    Cancelled,
}

impl PermitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Closed => "closed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "closed" => Some(Self::Closed),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal permits never transition again; history notes may still be
    /// appended for the record.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Closed | Self::Expired | Self::Cancelled)
    }

    /// States that occupy a site window and therefore participate in
    /// conflict detection. Drafts and terminal permits do not conflict.
    pub fn is_conflict_relevant(&self) -> bool {
        matches!(self, Self::Submitted | Self::Approved | Self::Active | Self::Suspended)
    }

    /// States the expiry sweeper may force into `expired`.
    pub fn is_expirable(&self) -> bool {
        self.is_conflict_relevant()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorRole {
    Employee,
    Manager,
    Admin,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "employee" | "worker" => Some(Self::Employee),
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn can_approve(&self) -> bool {
        matches!(self, Self::Manager | Self::Admin)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    pub role: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permit {
    pub id: PermitId,
    pub permit_number: PermitNumber,
    pub permit_type_id: PermitTypeId,
    pub site_id: SiteId,
    pub location: Option<String>,
    pub work_description: String,
    pub hazards: Option<String>,
    pub special_conditions: Option<String>,
    pub status: PermitStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub requested_by: UserId,
    pub approved_by: Option<UserId>,
    pub workers: Vec<Worker>,
    /// Completion flags keyed by control id. Phases come from the permit
    /// type configuration, not from this map.
    pub controls: BTreeMap<String, bool>,
    /// Optimistic concurrency token; bumped on every accepted write.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permit {
    /// Moment the permit stops being valid; drives the countdown UI and
    /// the expiry sweep.
    pub fn valid_until(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn control_completed(&self, control_id: &str) -> bool {
        self.controls.get(control_id).copied().unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryEntryId(pub String);

/// Append-only audit trail row. One entry per accepted transition; rejected
/// transition attempts append nothing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub id: HistoryEntryId,
    pub permit_id: PermitId,
    pub from_status: Option<PermitStatus>,
    pub to_status: PermitStatus,
    pub changed_by: UserId,
    pub changed_at: DateTime<Utc>,
    pub notes: Option<String>,
}
