pub mod permit;
pub mod permit_type;

pub use permit::{
    ActorRole, HistoryEntryId, Permit, PermitId, PermitNumber, PermitStatus, SiteId,
    StateHistoryEntry, UserId, Worker,
};
pub use permit_type::{ControlPhase, PermitType, PermitTypeId, RequiredControl};
