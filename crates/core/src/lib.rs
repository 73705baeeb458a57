pub mod audit;
pub mod config;
pub mod conflicts;
pub mod controls;
pub mod domain;
pub mod errors;
pub mod lifecycle;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use conflicts::{ConflictDetector, ConflictWarning, TimeWindow};
pub use controls::ControlChecklistResolver;
pub use domain::permit::{
    ActorRole, HistoryEntryId, Permit, PermitId, PermitNumber, PermitStatus, SiteId,
    StateHistoryEntry, UserId, Worker,
};
pub use domain::permit_type::{ControlPhase, PermitType, PermitTypeId, RequiredControl};
pub use errors::{DomainError, InterfaceError, ServiceError};
pub use lifecycle::{
    IncompleteControls, PermitEvent, PermitStateMachine, TransitionContext, TransitionError,
    TransitionOutcome,
};
