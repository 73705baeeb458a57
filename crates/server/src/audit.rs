use permitly_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Audit sink that writes events to the log stream. Emission never fails,
/// so audit can never take a permit operation down with it.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let permit_id =
            event.permit_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown").to_string();
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = "audit.recorded",
                correlation_id = %event.correlation_id,
                permit_id = %permit_id,
                audit_event_type = %event.event_type,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                event_name = "audit.recorded",
                correlation_id = %event.correlation_id,
                permit_id = %permit_id,
                audit_event_type = %event.event_type,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}
