use tracing::info;
use underwrite_core::audit::{AuditEvent, AuditSink};

/// Forwards audit events to the process log so every tool decision is
/// traceable without a separate store.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        info!(
            event_name = "audit.event",
            audit_event_type = %event.event_type,
            audit_category = ?event.category,
            audit_outcome = ?event.outcome,
            correlation_id = %event.correlation_id,
            session_id = event.session_id.as_deref().unwrap_or("unknown"),
            thread_handle = event.thread_handle.as_deref().unwrap_or("unknown"),
            actor = %event.actor,
            metadata = %metadata,
            "audit event recorded"
        );
    }
}
