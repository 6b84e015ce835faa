use std::sync::Mutex;

use rocket::serde::json::{json, serde_json::Map, Value};

/// Structured details attached to an audit event.
pub type AuditDetails = Map<String, Value>;

/// Receives one event per audited action. Storage is someone else's concern.
pub trait AuditHook: Send + Sync {
    fn log_audit(&self, action: &str, success: bool, details: AuditDetails);
}

/// Writes each event as a single JSON line to the `audit` log target, which
/// `log4rs.yaml` routes to its own appender.
#[derive(Debug, Default, Copy, Clone)]
pub struct LogAuditHook;

impl AuditHook for LogAuditHook {
    fn log_audit(&self, action: &str, success: bool, details: AuditDetails) {
        let event = json!({
            "action": action,
            "success": success,
            "details": details,
        });
        log::info!(target: "audit", "{event}");
    }
}

/// One captured audit event.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub action: String,
    pub success: bool,
    pub details: AuditDetails,
}

/// Keeps every event in memory, for inspection by tests and tooling.
#[derive(Debug, Default)]
pub struct RecordingAuditHook(Mutex<Vec<AuditEvent>>);

impl RecordingAuditHook {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Events with the given action name, in the order they were logged.
    pub fn events_for(&self, action: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.action == action)
            .collect()
    }
}

impl AuditHook for RecordingAuditHook {
    fn log_audit(&self, action: &str, success: bool, details: AuditDetails) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(AuditEvent {
                action: action.to_string(),
                success,
                details,
            });
    }
}

/// Build an [`AuditDetails`] map from `key => value` pairs.
#[macro_export]
macro_rules! audit_details {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut details = $crate::audit::AuditDetails::new();
        $(
            details.insert(($key).to_string(), ::rocket::serde::json::json!($value));
        )*
        details
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_hook_keeps_events_in_order() {
        let hook = RecordingAuditHook::default();
        hook.log_audit("vote", false, audit_details! { "election_id" => 1 });
        hook.log_audit("vote", true, audit_details! { "election_id" => 1, "ballots" => 2 });
        hook.log_audit("publish", true, AuditDetails::new());

        let votes = hook.events_for("vote");
        assert_eq!(votes.len(), 2);
        assert!(!votes[0].success);
        assert_eq!(votes[1].details["ballots"], json!(2));
    }
}
