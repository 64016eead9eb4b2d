//! Activity log collaborator.

use crate::store::Store;

/// Records operator-visible lifecycle events (`started`, `stopped`,
/// `contacts_imported`, ...).
///
/// Logging never fails the caller: implementations swallow and trace their
/// own errors.
pub trait ActivityLog: Send + Sync {
    fn log(&self, event_type: &str, detail: &str);
}

impl ActivityLog for Store {
    fn log(&self, event_type: &str, detail: &str) {
        if let Err(e) = self.append_activity(event_type, detail) {
            tracing::warn!(event_type, "Failed to record activity: {}", e);
        }
    }
}
