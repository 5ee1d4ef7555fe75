use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Process-wide sticky tragic-exception channel (§9: "Process-wide state...
/// Use an atomic once-cell"). Once set, the recorded message is observable
/// to every thread holding a handle to the same translog/engine instance and
/// can never be cleared or overwritten.
#[derive(Default)]
pub struct TragicChannel {
    cell: OnceCell<String>,
}

impl TragicChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(TragicChannel {
            cell: OnceCell::new(),
        })
    }

    /// Record a tragic exception. Idempotent: the first message wins: later
    /// calls are no-ops, matching the "once set it is sticky" requirement.
    pub fn set(&self, message: impl Into<String>) {
        let _ = self.cell.set(message.into());
    }

    pub fn get(&self) -> Option<&str> {
        self.cell.get().map(|s| s.as_str())
    }

    pub fn is_tragic(&self) -> bool {
        self.cell.get().is_some()
    }
}
