//! Begin/complete logging around one archive operation
//!
//! `NAME_BEGIN` is logged when the scope opens. Closing it logs
//! `NAME_COMPLETE` with the elapsed time or `NAME_FAILED` with a reason.
//! A scope dropped while still open (early return, panic) logs
//! `NAME_INCOMPLETE`.

use std::time::Instant;

use super::logger::{Logger, Severity};

/// ```ignore
/// let scope = ObservationScope::with_fields("VERIFY", &[("label", "KQ7MZA")]);
/// scope.complete_with_fields(&[("status", "ok")]);
/// ```
pub struct ObservationScope<'a> {
    name: &'a str,
    context: Vec<(&'a str, String)>,
    started: Instant,
    open: bool,
}

impl<'a> ObservationScope<'a> {
    pub fn new(name: &'a str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Opens a scope whose fields are repeated on the closing line
    pub fn with_fields(name: &'a str, fields: &[(&'a str, &str)]) -> Self {
        Logger::info(&format!("{}_BEGIN", name), fields);
        Self {
            name,
            context: fields.iter().map(|(k, v)| (*k, (*v).to_string())).collect(),
            started: Instant::now(),
            open: true,
        }
    }

    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    pub fn complete_with_fields(mut self, extra: &[(&str, &str)]) {
        self.open = false;
        let elapsed_ms = self.started.elapsed().as_millis().to_string();
        let mut fields: Vec<(&str, &str)> =
            self.context.iter().map(|(k, v)| (*k, v.as_str())).collect();
        fields.extend_from_slice(extra);
        fields.push(("elapsed_ms", elapsed_ms.as_str()));
        Logger::log(Severity::Info, &self.event("COMPLETE"), &fields);
    }

    /// Closes the scope as failed; `fatal` means the whole command stops
    pub fn fail(mut self, reason: &str, fatal: bool) {
        self.open = false;
        let severity = if fatal { Severity::Fatal } else { Severity::Error };
        let mut fields: Vec<(&str, &str)> =
            self.context.iter().map(|(k, v)| (*k, v.as_str())).collect();
        fields.push(("reason", reason));
        Logger::log(severity, &self.event("FAILED"), &fields);
    }

    pub fn is_completed(&self) -> bool {
        !self.open
    }

    fn event(&self, outcome: &str) -> String {
        format!("{}_{}", self.name, outcome)
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if self.open {
            Logger::log(Severity::Warn, &self.event("INCOMPLETE"), &[("reason", "not closed")]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_scope_is_open() {
        let scope = ObservationScope::new("RECONCILE");
        assert!(!scope.is_completed());
        scope.complete();
    }

    #[test]
    fn test_failed_scope_keeps_context() {
        let scope = ObservationScope::with_fields("BUILD", &[("destination", "/media/disc")]);
        scope.fail("destination unwritable", true);
    }

    #[test]
    fn test_dropped_scope_reports_incomplete() {
        let scope = ObservationScope::with_fields("RESTORE", &[("target", "out")]);
        drop(scope);
    }
}
