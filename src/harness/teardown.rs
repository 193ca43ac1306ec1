//! Teardown bookkeeping

use std::fmt;

use tracing::{info, warn};

/// Failure stopping one service; recorded, never raised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownError {
    pub service: &'static str,
    pub message: String,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service, self.message)
    }
}

/// What a teardown stopped and what failed along the way
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    stopped: Vec<&'static str>,
    errors: Vec<TeardownError>,
}

impl TeardownReport {
    /// Services stopped, in teardown order
    pub fn stopped(&self) -> &[&'static str] {
        &self.stopped
    }

    pub fn errors(&self) -> &[TeardownError] {
        &self.errors
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record the result of stopping `service`
    pub(crate) fn record<E: fmt::Display>(&mut self, service: &'static str, result: Result<(), E>) {
        self.stopped.push(service);
        if let Err(e) = result {
            warn!(service, error = %e, "Teardown step failed");
            self.errors.push(TeardownError { service, message: e.to_string() });
        }
    }

    pub(crate) fn log_summary(&self) {
        if self.is_clean() {
            info!(stopped = ?self.stopped, "STS flow torn down");
        } else {
            warn!(
                stopped = ?self.stopped,
                failures = self.errors.len(),
                "STS flow torn down with failures"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_record_keeps_order_and_failures() {
        let mut report = TeardownReport::default();
        report.record::<String>("proxy", Ok(()));
        report.record("auth-backend", Err("exited early"));
        report.record::<String>("discovery", Ok(()));

        assert_eq!(report.stopped(), ["proxy", "auth-backend", "discovery"]);
        assert!(!report.is_clean());
        assert_eq!(report.errors()[0].to_string(), "auth-backend: exited early");
    }

    #[test]
    #[traced_test]
    fn test_failures_are_logged() {
        let mut report = TeardownReport::default();
        report.record("sts", Err("did not stop within 2s"));
        report.log_summary();

        assert!(logs_contain("Teardown step failed"));
        assert!(logs_contain("did not stop within 2s"));
        assert!(logs_contain("STS flow torn down with failures"));
    }

    #[test]
    fn test_empty_report_is_clean() {
        let report = TeardownReport::default();
        assert!(report.is_clean());
        assert!(report.stopped().is_empty());
    }
}
