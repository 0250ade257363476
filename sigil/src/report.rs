//! Error accounting. Warnings never fail anything; counted errors fail the file (or the whole
//! invocation, for errors raised before any file is touched) without stopping the run.

use std::fmt::Display;

use tracing::error;

/// Counts the errors reported against one unit of work. The count saturates at 255, so a
/// pathological file cannot wrap back around to "no errors".
#[derive(Debug, Default)]
pub struct Reporter {
    errors: u8,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits `msg` on the diagnostic stream and bumps the error count.
    pub fn error(&mut self, msg: impl Display) {
        error!("{msg}");
        self.errors = self.errors.saturating_add(1);
    }

    pub fn errors(&self) -> u8 {
        self.errors
    }

    pub fn has_errors(&self) -> bool {
        self.errors != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_saturate() {
        let mut reporter = Reporter::new();
        assert!(!reporter.has_errors());
        for _ in 0..300 {
            reporter.error("boom");
        }
        assert_eq!(reporter.errors(), 255);
    }
}
