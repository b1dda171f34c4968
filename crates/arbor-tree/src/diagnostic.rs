//! The diagnostic node shown in place of a failed recompute.

use crate::widget::{NodeCx, RecomputeError, Widget};

/// Replaces a failing node's content with its formatted failure.
///
/// Siblings recompute normally; only the failing subtree is swapped for
/// this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    failure: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(failure: impl Into<String>) -> Self {
        Self {
            failure: failure.into(),
        }
    }

    #[must_use]
    pub fn failure(&self) -> &str {
        &self.failure
    }
}

impl Widget for Diagnostic {
    fn type_name(&self) -> &'static str {
        "Diagnostic"
    }

    fn recompute(&mut self, cx: &mut NodeCx<'_>) -> Result<(), RecomputeError> {
        cx.export("exception", serde_json::Value::String(self.failure.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_the_failure_text() {
        let diag = Diagnostic::new("boom: division by zero");
        assert_eq!(diag.failure(), "boom: division by zero");
        assert_eq!(diag.type_name(), "Diagnostic");
    }
}
