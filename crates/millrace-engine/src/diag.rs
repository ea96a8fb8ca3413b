//! Run diagnostics.
//!
//! Runtime anomalies never abort a replication: they are logged and
//! collected here, and the list is returned to the caller next to the
//! statistics so hosts can decide what a warning is worth.

use millrace_types::SimTime;
use serde::{Deserialize, Serialize};

/// Category of a runtime warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A distribution descriptor with an unrecognized family tag was
    /// sampled; the sample defaulted to 1.
    UnknownDistribution,
    /// Warmup reaches or exceeds the horizon, so every accumulator is
    /// discarded and the run reports empty statistics.
    EmptyStatisticsWindow,
    /// A host-scheduled `Custom` event reached the dispatch loop.
    UnhandledCustomEvent,
}

/// One runtime warning, stamped with the simulated time it occurred at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub time: SimTime,
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Per-run warning list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunDiagnostics {
    entries: Vec<Diagnostic>,
}

impl RunDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a warning and mirrors it to the `tracing` subscriber.
    pub fn warn(&mut self, time: SimTime, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(time, ?kind, "{message}");
        self.entries.push(Diagnostic {
            time,
            kind,
            message,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_accumulate_in_order() {
        let mut diags = RunDiagnostics::new();
        assert!(diags.is_empty());
        diags.warn(1.0, DiagnosticKind::UnknownDistribution, "first");
        diags.warn(2.0, DiagnosticKind::UnhandledCustomEvent, "second");
        assert_eq!(diags.len(), 2);
        assert_eq!(diags.entries()[0].message, "first");
        assert_eq!(diags.entries()[1].time, 2.0);
    }
}
