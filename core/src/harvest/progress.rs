//! Per-phase counters with periodic progress logging.

use std::fmt;

use serde::Serialize;

use super::outcome::OutcomeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Records,
    Sets,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Records => f.write_str("records"),
            Self::Sets => f.write_str("sets"),
        }
    }
}

/// Counts for one phase of one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    /// Pending entries at phase start
    pub total: usize,
    pub harvested: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Units that panicked; their entries stay pending
    pub panicked: usize,
}

impl PhaseReport {
    pub fn completed(&self) -> usize {
        self.harvested + self.deleted + self.failed
    }
}

pub(crate) struct Progress {
    label: String,
    phase: Phase,
    every: usize,
    report: PhaseReport,
}

impl Progress {
    pub(crate) fn new(label: String, phase: Phase, total: usize, every: usize) -> Self {
        tracing::info!(namespace = %label, phase = %phase, pending = total, "phase started");
        Self {
            label,
            phase,
            every,
            report: PhaseReport {
                total,
                ..PhaseReport::default()
            },
        }
    }

    pub(crate) fn record(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Harvested => self.report.harvested += 1,
            OutcomeKind::Deleted => self.report.deleted += 1,
            OutcomeKind::Failed => self.report.failed += 1,
        }
        let done = self.report.completed();
        if self.every > 0 && done % self.every == 0 && done < self.report.total {
            tracing::info!(
                namespace = %self.label,
                phase = %self.phase,
                done,
                total = self.report.total,
                failed = self.report.failed,
                "progress"
            );
        }
    }

    pub(crate) fn panicked(&mut self) {
        self.report.panicked += 1;
    }

    pub(crate) fn finish(self) -> PhaseReport {
        let r = self.report;
        tracing::info!(
            namespace = %self.label,
            phase = %self.phase,
            total = r.total,
            harvested = r.harvested,
            deleted = r.deleted,
            failed = r.failed,
            panicked = r.panicked,
            "phase finished"
        );
        r
    }
}
