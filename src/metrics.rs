//! Execution metrics.
//!
//! After every execution the engine publishes, per phase: wall time, the
//! number of trusted-boundary crossings, and the total table size across
//! all nodes — plus the align-concat sort breakdown split between
//! accumulator sorts and child sorts. Metrics are reset at the start of
//! each execution and published when it returns.

use std::fmt::Write as _;
use std::time::Duration;

/// Per-phase figures.
#[derive(Debug, Clone, Default)]
pub struct PhaseMetrics {
    pub name: &'static str,
    pub wall: Duration,
    pub crossings: u64,
    /// Sum of table sizes over all nodes when the phase completed.
    pub total_rows: usize,
}

/// One side of the align-concat sort split.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortSide {
    pub wall: Duration,
    pub crossings: u64,
}

impl SortSide {
    pub fn add(&mut self, wall: Duration, crossings: u64) {
        self.wall += wall;
        self.crossings += crossings;
    }
}

/// Align-concat sort breakdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortMetrics {
    pub accumulator: SortSide,
    pub child: SortSide,
}

impl SortMetrics {
    pub fn total_wall(&self) -> Duration {
        self.accumulator.wall + self.child.wall
    }

    pub fn total_crossings(&self) -> u64 {
        self.accumulator.crossings + self.child.crossings
    }
}

/// Everything the engine publishes about one execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    pub phases: Vec<PhaseMetrics>,
    pub align_sorts: SortMetrics,
    pub total_wall: Duration,
    pub total_crossings: u64,
    pub result_rows: usize,
}

impl ExecutionMetrics {
    /// The stdout report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Result: {} rows", self.result_rows);

        let mut line = String::from("PHASE_TIMING:");
        for p in &self.phases {
            let _ = write!(line, " {}={:.6}", p.name, p.wall.as_secs_f64());
        }
        let _ = writeln!(out, "{line} Total={:.6}", self.total_wall.as_secs_f64());

        let mut line = String::from("PHASE_CROSSINGS:");
        for p in &self.phases {
            let _ = write!(line, " {}={}", p.name, p.crossings);
        }
        let _ = writeln!(out, "{line} Total={}", self.total_crossings);

        let mut line = String::from("PHASE_SIZES:");
        for p in &self.phases {
            let _ = write!(line, " {}={}", p.name, p.total_rows);
        }
        let _ = writeln!(out, "{line}");

        let _ = writeln!(
            out,
            "ALIGN_CONCAT_SORTS: Total={:.6}s ({} crossings), \
             Accumulator={:.6}s ({} crossings), Child={:.6}s ({} crossings)",
            self.align_sorts.total_wall().as_secs_f64(),
            self.align_sorts.total_crossings(),
            self.align_sorts.accumulator.wall.as_secs_f64(),
            self.align_sorts.accumulator.crossings,
            self.align_sorts.child.wall.as_secs_f64(),
            self.align_sorts.child.crossings,
        );
        out
    }
}
