//! Run summary and exit-code mapping.
//!
//! Hierarchy: one `StageSummary` per stage, rolled into a `RunReport` with
//! resolver sizes and the export manifest. `print()` renders comfy-table
//! tables (TTY), `log()` emits log lines (non-TTY).

use std::time::Duration;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use harvester_core::{EntryStatus, ExportManifest, StageTally, StopReason, fmt_num};

use crate::stage::{RunState, Stage, StageTarget};

/// How a stage ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    /// Not required by the stage target
    NotSelected,
    /// Required but never started because the run stopped
    Skipped(StopReason),
    /// An upstream stage produced nothing to work on
    NoInput,
    /// The stage itself panicked outside any task; later stages still ran
    Panicked(String),
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::NotSelected => f.write_str("not selected"),
            Self::Skipped(reason) => write!(f, "skipped ({reason})"),
            Self::NoInput => f.write_str("no input"),
            Self::Panicked(msg) => write!(f, "panicked ({msg})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageSummary {
    pub stage: Stage,
    pub status: StageStatus,
    pub tally: StageTally,
    /// Units of work never attempted (e.g. combinations past capacity)
    pub skipped: usize,
    pub elapsed: Duration,
}

impl StageSummary {
    pub fn new(stage: Stage, status: StageStatus) -> Self {
        Self {
            stage,
            status,
            tally: StageTally::default(),
            skipped: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn completed(stage: Stage, tally: StageTally, elapsed: Duration) -> Self {
        Self {
            tally,
            elapsed,
            ..Self::new(stage, StageStatus::Completed)
        }
    }

    pub fn log(&self) {
        match &self.status {
            StageStatus::Completed => log::info!(
                "{}: {}/{} ok, {} failed, {} skipped [{:.1}s]",
                self.stage,
                fmt_num(self.tally.succeeded),
                fmt_num(self.tally.attempted()),
                fmt_num(self.tally.failed),
                fmt_num(self.skipped + self.tally.not_started),
                self.elapsed.as_secs_f64()
            ),
            status @ StageStatus::Panicked(_) => log::error!("{}: {status}", self.stage),
            status => log::info!("{}: {status}", self.stage),
        }
    }
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub target: StageTarget,
    /// `Finalized` or `Aborted`
    pub state: RunState,
    /// Last state reached before finalizing
    pub reached: RunState,
    pub abort_reason: Option<String>,
    pub stopped: Option<StopReason>,
    pub stages: Vec<StageSummary>,
    pub primary_entries: usize,
    pub resolved_ids: usize,
    /// Resolved ids discovered from more than one primary entry
    pub shared_ids: usize,
    pub manifest: Option<ExportManifest>,
    pub manifest_path: Option<String>,
    pub manifest_error: Option<String>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, target: StageTarget) -> Self {
        Self {
            run_id: run_id.into(),
            target,
            state: RunState::Init,
            reached: RunState::Init,
            abort_reason: None,
            stopped: None,
            stages: Vec::new(),
            primary_entries: 0,
            resolved_ids: 0,
            shared_ids: 0,
            manifest: None,
            manifest_path: None,
            manifest_error: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Report for a run that failed before any stage
    pub fn aborted(run_id: impl Into<String>, target: StageTarget, reason: impl Into<String>) -> Self {
        Self {
            state: RunState::Aborted,
            abort_reason: Some(reason.into()),
            ..Self::new(run_id, target)
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// 0 ok (timeouts included), 1 aborted or nothing exported from a
    /// non-empty buffer, 130 interrupted
    pub fn exit_code(&self) -> u8 {
        if self.state == RunState::Aborted {
            return 1;
        }
        if self.stopped == Some(StopReason::Interrupted) {
            return 130;
        }
        match &self.manifest {
            Some(m) if !m.is_empty() && m.written() == 0 => 1,
            _ => 0,
        }
    }

    /// Format stage table as a string.
    pub fn format_stage_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new(format!("Run {}", self.run_id))
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Status").fg(Color::Cyan),
                Cell::new("OK").fg(Color::Cyan),
                Cell::new("Failed").fg(Color::Cyan),
                Cell::new("Skipped").fg(Color::Cyan),
                Cell::new("Time").fg(Color::Cyan),
            ]);

        for s in &self.stages {
            let failed = Cell::new(fmt_num(s.tally.failed));
            table.add_row(vec![
                Cell::new(s.stage.name()),
                Cell::new(s.status.to_string()),
                Cell::new(format!(
                    "{}/{}",
                    fmt_num(s.tally.succeeded),
                    fmt_num(s.tally.attempted())
                )),
                if s.tally.failed > 0 {
                    failed.fg(Color::Red)
                } else {
                    failed
                },
                Cell::new(fmt_num(s.skipped + s.tally.not_started)),
                Cell::new(format!("{:.1}s", s.elapsed.as_secs_f64())),
            ]);
        }

        table.add_row(vec![
            Cell::new("Primary entries"),
            Cell::new(fmt_num(self.primary_entries)),
        ]);
        table.add_row(vec![
            Cell::new("Resolved ids"),
            Cell::new(format!(
                "{} ({} shared)",
                fmt_num(self.resolved_ids),
                fmt_num(self.shared_ids)
            )),
        ]);
        let state = Cell::new(self.state.to_string());
        table.add_row(vec![
            Cell::new("Final state"),
            if self.state == RunState::Finalized {
                state.fg(Color::Green)
            } else {
                state.fg(Color::Red)
            },
        ]);

        format!("\n{table}")
    }

    /// Format export manifest as a string; `None` when nothing was flushed.
    pub fn format_manifest_table(&self) -> Option<String> {
        let manifest = self.manifest.as_ref().filter(|m| !m.is_empty())?;
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Artifact").fg(Color::Cyan),
                Cell::new("Records").fg(Color::Cyan),
                Cell::new("Result").fg(Color::Cyan),
            ]);

        for entry in &manifest.entries {
            let result = match &entry.status {
                EntryStatus::Written { bytes, .. } => {
                    Cell::new(format!("{} bytes", fmt_num(*bytes))).fg(Color::Green)
                }
                EntryStatus::Failed { error } => Cell::new(error).fg(Color::Red),
            };
            table.add_row(vec![
                Cell::new(&entry.path),
                Cell::new(fmt_num(entry.record_count)),
                result,
            ]);
        }

        Some(format!("\n{table}"))
    }

    /// Print tables to stderr (TTY mode).
    pub fn print(&self) {
        eprintln!("{}", self.format_stage_table());
        if let Some(manifest) = self.format_manifest_table() {
            eprintln!("{manifest}");
        }
        self.log_outcome();
    }

    /// Log summary lines (non-TTY mode).
    pub fn log(&self) {
        for s in &self.stages {
            s.log();
        }
        log::info!(
            "Identity maps: {} primary entries, {} resolved ids ({} shared)",
            fmt_num(self.primary_entries),
            fmt_num(self.resolved_ids),
            fmt_num(self.shared_ids)
        );
        if let Some(manifest) = &self.manifest {
            for entry in &manifest.entries {
                match &entry.status {
                    EntryStatus::Written { bytes, .. } => log::info!(
                        "  {}: {} records, {} bytes",
                        entry.path,
                        fmt_num(entry.record_count),
                        fmt_num(*bytes)
                    ),
                    EntryStatus::Failed { error } => {
                        log::error!("  {}: FAILED ({error})", entry.path)
                    }
                }
            }
        }
        self.log_outcome();
    }

    fn log_outcome(&self) {
        if let Some(reason) = &self.abort_reason {
            log::error!("Run {} aborted: {reason}", self.run_id);
            return;
        }
        if let Some(reason) = self.stopped {
            log::warn!("Run {} stopped early: {reason}", self.run_id);
        }
        if let Some(err) = &self.manifest_error {
            log::error!("Manifest not written: {err}");
        }
        let (written, records, failed) = self
            .manifest
            .as_ref()
            .map_or((0, 0, 0), |m| (m.written(), m.records_written(), m.failed()));
        log::info!(
            "Run {} {} in {:.1}s: {written} artifacts ({} records) written, {failed} failed",
            self.run_id,
            self.state,
            self.elapsed.as_secs_f64(),
            fmt_num(records)
        );
    }
}
