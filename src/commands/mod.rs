pub mod key;
pub mod merge;
pub mod run;
pub mod status;
pub mod watermark;

use serde::Serialize;

use crate::archive::reconcile::ReconcileOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn render_text(&self) -> String {
        let mut out = format!(
            "{}: {}\n",
            self.command,
            if self.ok { "ok" } else { "failed" }
        );
        for detail in &self.details {
            out.push_str(&format!("  {detail}\n"));
        }
        for issue in &self.issues {
            out.push_str(&format!("  issue: {issue}\n"));
        }
        out
    }
}

/// Shared reporting of a reconcile pass; residue and halted merges are issues.
pub fn report_reconcile(report: &mut CommandReport, outcome: &ReconcileOutcome) {
    report.detail(format!("reconcile.consumed={}", outcome.consumed));
    report.detail(format!("reconcile.rosters_merged={}", outcome.rosters_merged));
    report.detail(format!(
        "reconcile.records_archived={}",
        outcome.records_archived
    ));
    report.detail(format!("reconcile.files_merged={}", outcome.files_merged));
    report.detail(format!("reconcile.files_moved={}", outcome.files_moved));
    report.detail(format!("reconcile.channels_added={}", outcome.channels_added));

    for path in &outcome.residue {
        report.issue(format!("snapshot entry not absorbed: {}", path.display()));
    }
    if outcome.partial_merges > 0 {
        report.issue(format!(
            "{} day file(s) kept in the snapshot: records without a usable ts",
            outcome.partial_merges
        ));
    }
}
