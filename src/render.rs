//! Export formats for a [`Report`]: a structured document (JSON), a
//! markdown write-up and a terse console summary.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::report::{ActionStatus, Report};

const CONSOLE_WIDTH: usize = 60;
const CONSOLE_MAX_ERRORS: usize = 5;
const CONSOLE_ERROR_CHARS: usize = 80;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionDocument {
    pub action_type: String,
    pub call_id: String,
    pub status: ActionStatus,
    pub timestamp: String,
    pub details: Map<String, Value>,
    pub error: Option<String>,
    pub duration_ms: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_seconds: Option<f64>,
    pub total_actions: usize,
    pub successful_actions: usize,
    pub failed_actions: usize,
    pub skipped_actions: usize,
    /// Percentage rounded to one decimal place.
    pub success_rate: f64,
    pub instance_id: Option<String>,
    pub final_status: String,
    pub error_summary: Vec<String>,
    pub actions: Vec<ActionDocument>,
}

impl From<&Report> for ReportDocument {
    fn from(r: &Report) -> Self {
        Self {
            start_time: r.start_time.to_rfc3339(),
            end_time: r.end_time.map(|t| t.to_rfc3339()),
            duration_seconds: r.duration_seconds(),
            total_actions: r.total_actions(),
            successful_actions: r.successful_actions(),
            failed_actions: r.failed_actions(),
            skipped_actions: r.skipped_actions(),
            success_rate: (r.success_rate() * 10.0).round() / 10.0,
            instance_id: r.instance_id.clone(),
            final_status: r.final_status.clone(),
            error_summary: r.error_summary().to_vec(),
            actions: r
                .actions()
                .iter()
                .map(|a| ActionDocument {
                    action_type: a.action_type.clone(),
                    call_id: a.call_id.clone(),
                    status: a.status,
                    timestamp: a.timestamp.to_rfc3339(),
                    details: a.details.clone(),
                    error: a.error.clone(),
                    duration_ms: a.duration_ms,
                })
                .collect(),
        }
    }
}

pub fn to_document(report: &Report) -> ReportDocument {
    ReportDocument::from(report)
}

pub fn to_json(report: &Report) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&to_document(report))
}

fn pct(part: usize, total: usize) -> f64 {
    part as f64 / total.max(1) as f64 * 100.0
}

#[derive(Default)]
struct TypeCounts {
    success: usize,
    failed: usize,
    skipped: usize,
}

impl TypeCounts {
    fn bump(&mut self, status: ActionStatus) {
        match status {
            ActionStatus::Success => self.success += 1,
            ActionStatus::Failed => self.failed += 1,
            ActionStatus::Skipped => self.skipped += 1,
        }
    }

    fn total(&self) -> usize {
        self.success + self.failed + self.skipped
    }
}

fn status_marker(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::Success => "✅",
        ActionStatus::Failed => "❌",
        ActionStatus::Skipped => "⏭️",
    }
}

fn duration_text(r: &Report) -> String {
    r.duration_seconds().map(|d| format!("{d:.1}s")).unwrap_or_else(|| "N/A".into())
}

pub fn to_markdown(r: &Report) -> String {
    let ts = "%Y-%m-%d %H:%M:%S";
    let total = r.total_actions();
    let end = r.end_time.map(|t| t.format(ts).to_string()).unwrap_or_else(|| "N/A".into());

    let mut lines = vec![
        "# CUA Task Analysis Report".to_string(),
        String::new(),
        format!("**Generated:** {}", Local::now().format(ts)),
        String::new(),
        "## Summary".into(),
        String::new(),
        "| Metric | Value |".into(),
        "|--------|-------|".into(),
        format!("| Start Time | {} |", r.start_time.format(ts)),
        format!("| End Time | {end} |"),
        format!("| Duration | {} |", duration_text(r)),
        format!("| Instance ID | `{}` |", r.instance_id.as_deref().unwrap_or("N/A")),
        format!("| Final Status | **{}** |", r.final_status.to_uppercase()),
        String::new(),
        "## Action Statistics".into(),
        String::new(),
        "| Status | Count | Percentage |".into(),
        "|--------|-------|------------|".into(),
        format!("| Total | {total} | 100% |"),
        format!("| Successful | {} | {:.1}% |", r.successful_actions(), r.success_rate()),
        format!(
            "| Failed | {} | {:.1}% |",
            r.failed_actions(),
            pct(r.failed_actions(), total)
        ),
        format!(
            "| Skipped | {} | {:.1}% |",
            r.skipped_actions(),
            pct(r.skipped_actions(), total)
        ),
        String::new(),
    ];

    let mut by_type: BTreeMap<&str, TypeCounts> = BTreeMap::new();
    for a in r.actions() {
        by_type.entry(a.action_type.as_str()).or_default().bump(a.status);
    }
    if !by_type.is_empty() {
        lines.push("## Actions by Type".into());
        lines.push(String::new());
        lines.push("| Action Type | Success | Failed | Skipped | Total |".into());
        lines.push("|-------------|---------|--------|---------|-------|".into());
        for (kind, c) in &by_type {
            lines.push(format!(
                "| {kind} | {} | {} | {} | {} |",
                c.success,
                c.failed,
                c.skipped,
                c.total()
            ));
        }
        lines.push(String::new());
    }

    lines.push("## Action Timeline".into());
    lines.push(String::new());
    for (i, a) in r.actions().iter().enumerate() {
        lines.push(format!("### {}. {} {}", i + 1, status_marker(a.status), a.action_type));
        lines.push(String::new());
        lines.push(format!("- **Call ID:** `{}`", a.call_id));
        lines.push(format!("- **Status:** {}", a.status.as_str()));
        lines.push(format!("- **Time:** {}", a.timestamp.format("%H:%M:%S")));
        if let Some(ms) = a.duration_ms.filter(|ms| *ms > 0.0) {
            lines.push(format!("- **Duration:** {ms:.0}ms"));
        }
        if !a.details.is_empty() {
            let details = serde_json::to_string(&a.details).unwrap_or_default();
            lines.push(format!("- **Details:** `{details}`"));
        }
        if let Some(err) = &a.error {
            lines.push(format!("- **Error:** {err}"));
        }
        lines.push(String::new());
    }

    if !r.error_summary().is_empty() {
        lines.push("## Error Summary".into());
        lines.push(String::new());
        lines.extend(r.error_summary().iter().map(|err| format!("- {err}")));
        lines.push(String::new());
    }

    lines.join("\n")
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Short console block: duration, status, instance, counts and the first
/// few error lines.
pub fn console_summary(r: &Report) -> String {
    let heavy = "=".repeat(CONSOLE_WIDTH);
    let light = "-".repeat(CONSOLE_WIDTH);

    let mut lines = vec![
        String::new(),
        heavy.clone(),
        "CUA TASK ANALYSIS REPORT".into(),
        heavy.clone(),
        format!("Duration: {}", duration_text(r)),
        format!("Status: {}", r.final_status.to_uppercase()),
        format!("Instance: {}", r.instance_id.as_deref().unwrap_or("N/A")),
        light.clone(),
        format!("Total Actions:  {}", r.total_actions()),
        format!("  ✅ Successful: {}", r.successful_actions()),
        format!("  ❌ Failed:     {}", r.failed_actions()),
        format!("  ⏭️  Skipped:    {}", r.skipped_actions()),
        format!("  Success Rate: {:.1}%", r.success_rate()),
        light,
    ];

    let errors = r.error_summary();
    if !errors.is_empty() {
        lines.push("Errors:".into());
        lines.extend(
            errors
                .iter()
                .take(CONSOLE_MAX_ERRORS)
                .map(|err| format!("  • {}", truncate_chars(err, CONSOLE_ERROR_CHARS))),
        );
        if errors.len() > CONSOLE_MAX_ERRORS {
            lines.push(format!("  ... and {} more errors", errors.len() - CONSOLE_MAX_ERRORS));
        }
    }
    lines.push(heavy);
    lines.join("\n")
}

pub fn print_summary(r: &Report) {
    println!("{}", console_summary(r));
}
