use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CuaError;

pub const STATUS_UNKNOWN: &str = "unknown";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_COMPLETED_WITH_ERRORS: &str = "completed_with_errors";

/// Terminal status label for a run with `failed` failures.
pub fn terminal_status(failed: usize) -> &'static str {
    if failed == 0 {
        STATUS_COMPLETED
    } else {
        STATUS_COMPLETED_WITH_ERRORS
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Failed,
    Skipped,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Success => "success",
            ActionStatus::Failed => "failed",
            ActionStatus::Skipped => "skipped",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_type: String,
    pub call_id: String,
    pub status: ActionStatus,
    pub timestamp: DateTime<Local>,
    #[serde(default)]
    pub details: Map<String, Value>,
    pub error: Option<String>,
    pub duration_ms: Option<f64>,
}

impl ActionRecord {
    pub fn new(
        action_type: impl Into<String>,
        call_id: impl Into<String>,
        status: ActionStatus,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            call_id: call_id.into(),
            status,
            timestamp: Local::now(),
            details: Map::new(),
            error: None,
            duration_ms: None,
        }
    }

    fn summary_line(&self, error: &str) -> String {
        format!("{}: {}", self.action_type, error)
    }
}

/// Aggregate history of one run. Counters are only touched through
/// [`Report::add_action`] and [`Report::mark_failed`], which keep
/// `total == successful + failed + skipped`. Decoding checks the counters
/// against the action list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReportFields")]
pub struct Report {
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    total_actions: usize,
    successful_actions: usize,
    failed_actions: usize,
    skipped_actions: usize,
    actions: Vec<ActionRecord>,
    pub instance_id: Option<String>,
    pub final_status: String,
    error_summary: Vec<String>,
}

#[derive(Deserialize)]
struct ReportFields {
    start_time: DateTime<Local>,
    end_time: Option<DateTime<Local>>,
    total_actions: usize,
    successful_actions: usize,
    failed_actions: usize,
    skipped_actions: usize,
    #[serde(default)]
    actions: Vec<ActionRecord>,
    instance_id: Option<String>,
    final_status: String,
    #[serde(default)]
    error_summary: Vec<String>,
}

impl TryFrom<ReportFields> for Report {
    type Error = String;

    fn try_from(f: ReportFields) -> Result<Self, Self::Error> {
        let count = |status: ActionStatus| f.actions.iter().filter(|a| a.status == status).count();
        let expected = (
            f.actions.len(),
            count(ActionStatus::Success),
            count(ActionStatus::Failed),
            count(ActionStatus::Skipped),
        );
        let found = (f.total_actions, f.successful_actions, f.failed_actions, f.skipped_actions);
        if found != expected {
            return Err(format!(
                "action counters {found:?} do not match the action list {expected:?}"
            ));
        }
        Ok(Report {
            start_time: f.start_time,
            end_time: f.end_time,
            total_actions: f.total_actions,
            successful_actions: f.successful_actions,
            failed_actions: f.failed_actions,
            skipped_actions: f.skipped_actions,
            actions: f.actions,
            instance_id: f.instance_id,
            final_status: f.final_status,
            error_summary: f.error_summary,
        })
    }
}

impl Report {
    pub fn new(start_time: DateTime<Local>) -> Self {
        Self {
            start_time,
            end_time: None,
            total_actions: 0,
            successful_actions: 0,
            failed_actions: 0,
            skipped_actions: 0,
            actions: Vec::new(),
            instance_id: None,
            final_status: STATUS_UNKNOWN.to_string(),
            error_summary: Vec::new(),
        }
    }

    pub fn total_actions(&self) -> usize {
        self.total_actions
    }

    pub fn successful_actions(&self) -> usize {
        self.successful_actions
    }

    pub fn failed_actions(&self) -> usize {
        self.failed_actions
    }

    pub fn skipped_actions(&self) -> usize {
        self.skipped_actions
    }

    pub fn actions(&self) -> &[ActionRecord] {
        &self.actions
    }

    pub fn error_summary(&self) -> &[String] {
        &self.error_summary
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        let end = self.end_time?;
        Some((end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_actions == 0 {
            return 0.0;
        }
        self.successful_actions as f64 / self.total_actions as f64 * 100.0
    }

    pub fn add_action(&mut self, action: ActionRecord) {
        self.total_actions += 1;
        match action.status {
            ActionStatus::Success => self.successful_actions += 1,
            ActionStatus::Failed => {
                self.failed_actions += 1;
                if let Some(err) = &action.error {
                    self.error_summary.push(action.summary_line(err));
                }
            }
            ActionStatus::Skipped => self.skipped_actions += 1,
        }
        self.actions.push(action);
    }

    /// Flip the most recent successful record for `call_id` to failed.
    ///
    /// Calls and their outputs arrive as separate transcript messages, so a
    /// call is first recorded optimistically and corrected here once its
    /// output reports an error. Returns false when nothing matched.
    pub fn mark_failed(&mut self, call_id: &str, error: &str) -> bool {
        let Some(action) = self
            .actions
            .iter_mut()
            .rev()
            .find(|a| a.call_id == call_id && a.status == ActionStatus::Success)
        else {
            return false;
        };
        action.status = ActionStatus::Failed;
        action.error = Some(error.to_string());
        let line = action.summary_line(error);
        self.successful_actions -= 1;
        self.failed_actions += 1;
        self.error_summary.push(line);
        true
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Builds a [`Report`] live while a run executes.
#[derive(Debug, Default)]
pub struct ReportGenerator {
    report: Option<Report>,
    last_action_at: Option<DateTime<Local>>,
}

impl ReportGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any previous report and start a fresh one.
    pub fn start(&mut self) {
        let now = Local::now();
        self.report = Some(Report::new(now));
        self.last_action_at = Some(now);
        debug!("report started");
    }

    pub fn record_action(
        &mut self,
        action_type: &str,
        call_id: &str,
        details: Option<Map<String, Value>>,
        error: Option<String>,
        status: Option<ActionStatus>,
    ) {
        if self.report.is_none() {
            self.start();
        }
        let now = Local::now();
        let duration_ms = self
            .last_action_at
            .map(|prev| (now - prev).num_microseconds().unwrap_or(0) as f64 / 1000.0);
        let status = status.unwrap_or(if error.is_some() {
            ActionStatus::Failed
        } else {
            ActionStatus::Success
        });
        let report = self.report_mut();
        if report.is_finished() {
            warn!(action_type, call_id, "recording into a finished report");
        }
        report.add_action(ActionRecord {
            action_type: action_type.to_string(),
            call_id: call_id.to_string(),
            status,
            timestamp: now,
            details: details.unwrap_or_default(),
            error,
            duration_ms,
        });
        self.last_action_at = Some(now);
    }

    /// Stamp the end time and terminal status. Allowed once per report.
    pub fn finish(&mut self, status: &str, instance_id: Option<&str>) -> Result<(), CuaError> {
        let report = self.report_mut();
        if report.is_finished() {
            return Err(CuaError::ReportFinished);
        }
        report.end_time = Some(Local::now());
        report.final_status = status.to_string();
        report.instance_id = instance_id.map(str::to_string);
        debug!(status, total = report.total_actions, "report finished");
        Ok(())
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn into_report(self) -> Option<Report> {
        self.report
    }

    fn report_mut(&mut self) -> &mut Report {
        if self.report.is_none() {
            self.start();
        }
        self.report.get_or_insert_with(|| Report::new(Local::now()))
    }
}

/// Cloneable handle for runs where several tasks append records.
#[derive(Clone, Debug, Default)]
pub struct SharedReportGenerator {
    inner: Arc<Mutex<ReportGenerator>>,
}

impl SharedReportGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start(&self) {
        self.inner.lock().await.start();
    }

    pub async fn record_action(
        &self,
        action_type: &str,
        call_id: &str,
        details: Option<Map<String, Value>>,
        error: Option<String>,
        status: Option<ActionStatus>,
    ) {
        self.inner
            .lock()
            .await
            .record_action(action_type, call_id, details, error, status);
    }

    pub async fn finish(&self, status: &str, instance_id: Option<&str>) -> Result<(), CuaError> {
        self.inner.lock().await.finish(status, instance_id)
    }

    pub async fn snapshot(&self) -> Option<Report> {
        self.inner.lock().await.report().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_counts_consistent(r: &Report) {
        assert_eq!(
            r.total_actions(),
            r.successful_actions() + r.failed_actions() + r.skipped_actions()
        );
        assert_eq!(r.total_actions(), r.actions().len());
    }

    #[test]
    fn decoding_rejects_counters_that_disagree_with_actions() {
        let mut gen = ReportGenerator::new();
        gen.record_action("click_mouse", "c1", None, None, None);
        gen.record_action("type_text", "c2", None, Some("no focus".into()), None);
        let report = gen.into_report().unwrap();

        let mut value = serde_json::to_value(&report).unwrap();
        let back: Report = serde_json::from_value(value.clone()).unwrap();
        assert_counts_consistent(&back);
        assert_eq!(back.failed_actions(), 1);

        value["failed_actions"] = serde_json::json!(0);
        value["successful_actions"] = serde_json::json!(2);
        assert!(serde_json::from_value::<Report>(value).is_err());
    }

    #[test]
    fn empty_report_has_zero_success_rate() {
        let mut gen = ReportGenerator::new();
        gen.start();
        assert_eq!(gen.report().unwrap().success_rate(), 0.0);
    }

    #[test]
    fn status_defaults_follow_error_presence() {
        let mut gen = ReportGenerator::new();
        gen.start();
        gen.record_action("click_mouse", "c1", None, None, None);
        assert_counts_consistent(gen.report().unwrap());
        gen.record_action("type_text", "c2", None, Some("no focus".into()), None);
        assert_counts_consistent(gen.report().unwrap());
        gen.record_action("scroll", "c3", None, None, Some(ActionStatus::Skipped));
        assert_counts_consistent(gen.report().unwrap());
        gen.record_action(
            "press_key",
            "c4",
            None,
            Some("ignored".into()),
            Some(ActionStatus::Success),
        );
        assert_counts_consistent(gen.report().unwrap());

        let r = gen.report().unwrap();
        let statuses: Vec<_> = r.actions().iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![
                ActionStatus::Success,
                ActionStatus::Failed,
                ActionStatus::Skipped,
                ActionStatus::Success
            ]
        );
        assert_eq!(r.error_summary(), ["type_text: no focus".to_string()]);
        assert!((r.success_rate() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn recording_before_start_starts_implicitly() {
        let mut gen = ReportGenerator::new();
        gen.record_action("move_mouse", "c1", None, None, None);
        let r = gen.report().unwrap();
        assert_eq!(r.total_actions(), 1);
        assert!(r.actions()[0].duration_ms.is_some());
    }

    #[test]
    fn finish_is_allowed_once() {
        let mut gen = ReportGenerator::new();
        gen.start();
        gen.finish(STATUS_COMPLETED, Some("inst-1")).unwrap();
        let r = gen.report().unwrap();
        assert_eq!(r.final_status, STATUS_COMPLETED);
        assert_eq!(r.instance_id.as_deref(), Some("inst-1"));
        assert!(r.duration_seconds().is_some());
        assert_eq!(gen.finish(STATUS_COMPLETED_WITH_ERRORS, None), Err(CuaError::ReportFinished));
        assert_eq!(gen.report().unwrap().final_status, STATUS_COMPLETED);
    }

    #[test]
    fn mark_failed_corrects_latest_successful_match() {
        let mut report = Report::new(Local::now());
        report.add_action(ActionRecord::new("click", "c1", ActionStatus::Success));
        report.add_action(ActionRecord::new("type", "c2", ActionStatus::Success));
        report.add_action(ActionRecord::new("click", "c1", ActionStatus::Success));

        assert!(report.mark_failed("c1", "stale element"));
        assert_counts_consistent(&report);
        assert_eq!(report.actions()[0].status, ActionStatus::Success);
        assert_eq!(report.actions()[2].status, ActionStatus::Failed);
        assert_eq!(report.error_summary(), ["click: stale element".to_string()]);

        assert!(report.mark_failed("c1", "again"));
        assert!(!report.mark_failed("c1", "nothing left"));
        assert!(!report.mark_failed("missing", "x"));
        assert_eq!(report.failed_actions(), 2);
        assert_counts_consistent(&report);
    }

    #[tokio::test]
    async fn shared_generator_serializes_producers() {
        let shared = SharedReportGenerator::new();
        shared.start().await;
        let mut handles = Vec::new();
        for i in 0..8 {
            let s = shared.clone();
            handles.push(tokio::spawn(async move {
                let err = (i % 4 == 0).then(|| "boom".to_string());
                s.record_action("click_mouse", &format!("c{i}"), None, err, None).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let r = shared.snapshot().await.unwrap();
        assert_eq!(r.total_actions(), 8);
        assert_eq!(r.failed_actions(), 2);
        assert_counts_consistent(&r);
    }
}
