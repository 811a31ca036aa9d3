//! Rebuild a [`Report`] after the fact, from streamed graph updates or from
//! the final graph state, for runs that were not recorded live.

use chrono::Local;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::report::{terminal_status, ActionRecord, ActionStatus, Report};

const UNKNOWN: &str = "unknown";

/// One message as it appears in update events and the final state. Every
/// field is optional; shapes that do not fit decode to the default.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    tool_call_id: Option<String>,
    additional_kwargs: AdditionalKwargs,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AdditionalKwargs {
    #[serde(rename = "type")]
    kind: Option<String>,
    tool_outputs: Vec<Value>,
    error: Option<Value>,
}

impl RawMessage {
    fn parse(v: &Value) -> Self {
        serde_json::from_value(v.clone()).unwrap_or_default()
    }

    /// Falsy values (null, `false`, zero, empty string/array/object) mean
    /// no error.
    fn error(&self) -> Option<String> {
        match self.additional_kwargs.error.as_ref()? {
            Value::Null | Value::Bool(false) => None,
            Value::Number(n) if n.as_f64() == Some(0.0) => None,
            Value::String(s) if s.is_empty() => None,
            Value::Array(a) if a.is_empty() => None,
            Value::Object(o) if o.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn computer_calls(&self) -> impl Iterator<Item = ComputerCall> + '_ {
        self.additional_kwargs
            .tool_outputs
            .iter()
            .filter(|o| o.get("type").and_then(Value::as_str) == Some("computer_call"))
            .map(ComputerCall::from_output)
    }
}

/// A `computer_call` tool output: the model asking for an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputerCall {
    pub call_id: String,
    pub action_type: String,
    pub action: Map<String, Value>,
}

impl ComputerCall {
    fn from_output(o: &Value) -> Self {
        let action = o.get("action").and_then(Value::as_object).cloned().unwrap_or_default();
        Self {
            call_id: o.get("call_id").and_then(Value::as_str).unwrap_or(UNKNOWN).to_string(),
            action_type: action.get("type").and_then(Value::as_str).unwrap_or(UNKNOWN).to_string(),
            action,
        }
    }

    fn into_record(self) -> ActionRecord {
        let mut record = ActionRecord::new(self.action_type, self.call_id, ActionStatus::Success);
        record.details = self.action;
        record
    }
}

/// A streamed update, classified by the graph step that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum StepUpdate {
    TakeAction { call_id: String, error: Option<String>, instance_id: Option<String> },
    ModelCall { calls: Vec<ComputerCall> },
    Provision { instance_id: Option<String> },
    Ignored,
}

fn messages_of(step: &Value) -> Vec<RawMessage> {
    match step.get("messages") {
        Some(Value::Array(list)) => list.iter().map(RawMessage::parse).collect(),
        Some(m @ Value::Object(_)) => vec![RawMessage::parse(m)],
        _ => Vec::new(),
    }
}

fn instance_id_of(step: &Value) -> Option<String> {
    step.get("instance_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl StepUpdate {
    /// Classify one raw update. Accepts either a `{step: data}` mapping or a
    /// `[namespace, {step: data}]` pair from subgraph streaming.
    pub fn classify(update: &Value) -> Self {
        let data = match update {
            Value::Array(pair) if pair.len() == 2 => &pair[1],
            other => other,
        };
        let Some(data) = data.as_object() else {
            return StepUpdate::Ignored;
        };

        if let Some(step) = data.get("take_computer_action") {
            let msg = messages_of(step).into_iter().next().unwrap_or_default();
            return StepUpdate::TakeAction {
                call_id: msg.tool_call_id.clone().unwrap_or_else(|| UNKNOWN.to_string()),
                error: msg.error(),
                instance_id: instance_id_of(step),
            };
        }
        if let Some(step) = data.get("call_model") {
            let calls = messages_of(step)
                .iter()
                .flat_map(|m| m.computer_calls().collect::<Vec<_>>())
                .collect();
            return StepUpdate::ModelCall { calls };
        }
        if let Some(step) = data.get("create_vm_instance") {
            return StepUpdate::Provision { instance_id: instance_id_of(step) };
        }
        StepUpdate::Ignored
    }
}

fn finalize(mut report: Report) -> Report {
    report.end_time = Some(Local::now());
    report.final_status = terminal_status(report.failed_actions()).to_string();
    report
}

/// Rebuild a report from streamed updates in arrival order.
///
/// Model-issued calls are counted as successes: they record what was
/// requested, not a verified outcome.
pub fn from_stream_updates<'a, I>(updates: I) -> Report
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut report = Report::new(Local::now());
    let mut ignored = 0usize;
    for update in updates {
        match StepUpdate::classify(update) {
            StepUpdate::TakeAction { call_id, error, instance_id } => {
                if instance_id.is_some() {
                    report.instance_id = instance_id;
                }
                let status =
                    if error.is_some() { ActionStatus::Failed } else { ActionStatus::Success };
                let mut record = ActionRecord::new("computer_action", call_id, status);
                record.error = error;
                report.add_action(record);
            }
            StepUpdate::ModelCall { calls } => {
                for call in calls {
                    report.add_action(call.into_record());
                }
            }
            StepUpdate::Provision { instance_id } => {
                if instance_id.is_some() {
                    report.instance_id = instance_id;
                }
            }
            StepUpdate::Ignored => ignored += 1,
        }
    }
    debug!(total = report.total_actions(), ignored, "report rebuilt from stream updates");
    finalize(report)
}

/// Rebuild a report from the final graph state (`instance_id` + `messages`).
///
/// Each `computer_call` is recorded as a success when seen. A later tool
/// message of kind `computer_call_output` carrying an error flips the most
/// recent successful record with the same call id to failed, so every call
/// id ends up with a single record.
pub fn from_final_state(state: &Value) -> Report {
    let mut report = Report::new(Local::now());
    report.instance_id = instance_id_of(state);

    let messages = state
        .get("messages")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    for raw in messages {
        let msg = RawMessage::parse(raw);
        for call in msg.computer_calls() {
            report.add_action(call.into_record());
        }

        let is_call_output = msg.kind.as_deref() == Some("tool")
            && msg.additional_kwargs.kind.as_deref() == Some("computer_call_output");
        if !is_call_output {
            continue;
        }
        if let Some(error) = msg.error() {
            let call_id = msg.tool_call_id.as_deref().unwrap_or_default();
            if !report.mark_failed(call_id, &error) {
                debug!(call_id, "error output without a matching call");
            }
        }
    }
    debug!(total = report.total_actions(), "report rebuilt from final state");
    finalize(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_subgraph_pairs() {
        let update = json!([["cua"], {"create_vm_instance": {"instance_id": "vm-1"}}]);
        assert_eq!(
            StepUpdate::classify(&update),
            StepUpdate::Provision { instance_id: Some("vm-1".into()) }
        );
    }

    #[test]
    fn unknown_and_malformed_updates_are_ignored() {
        assert_eq!(StepUpdate::classify(&json!({"summarize": {}})), StepUpdate::Ignored);
        assert_eq!(StepUpdate::classify(&json!("text")), StepUpdate::Ignored);
        assert_eq!(StepUpdate::classify(&json!([1, 2, 3])), StepUpdate::Ignored);
    }

    #[test]
    fn take_action_defaults_call_id() {
        let update = json!({"take_computer_action": {"messages": {
            "additional_kwargs": {"error": "timeout"}
        }}});
        assert_eq!(
            StepUpdate::classify(&update),
            StepUpdate::TakeAction {
                call_id: "unknown".into(),
                error: Some("timeout".into()),
                instance_id: None
            }
        );
    }

    #[test]
    fn falsy_errors_are_not_failures() {
        let falsy =
            [json!(false), json!(0), json!(0.0), json!([]), json!({}), json!(""), Value::Null];
        for flag in falsy {
            let update = json!({"take_computer_action": {"messages": {
                "tool_call_id": "c1", "additional_kwargs": {"error": flag.clone()}
            }}});
            let report = from_stream_updates(&[update]);
            assert_eq!(report.failed_actions(), 0, "error value {flag}");
            assert_eq!(report.successful_actions(), 1);
            assert_eq!(report.final_status, "completed");
        }
    }

    #[test]
    fn truthy_non_string_errors_are_rendered() {
        let update = json!({"take_computer_action": {"messages": {
            "tool_call_id": "c1", "additional_kwargs": {"error": {"code": 5}}
        }}});
        let report = from_stream_updates(&[update]);
        assert_eq!(report.failed_actions(), 1);
        assert_eq!(report.actions()[0].error.as_deref(), Some(r#"{"code":5}"#));
    }

    #[test]
    fn model_call_keeps_only_computer_calls() {
        let update = json!({"call_model": {"messages": {"additional_kwargs": {"tool_outputs": [
            {"type": "computer_call", "call_id": "c1", "action": {"type": "click", "x": 3, "y": 4}},
            {"type": "web_search_call", "id": "w1"}
        ]}}}});
        match StepUpdate::classify(&update) {
            StepUpdate::ModelCall { calls } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].call_id, "c1");
                assert_eq!(calls[0].action_type, "click");
                assert_eq!(calls[0].action.get("x"), Some(&json!(3)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
