use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::action::{ActionRequest, MouseButton};
use crate::error::CuaError;
use crate::keys::plan_key_presses;
use crate::report::{ActionStatus, ReportGenerator};
use crate::session::Session;
use crate::surface::InputSurface;

/// Visual state captured after an action, as base64 PNG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub base64_image: String,
}

impl ActionOutcome {
    pub fn from_png(bytes: &[u8]) -> Self {
        Self { base64_image: STANDARD.encode(bytes) }
    }

    pub fn mime_type(&self) -> &'static str {
        "image/png"
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), self.base64_image)
    }
}

async fn click_at(
    surface: &dyn InputSurface,
    button: MouseButton,
    clicks: u32,
) -> Result<(), CuaError> {
    for n in 1..=clicks.max(1) {
        surface.press_button(button, n).await?;
        surface.release_button(button, n).await?;
    }
    Ok(())
}

/// Apply one action and capture the surface afterwards.
///
/// Effects whose inputs are missing (a click without coordinates, a drag
/// with fewer than two points) are skipped, but the capture still happens.
/// Transport errors propagate; callers that want to keep a run going should
/// go through [`execute_recorded`].
pub async fn execute(
    surface: &dyn InputSurface,
    request: &ActionRequest,
) -> Result<ActionOutcome, CuaError> {
    debug!(action = %request.kind(), "executing action");
    match request {
        ActionRequest::Click { coordinates, button, num_clicks } => {
            if let Some(p) = coordinates {
                surface.move_pointer(*p).await?;
                click_at(surface, button.unwrap_or_default(), num_clicks.unwrap_or(1)).await?;
            }
        }
        ActionRequest::DoubleClick { coordinates } => {
            if let Some(p) = coordinates {
                surface.move_pointer(*p).await?;
                click_at(surface, MouseButton::Left, 2).await?;
            }
        }
        ActionRequest::Move { coordinates } => {
            if let Some(p) = coordinates {
                surface.move_pointer(*p).await?;
            }
        }
        ActionRequest::Drag { path } => {
            if let [start, rest @ ..] = path.as_slice() {
                if !rest.is_empty() {
                    surface.move_pointer(*start).await?;
                    surface.press_button(MouseButton::Left, 1).await?;
                    for p in rest {
                        surface.move_pointer(*p).await?;
                    }
                    surface.release_button(MouseButton::Left, 1).await?;
                }
            }
        }
        ActionRequest::TypeText { text } => {
            if let Some(text) = text.as_deref().filter(|t| !t.is_empty()) {
                surface.type_text(text).await?;
            }
        }
        ActionRequest::PressKey { keys } => {
            for key in plan_key_presses(keys) {
                surface.press_key(&key).await?;
            }
        }
        ActionRequest::Scroll { coordinates, delta_x, delta_y } => {
            if let (Some(p), true) = (coordinates, delta_x.is_some() || delta_y.is_some()) {
                surface.move_pointer(*p).await?;
                surface.wheel(delta_x.unwrap_or(0), delta_y.unwrap_or(0)).await?;
            }
        }
        ActionRequest::Screenshot => {}
    }

    let png = surface.capture().await?;
    Ok(ActionOutcome::from_png(&png))
}

/// Decode a raw request and execute it. Nothing touches the surface when the
/// request does not decode.
pub async fn execute_value(
    surface: &dyn InputSurface,
    raw: &Value,
) -> Result<ActionOutcome, CuaError> {
    let request = ActionRequest::decode(raw)?;
    execute(surface, &request).await
}

/// Execute against a session and record the outcome.
///
/// Transport failures become failed records and yield `Ok(None)` so the run
/// can continue; fatal errors are returned untouched and not recorded.
pub async fn execute_recorded(
    session: &Session,
    request: &ActionRequest,
    call_id: &str,
    recorder: &mut ReportGenerator,
) -> Result<Option<ActionOutcome>, CuaError> {
    let kind = request.kind();
    match session.execute(request).await {
        Ok(outcome) => {
            recorder.record_action(kind.as_str(), call_id, Some(request.details()), None, None);
            Ok(Some(outcome))
        }
        Err(err) if !err.is_fatal() => {
            warn!(session = %session.id(), action = %kind, call_id, error = %err, "action failed");
            recorder.record_action(
                kind.as_str(),
                call_id,
                Some(request.details()),
                Some(err.to_string()),
                Some(ActionStatus::Failed),
            );
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
