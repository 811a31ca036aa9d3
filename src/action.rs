use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::CuaError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i64; 2]", into = "[i64; 2]")]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl From<[i64; 2]> for Point {
    fn from([x, y]: [i64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [i64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

// Anything that is not explicitly right or middle is the primary button.
impl From<String> for MouseButton {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "right" => MouseButton::Right,
            "middle" | "wheel" => MouseButton::Middle,
            _ => MouseButton::Left,
        }
    }
}

impl From<MouseButton> for &'static str {
    fn from(b: MouseButton) -> Self {
        b.as_str()
    }
}

/// Tag of an [`ActionRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Click,
    DoubleClick,
    Move,
    Drag,
    TypeText,
    PressKey,
    Scroll,
    Screenshot,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Click => "click_mouse",
            ActionKind::DoubleClick => "double_click",
            ActionKind::Move => "move_mouse",
            ActionKind::Drag => "drag_mouse",
            ActionKind::TypeText => "type_text",
            ActionKind::PressKey => "press_key",
            ActionKind::Scroll => "scroll",
            ActionKind::Screenshot => "take_screenshot",
        }
    }

    /// Resolve a wire name. The short names used by the Responses API
    /// (`click`, `move`, `keypress`, ...) are accepted as aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "click_mouse" | "click" => ActionKind::Click,
            "double_click" => ActionKind::DoubleClick,
            "move_mouse" | "move" => ActionKind::Move,
            "drag_mouse" | "drag" => ActionKind::Drag,
            "type_text" | "type" => ActionKind::TypeText,
            "press_key" | "keypress" | "key" => ActionKind::PressKey,
            "scroll" => ActionKind::Scroll,
            "take_screenshot" | "screenshot" => ActionKind::Screenshot,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One abstract action. Every field is optional on the wire; a missing
/// precondition turns the action into a no-op rather than an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ActionRequest {
    #[serde(rename = "click_mouse")]
    Click {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<Point>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        button: Option<MouseButton>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        num_clicks: Option<u32>,
    },
    #[serde(rename = "double_click")]
    DoubleClick {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<Point>,
    },
    #[serde(rename = "move_mouse")]
    Move {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<Point>,
    },
    #[serde(rename = "drag_mouse")]
    Drag {
        #[serde(default)]
        path: Vec<Point>,
    },
    #[serde(rename = "type_text")]
    TypeText {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    #[serde(rename = "press_key")]
    PressKey {
        #[serde(default)]
        keys: Vec<String>,
    },
    #[serde(rename = "scroll")]
    Scroll {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<Point>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta_x: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta_y: Option<i64>,
    },
    #[serde(rename = "take_screenshot")]
    Screenshot,
}

impl ActionRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionRequest::Click { .. } => ActionKind::Click,
            ActionRequest::DoubleClick { .. } => ActionKind::DoubleClick,
            ActionRequest::Move { .. } => ActionKind::Move,
            ActionRequest::Drag { .. } => ActionKind::Drag,
            ActionRequest::TypeText { .. } => ActionKind::TypeText,
            ActionRequest::PressKey { .. } => ActionKind::PressKey,
            ActionRequest::Scroll { .. } => ActionKind::Scroll,
            ActionRequest::Screenshot => ActionKind::Screenshot,
        }
    }

    /// Decode a raw request such as
    /// `{"action": "click_mouse", "coordinates": [10, 20], "button": "right"}`.
    ///
    /// The kind is checked before anything else so an unrecognized action is
    /// always reported as [`CuaError::UnknownAction`].
    pub fn decode(v: &Value) -> Result<Self, CuaError> {
        let name = v
            .get("action")
            .or_else(|| v.get("type"))
            .and_then(|x| x.as_str())
            .ok_or_else(|| CuaError::InvalidRequest("missing action kind".into()))?;
        let kind =
            ActionKind::from_name(name).ok_or_else(|| CuaError::UnknownAction(name.to_string()))?;

        let mut obj = v.as_object().cloned().unwrap_or_default();
        obj.remove("type");
        obj.insert("action".into(), Value::String(kind.as_str().into()));
        serde_json::from_value(Value::Object(obj))
            .map_err(|e| CuaError::InvalidRequest(format!("{kind}: {e}")))
    }

    /// Request fields as a detail map for action records.
    pub fn details(&self) -> serde_json::Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                map.remove("action");
                map
            }
            _ => serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_click_with_defaults_left_open() {
        let req = ActionRequest::decode(&json!({"action": "click_mouse", "coordinates": [10, 20]}))
            .unwrap();
        assert_eq!(
            req,
            ActionRequest::Click {
                coordinates: Some(Point::new(10, 20)),
                button: None,
                num_clicks: None
            }
        );
    }

    #[test]
    fn aliases_resolve_to_canonical_kinds() {
        let req =
            ActionRequest::decode(&json!({"type": "keypress", "keys": ["ctrl", "c"]})).unwrap();
        assert_eq!(req.kind(), ActionKind::PressKey);
        let req = ActionRequest::decode(&json!({"action": "screenshot"})).unwrap();
        assert_eq!(req, ActionRequest::Screenshot);
    }

    #[test]
    fn unknown_button_falls_back_to_primary() {
        let req = ActionRequest::decode(
            &json!({"action": "click_mouse", "coordinates": [1, 1], "button": "back"}),
        )
        .unwrap();
        match req {
            ActionRequest::Click { button, .. } => assert_eq!(button, Some(MouseButton::Left)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = ActionRequest::decode(&json!({"action": "teleport", "coordinates": [0, 0]}))
            .unwrap_err();
        assert_eq!(err, CuaError::UnknownAction("teleport".into()));
    }

    #[test]
    fn malformed_fields_are_invalid_requests() {
        let err =
            ActionRequest::decode(&json!({"action": "drag_mouse", "path": "nope"})).unwrap_err();
        assert!(matches!(err, CuaError::InvalidRequest(_)));
        let err = ActionRequest::decode(&json!({"coordinates": [0, 0]})).unwrap_err();
        assert!(matches!(err, CuaError::InvalidRequest(_)));
    }

    #[test]
    fn details_omit_the_tag() {
        let req = ActionRequest::Scroll {
            coordinates: Some(Point::new(5, 6)),
            delta_x: None,
            delta_y: Some(-120),
        };
        let details = req.details();
        assert_eq!(details.get("coordinates"), Some(&json!([5, 6])));
        assert_eq!(details.get("delta_y"), Some(&json!(-120)));
        assert!(!details.contains_key("action"));
    }
}
