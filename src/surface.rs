use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{MouseButton, Point};
use crate::error::CuaError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { width: 1280, height: 720 }
    }
}

/// Primitive input and capture operations of one live interactive surface.
///
/// Every call resolves only once the backend has applied the event, so a
/// capture issued after awaiting an input call observes its effect.
#[async_trait]
pub trait InputSurface: Send + Sync {
    async fn move_pointer(&self, to: Point) -> Result<(), CuaError>;
    /// Press `button` at the current pointer position. `click_count` is the
    /// running count of a multi-click (1 for the first press, 2 for the second).
    async fn press_button(&self, button: MouseButton, click_count: u32) -> Result<(), CuaError>;
    async fn release_button(&self, button: MouseButton, click_count: u32) -> Result<(), CuaError>;
    async fn wheel(&self, delta_x: i64, delta_y: i64) -> Result<(), CuaError>;
    async fn type_text(&self, text: &str) -> Result<(), CuaError>;
    /// Press a single key or a `+`-joined chord such as `Meta+a`.
    async fn press_key(&self, key: &str) -> Result<(), CuaError>;
    /// PNG bytes of the visible viewport.
    async fn capture(&self) -> Result<Vec<u8>, CuaError>;
    async fn close(&self) -> Result<(), CuaError>;
}
