#![allow(dead_code)]

use async_trait::async_trait;
use cua_runtime::session::{LaunchSpec, LaunchedSurface, SurfaceLauncher};
use cua_runtime::{CuaError, InputSurface, MouseButton, Point};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Move(i64, i64),
    Press(MouseButton, u32),
    Release(MouseButton, u32),
    Wheel(i64, i64),
    Type(String),
    Key(String),
    Capture,
    Close,
}

/// Surface that records every primitive it receives.
#[derive(Default)]
pub struct RecordingSurface {
    events: Mutex<Vec<Event>>,
    /// Fail any key press with a transport error.
    pub fail_keys: AtomicBool,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    fn push(&self, e: Event) {
        self.events.lock().unwrap().push(e);
    }
}

#[async_trait]
impl InputSurface for RecordingSurface {
    async fn move_pointer(&self, to: Point) -> Result<(), CuaError> {
        self.push(Event::Move(to.x, to.y));
        Ok(())
    }

    async fn press_button(&self, button: MouseButton, click_count: u32) -> Result<(), CuaError> {
        self.push(Event::Press(button, click_count));
        Ok(())
    }

    async fn release_button(&self, button: MouseButton, click_count: u32) -> Result<(), CuaError> {
        self.push(Event::Release(button, click_count));
        Ok(())
    }

    async fn wheel(&self, delta_x: i64, delta_y: i64) -> Result<(), CuaError> {
        self.push(Event::Wheel(delta_x, delta_y));
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), CuaError> {
        self.push(Event::Type(text.to_string()));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), CuaError> {
        if self.fail_keys.load(Ordering::SeqCst) {
            return Err(CuaError::Transport(format!("key {key} rejected")));
        }
        self.push(Event::Key(key.to_string()));
        Ok(())
    }

    async fn capture(&self) -> Result<Vec<u8>, CuaError> {
        self.push(Event::Capture);
        Ok(FAKE_PNG.to_vec())
    }

    async fn close(&self) -> Result<(), CuaError> {
        self.push(Event::Close);
        Ok(())
    }
}

/// Launcher handing out [`RecordingSurface`]s and remembering each spec.
#[derive(Default)]
pub struct FakeLauncher {
    pub launched: AtomicUsize,
    pub specs: Mutex<Vec<LaunchSpec>>,
    pub surfaces: Mutex<Vec<Arc<RecordingSurface>>>,
    pub stream_url: Option<String>,
}

#[async_trait]
impl SurfaceLauncher for FakeLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedSurface, CuaError> {
        self.launched.fetch_add(1, Ordering::SeqCst);
        self.specs.lock().unwrap().push(spec.clone());
        let surface = RecordingSurface::new();
        self.surfaces.lock().unwrap().push(surface.clone());
        Ok(LaunchedSurface { surface, stream_url: self.stream_url.clone() })
    }
}
