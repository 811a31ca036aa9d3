use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    InsertTextParams, MouseButton as CdpButton,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::page::{Page, ScreenshotParamsBuilder};
use futures::StreamExt;
use nanoid::nanoid;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::action::{MouseButton, Point};
use crate::error::CuaError;
use crate::keys::CHORD_SEPARATOR;
use crate::session::{is_blocked, LaunchSpec, LaunchedSurface, SurfaceLauncher};
use crate::surface::{InputSurface, Viewport};

#[derive(Clone, Debug, Default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub viewport: Viewport,
    pub blocked_domains: Vec<String>,
}

pub struct Browser {
    page: Page,
    browser: Mutex<OxideBrowser>,
    handler: JoinHandle<()>,
    interceptor: Option<JoinHandle<()>>,
    viewport: Viewport,
    pointer: StdMutex<Point>,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // A unique profile dir per launch avoids ProcessSingleton lock
        // conflicts when several sessions run side by side.
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("cua-profile-{}-{}", std::process::id(), nanoid!(10)));
        std::fs::create_dir_all(&profile_dir)?;
        builder = builder
            .user_data_dir(profile_dir)
            .window_size(cfg.viewport.width, cfg.viewport.height)
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        let handler = tokio::spawn(async move { while let Some(_ev) = handler.next().await {} });
        Self::init(browser, handler, cfg).await
    }

    /// Attach to an already running Chromium over its DevTools websocket.
    pub async fn connect(ws_url: &str, cfg: BrowserConfig) -> Result<Self> {
        let (browser, mut handler) = OxideBrowser::connect(ws_url).await?;
        let handler = tokio::spawn(async move { while let Some(_ev) = handler.next().await {} });
        Self::init(browser, handler, cfg).await
    }

    async fn init(
        browser: OxideBrowser,
        handler: JoinHandle<()>,
        cfg: BrowserConfig,
    ) -> Result<Self> {
        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = &cfg.user_agent {
            page.set_user_agent(ua.clone()).await?;
        }
        Self::pin_viewport(&page, cfg.viewport).await?;
        let interceptor = if cfg.blocked_domains.is_empty() {
            None
        } else {
            Some(Self::block_domains(&page, cfg.blocked_domains).await?)
        };
        Ok(Self {
            page,
            browser: Mutex::new(browser),
            handler,
            interceptor,
            viewport: cfg.viewport,
            pointer: StdMutex::new(Point::new(0, 0)),
        })
    }

    async fn pin_viewport(page: &Page, viewport: Viewport) -> Result<()> {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width as i64)
            .height(viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| anyhow!(e))?;
        page.execute(metrics).await?;
        Ok(())
    }

    /// Pause every request at the Fetch domain and abort the ones whose URL
    /// contains a blocked fragment.
    async fn block_domains(page: &Page, blocked: Vec<String>) -> Result<JoinHandle<()>> {
        let mut paused = page.event_listener::<EventRequestPaused>().await?;
        page.execute(FetchEnableParams::default()).await?;
        let page = page.clone();
        Ok(tokio::spawn(async move {
            while let Some(ev) = paused.next().await {
                let url = &ev.request.url;
                let res = if is_blocked(url, &blocked) {
                    debug!(url = %url, "blocked request");
                    let fail = FailRequestParams::new(
                        ev.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    );
                    page.execute(fail).await.map(|_| ())
                } else {
                    let proceed = ContinueRequestParams::new(ev.request_id.clone());
                    page.execute(proceed).await.map(|_| ())
                };
                if let Err(e) = res {
                    warn!(error = %e, "request interception failed");
                }
            }
        }))
    }

    fn pointer(&self) -> Point {
        match self.pointer.lock() {
            Ok(p) => *p,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_pointer(&self, to: Point) {
        match self.pointer.lock() {
            Ok(mut p) => *p = to,
            Err(poisoned) => *poisoned.into_inner() = to,
        }
    }

    async fn mouse_event(
        &self,
        kind: DispatchMouseEventType,
        button: Option<MouseButton>,
        click_count: i64,
        delta: Option<(i64, i64)>,
    ) -> Result<()> {
        let at = self.pointer();
        let mut cmd = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(at.x as f64)
            .y(at.y as f64)
            .click_count(click_count);
        if let Some(b) = button {
            cmd = cmd.button(cdp_button(b));
        }
        if let Some((dx, dy)) = delta {
            cmd = cmd.delta_x(dx as f64).delta_y(dy as f64);
        }
        self.page.execute(cmd.build().map_err(|e| anyhow!(e))?).await?;
        Ok(())
    }

    pub async fn move_mouse(&self, to: Point) -> Result<()> {
        self.set_pointer(to);
        self.mouse_event(DispatchMouseEventType::MouseMoved, None, 0, None).await
    }

    pub async fn type_text(&self, text: &str) -> Result<()> {
        self.page
            .execute(InsertTextParams { text: text.to_string() })
            .await?;
        Ok(())
    }

    /// Press a key or `+`-joined chord: modifiers go down in order, the
    /// final key is pressed and released, then modifiers come up in reverse.
    pub async fn keypress(&self, combo: &str) -> Result<()> {
        let parts = split_chord(combo);
        let (last, mods) = parts.split_last().ok_or_else(|| anyhow!("empty key"))?;

        let mut mask = 0;
        for m in mods {
            let def = KeyDef::of(m);
            mask |= modifier_bit(&def.key);
            self.key_event(DispatchKeyEventType::RawKeyDown, &def, mask, false).await?;
        }
        let def = KeyDef::of(last);
        // Text is only inserted for bare or shifted keys.
        let with_text = (mask & !MOD_SHIFT) == 0;
        let down = if with_text && def.text.is_some() {
            DispatchKeyEventType::KeyDown
        } else {
            DispatchKeyEventType::RawKeyDown
        };
        self.key_event(down, &def, mask, with_text).await?;
        self.key_event(DispatchKeyEventType::KeyUp, &def, mask, false).await?;
        for m in mods.iter().rev() {
            let def = KeyDef::of(m);
            mask &= !modifier_bit(&def.key);
            self.key_event(DispatchKeyEventType::KeyUp, &def, mask, false).await?;
        }
        Ok(())
    }

    async fn key_event(
        &self,
        kind: DispatchKeyEventType,
        def: &KeyDef,
        modifiers: i64,
        with_text: bool,
    ) -> Result<()> {
        let mut cmd = DispatchKeyEventParams::builder()
            .r#type(kind)
            .modifiers(modifiers)
            .key(def.key.clone())
            .code(def.code.clone())
            .windows_virtual_key_code(def.key_code);
        if with_text {
            if let Some(text) = &def.text {
                cmd = cmd.text(text.clone());
            }
        }
        self.page.execute(cmd.build().map_err(|e| anyhow!(e))?).await?;
        Ok(())
    }

    pub async fn screenshot_png(&self) -> Result<Vec<u8>> {
        let take = || async {
            self.page
                .screenshot(ScreenshotParamsBuilder::default().full_page(false).build())
                .await
        };
        match take().await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("0 width") || msg.contains("0 height") {
                    // Force the viewport back and retry once
                    Self::pin_viewport(&self.page, self.viewport).await?;
                    sleep(Duration::from_millis(50)).await;
                    return Ok(take().await?);
                }
                Err(anyhow!(e))
            }
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(task) = &self.interceptor {
            task.abort();
        }
        let res = self.browser.lock().await.close().await;
        self.handler.abort();
        res?;
        Ok(())
    }
}

fn cdp_button(b: MouseButton) -> CdpButton {
    match b {
        MouseButton::Left => CdpButton::Left,
        MouseButton::Right => CdpButton::Right,
        MouseButton::Middle => CdpButton::Middle,
    }
}

const MOD_ALT: i64 = 1;
const MOD_CTRL: i64 = 2;
const MOD_META: i64 = 4;
const MOD_SHIFT: i64 = 8;

fn modifier_bit(key: &str) -> i64 {
    match key {
        "Alt" => MOD_ALT,
        "Control" => MOD_CTRL,
        "Meta" => MOD_META,
        "Shift" => MOD_SHIFT,
        _ => 0,
    }
}

/// DOM key value, physical code, Windows virtual key code and inserted text
/// for one key.
#[derive(Debug, PartialEq)]
struct KeyDef {
    key: String,
    code: String,
    key_code: i64,
    text: Option<String>,
}

/// Split a `+`-joined chord into its keys. A trailing `++` (or a lone
/// `+`) names the plus key itself: `Shift++` is Shift and `+`.
fn split_chord(combo: &str) -> Vec<&str> {
    let (head, plus) = match combo.strip_suffix("++") {
        Some(head) => (head, Some(CHORD_SEPARATOR)),
        None if combo == CHORD_SEPARATOR => ("", Some(CHORD_SEPARATOR)),
        None => (combo, None),
    };
    let mut parts: Vec<&str> = head.split(CHORD_SEPARATOR).filter(|p| !p.is_empty()).collect();
    parts.extend(plus);
    parts
}

impl KeyDef {
    fn of(name: &str) -> Self {
        let named = |key: &str, code: &str, key_code: i64, text: Option<&str>| KeyDef {
            key: key.into(),
            code: code.into(),
            key_code,
            text: text.map(str::to_string),
        };
        match name {
            "Enter" => named("Enter", "Enter", 13, Some("\r")),
            "Tab" => named("Tab", "Tab", 9, None),
            "Backspace" => named("Backspace", "Backspace", 8, None),
            "Escape" => named("Escape", "Escape", 27, None),
            "Delete" => named("Delete", "Delete", 46, None),
            "Insert" => named("Insert", "Insert", 45, None),
            "Home" => named("Home", "Home", 36, None),
            "End" => named("End", "End", 35, None),
            "PageUp" => named("PageUp", "PageUp", 33, None),
            "PageDown" => named("PageDown", "PageDown", 34, None),
            "ArrowLeft" => named("ArrowLeft", "ArrowLeft", 37, None),
            "ArrowUp" => named("ArrowUp", "ArrowUp", 38, None),
            "ArrowRight" => named("ArrowRight", "ArrowRight", 39, None),
            "ArrowDown" => named("ArrowDown", "ArrowDown", 40, None),
            "CapsLock" => named("CapsLock", "CapsLock", 20, None),
            "Space" | " " => named(" ", "Space", 32, Some(" ")),
            "Shift" => named("Shift", "ShiftLeft", 16, None),
            "Control" => named("Control", "ControlLeft", 17, None),
            "Alt" => named("Alt", "AltLeft", 18, None),
            "Meta" => named("Meta", "MetaLeft", 91, None),
            _ => Self::other(name),
        }
    }

    fn other(name: &str) -> Self {
        if let Some(n) = name.strip_prefix('F').and_then(|n| n.parse::<i64>().ok()) {
            if (1..=12).contains(&n) {
                return KeyDef {
                    key: name.into(),
                    code: name.into(),
                    key_code: 111 + n,
                    text: None,
                };
            }
        }
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                let upper = c.to_ascii_uppercase();
                let (code, key_code) = if c.is_ascii_alphabetic() {
                    (format!("Key{upper}"), upper as i64)
                } else if c.is_ascii_digit() {
                    (format!("Digit{c}"), c as i64)
                } else {
                    (String::new(), 0)
                };
                KeyDef { key: c.to_string(), code, key_code, text: Some(c.to_string()) }
            }
            _ => KeyDef { key: name.into(), code: name.into(), key_code: 0, text: None },
        }
    }
}

#[async_trait]
impl InputSurface for Browser {
    async fn move_pointer(&self, to: Point) -> Result<(), CuaError> {
        self.move_mouse(to).await.map_err(CuaError::transport)
    }

    async fn press_button(&self, button: MouseButton, click_count: u32) -> Result<(), CuaError> {
        let count = i64::from(click_count);
        self.mouse_event(DispatchMouseEventType::MousePressed, Some(button), count, None)
            .await
            .map_err(CuaError::transport)
    }

    async fn release_button(&self, button: MouseButton, click_count: u32) -> Result<(), CuaError> {
        let count = i64::from(click_count);
        self.mouse_event(DispatchMouseEventType::MouseReleased, Some(button), count, None)
            .await
            .map_err(CuaError::transport)
    }

    async fn wheel(&self, delta_x: i64, delta_y: i64) -> Result<(), CuaError> {
        self.mouse_event(DispatchMouseEventType::MouseWheel, None, 0, Some((delta_x, delta_y)))
            .await
            .map_err(CuaError::transport)
    }

    async fn type_text(&self, text: &str) -> Result<(), CuaError> {
        Browser::type_text(self, text).await.map_err(CuaError::transport)
    }

    async fn press_key(&self, key: &str) -> Result<(), CuaError> {
        self.keypress(key).await.map_err(CuaError::transport)
    }

    async fn capture(&self) -> Result<Vec<u8>, CuaError> {
        self.screenshot_png().await.map_err(CuaError::transport)
    }

    async fn close(&self) -> Result<(), CuaError> {
        self.shutdown().await.map_err(CuaError::transport)
    }
}

#[derive(Clone, Debug)]
enum LaunchMode {
    Spawn,
    Connect(String),
}

/// Launches one Chromium per web session, or attaches to a remote one when
/// built with [`ChromiumLauncher::connect`].
#[derive(Clone, Debug)]
pub struct ChromiumLauncher {
    mode: LaunchMode,
    user_agent: Option<String>,
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self::spawn()
    }
}

impl ChromiumLauncher {
    pub fn spawn() -> Self {
        Self { mode: LaunchMode::Spawn, user_agent: None }
    }

    pub fn connect(ws_url: impl Into<String>) -> Self {
        Self { mode: LaunchMode::Connect(ws_url.into()), user_agent: None }
    }

    /// `CHROME_WS_URL` when set and non-empty, a local launch otherwise.
    pub fn from_env() -> Self {
        match std::env::var("CHROME_WS_URL") {
            Ok(ws) if !ws.trim().is_empty() => Self::connect(ws.trim()),
            _ => Self::spawn(),
        }
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }
}

#[async_trait]
impl SurfaceLauncher for ChromiumLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedSurface, CuaError> {
        let cfg = BrowserConfig {
            headless: spec.headless,
            user_agent: self.user_agent.clone(),
            viewport: spec.viewport,
            blocked_domains: spec.blocked_domains.clone(),
        };
        let browser = match &self.mode {
            LaunchMode::Spawn => Browser::launch(cfg).await,
            LaunchMode::Connect(ws) => Browser::connect(ws, cfg).await,
        }
        .map_err(CuaError::transport)?;
        info!(
            headless = spec.headless,
            width = spec.viewport.width,
            height = spec.viewport.height,
            "chromium surface ready"
        );
        Ok(LaunchedSurface { surface: Arc::new(browser), stream_url: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_carry_code_and_text() {
        let def = KeyDef::of("a");
        assert_eq!(def.code, "KeyA");
        assert_eq!(def.key_code, 65);
        assert_eq!(def.text.as_deref(), Some("a"));
    }

    #[test]
    fn named_keys_have_virtual_codes() {
        assert_eq!(KeyDef::of("Enter").key_code, 13);
        assert_eq!(KeyDef::of("F5").key_code, 116);
        assert_eq!(KeyDef::of("Space").key, " ");
        assert_eq!(KeyDef::of("/").text.as_deref(), Some("/"));
        assert_eq!(KeyDef::of("MediaPlayPause").key_code, 0);
    }

    #[test]
    fn chords_keep_the_plus_key() {
        assert_eq!(split_chord("Meta+a"), vec!["Meta", "a"]);
        assert_eq!(split_chord("Shift++"), vec!["Shift", "+"]);
        assert_eq!(split_chord("Meta+Shift++"), vec!["Meta", "Shift", "+"]);
        assert_eq!(split_chord("+"), vec!["+"]);
        assert_eq!(split_chord("Enter"), vec!["Enter"]);
        assert!(split_chord("").is_empty());
        assert_eq!(KeyDef::of("+").text.as_deref(), Some("+"));
    }

    #[test]
    fn plan_for_plus_chord_splits_back_into_its_keys() {
        let planned = crate::keys::plan_key_presses(&["ctrl", "+"]);
        assert_eq!(planned, vec!["Meta++".to_string()]);
        assert_eq!(split_chord(&planned[0]), vec!["Meta", "+"]);
    }

    #[test]
    fn modifier_bits_match_cdp() {
        assert_eq!(modifier_bit("Meta") | modifier_bit("Shift"), 12);
        assert_eq!(modifier_bit("a"), 0);
    }
}
