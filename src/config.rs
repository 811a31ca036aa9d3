use serde::{Deserialize, Serialize};
use std::env;

use crate::error::CuaError;
use crate::surface::Viewport;

/// Upper bound for `CUA_TIMEOUT_HOURS`, one year.
pub const MAX_TIMEOUT_HOURS: f64 = 24.0 * 365.0;

/// Run settings handed to the provisioning step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub environment: String, // "web" | "ubuntu" | "windows"
    pub timeout_hours: Option<f64>,
    pub headless: bool,
    pub viewport: Viewport,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: "web".into(),
            timeout_hours: None,
            headless: false,
            viewport: Viewport::default(),
        }
    }
}

impl Settings {
    /// Defaults overridden by `CUA_ENVIRONMENT`, `CUA_TIMEOUT_HOURS`,
    /// `CUA_HEADLESS` and `CUA_VIEWPORT` (`<width>x<height>`).
    pub fn from_env() -> Result<Self, CuaError> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, CuaError> {
        let mut s = Settings::default();
        if let Some(v) = get("CUA_ENVIRONMENT").filter(|v| !v.trim().is_empty()) {
            s.environment = v.trim().to_string();
        }
        if let Some(v) = get("CUA_TIMEOUT_HOURS") {
            let hours: f64 = v
                .trim()
                .parse()
                .map_err(|_| CuaError::Config(format!("CUA_TIMEOUT_HOURS: not a number: {v:?}")))?;
            if !hours.is_finite() || hours <= 0.0 || hours > MAX_TIMEOUT_HOURS {
                return Err(CuaError::Config(format!(
                    "CUA_TIMEOUT_HOURS must be in (0, {MAX_TIMEOUT_HOURS}], got {hours}"
                )));
            }
            s.timeout_hours = Some(hours);
        }
        if let Some(v) = get("CUA_HEADLESS") {
            s.headless =
                matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = get("CUA_VIEWPORT") {
            s.viewport = parse_viewport(&v)?;
        }
        Ok(s)
    }
}

fn parse_viewport(v: &str) -> Result<Viewport, CuaError> {
    let bad = || CuaError::Config(format!("CUA_VIEWPORT: expected <width>x<height>, got {v:?}"));
    let (w, h) = v.trim().split_once(['x', 'X']).ok_or_else(bad)?;
    let width: u32 = w.trim().parse().map_err(|_| bad())?;
    let height: u32 = h.trim().parse().map_err(|_| bad())?;
    if width == 0 || height == 0 {
        return Err(bad());
    }
    Ok(Viewport { width, height })
}

/// Where provisioning reads its settings from. The orchestration layer owns
/// default resolution; this crate only consumes the result.
pub trait ConfigurationSource: Send + Sync {
    fn configuration_with_defaults(&self) -> Result<Settings, CuaError>;
}

impl ConfigurationSource for Settings {
    fn configuration_with_defaults(&self) -> Result<Settings, CuaError> {
        Ok(self.clone())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EnvConfiguration;

impl ConfigurationSource for EnvConfiguration {
    fn configuration_with_defaults(&self) -> Result<Settings, CuaError> {
        Settings::from_env()
    }
}
