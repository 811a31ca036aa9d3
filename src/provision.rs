use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::config::Settings;
use crate::error::CuaError;
use crate::session::{SessionKind, SessionOptions, SessionProvider};

/// Domains every web session refuses to load.
pub const BLOCKED_DOMAINS: &[&str] = &[
    "maliciousbook.com",
    "evilvideos.com",
    "darkwebforum.com",
    "shadytok.com",
    "suspiciouspins.com",
    "ilanbigio.com",
];

/// [`BLOCKED_DOMAINS`] as bare fragments, scheme and `www.` stripped.
pub fn blocked_domain_fragments() -> Vec<String> {
    BLOCKED_DOMAINS
        .iter()
        .map(|d| d.replace("https://", "").replace("www.", ""))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub instance_id: String,
    pub stream_url: String,
}

/// Non-positive hours mean "no timeout"; hours too large for a
/// [`Duration`] are a config error.
fn idle_timeout_from_hours(hours: f64) -> Result<Option<Duration>, CuaError> {
    if hours.is_nan() || hours <= 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(hours * 3600.0)
        .map(Some)
        .map_err(|e| CuaError::Config(format!("timeout_hours {hours} out of range: {e}")))
}

/// Provision the session a run will act on.
///
/// Returns `None` when the run already has an instance. `ubuntu` and
/// `windows` are rejected by the provider; unknown environments fail with
/// [`CuaError::InvalidEnvironment`].
pub async fn create_vm_instance<P>(
    provider: &P,
    settings: &Settings,
    existing_instance_id: Option<&str>,
) -> Result<Option<InstanceHandle>, CuaError>
where
    P: SessionProvider + ?Sized,
{
    if existing_instance_id.is_some() {
        return Ok(None);
    }
    let kind: SessionKind = settings.environment.parse()?;
    let idle_timeout = match settings.timeout_hours {
        Some(h) => idle_timeout_from_hours(h)?,
        None => None,
    };
    let blocked_domains = match kind {
        SessionKind::Web => blocked_domain_fragments(),
        SessionKind::Ubuntu | SessionKind::Windows => Vec::new(),
    };
    let options = SessionOptions { idle_timeout, blocked_domains, headless: settings.headless };
    let session = provider.provision(kind, options).await?;
    let stream = provider.stream_info(&session);
    info!(instance_id = %stream.instance_id, stream_url = %stream.stream_url, "instance created");
    Ok(Some(InstanceHandle { instance_id: stream.instance_id, stream_url: stream.stream_url }))
}
