use async_trait::async_trait;
use chrono::{DateTime, Local};
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::ActionRequest;
use crate::error::CuaError;
use crate::executor::{self, ActionOutcome};
use crate::surface::{InputSurface, Viewport};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// A browser page driven over CDP.
    Web,
    Ubuntu,
    Windows,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Web => "web",
            SessionKind::Ubuntu => "ubuntu",
            SessionKind::Windows => "windows",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = CuaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" => Ok(SessionKind::Web),
            "ubuntu" => Ok(SessionKind::Ubuntu),
            "windows" => Ok(SessionKind::Windows),
            _ => Err(CuaError::InvalidEnvironment(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub idle_timeout: Option<Duration>,
    /// Requests whose URL contains any of these fragments are aborted.
    pub blocked_domains: Vec<String>,
    pub headless: bool,
}

/// Plain substring containment, no hostname parsing.
pub fn is_blocked(url: &str, blocked_domains: &[String]) -> bool {
    blocked_domains.iter().any(|d| !d.is_empty() && url.contains(d.as_str()))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub instance_id: String,
    pub stream_url: String,
}

/// What a launcher needs to bring up one surface.
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub viewport: Viewport,
    pub headless: bool,
    pub blocked_domains: Vec<String>,
}

pub struct LaunchedSurface {
    pub surface: Arc<dyn InputSurface>,
    /// Remote viewing URL, when the backend offers one.
    pub stream_url: Option<String>,
}

/// Starts backend surfaces for web sessions.
#[async_trait]
pub trait SurfaceLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedSurface, CuaError>;
}

/// One live interactive context.
///
/// Actions go through [`Session::execute`], which holds a per-session gate
/// for the action and its capture so callers sharing a session are served
/// one at a time. Closing a session while an action is in flight is the
/// caller's problem.
pub struct Session {
    id: String,
    kind: SessionKind,
    viewport: Viewport,
    created_at: DateTime<Local>,
    stream_url: Option<String>,
    idle_timeout: Option<Duration>,
    surface: Arc<dyn InputSurface>,
    gate: Mutex<()>,
    clock: Instant,
    last_activity_ms: AtomicU64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("viewport", &self.viewport)
            .field("created_at", &self.created_at)
            .field("stream_url", &self.stream_url)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(
        id: String,
        kind: SessionKind,
        viewport: Viewport,
        launched: LaunchedSurface,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            kind,
            viewport,
            created_at: Local::now(),
            stream_url: launched.stream_url,
            idle_timeout,
            surface: launched.surface,
            gate: Mutex::new(()),
            clock: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn surface(&self) -> &dyn InputSurface {
        self.surface.as_ref()
    }

    pub async fn execute(&self, request: &ActionRequest) -> Result<ActionOutcome, CuaError> {
        let _turn = self.gate.lock().await;
        self.touch();
        let out = executor::execute(self.surface.as_ref(), request).await;
        self.touch();
        out
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.clock.elapsed().saturating_sub(last)
    }

    fn is_expired(&self) -> bool {
        self.idle_timeout.is_some_and(|t| self.idle_for() > t)
    }

    fn touch(&self) {
        let ms = u64::try_from(self.clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_activity_ms.store(ms, Ordering::Relaxed);
    }
}

/// Capability interface over session backends.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn provision(
        &self,
        kind: SessionKind,
        options: SessionOptions,
    ) -> Result<Arc<Session>, CuaError>;
    async fn get(&self, instance_id: &str) -> Result<Arc<Session>, CuaError>;
    fn stream_info(&self, session: &Session) -> StreamInfo;
    /// Release a session. Closing the same id twice fails with
    /// [`CuaError::SessionNotFound`].
    async fn close(&self, instance_id: &str) -> Result<(), CuaError>;
}

/// Registry of live sessions backed by a [`SurfaceLauncher`].
///
/// Browser engines are expensive to start, so build one manager per process
/// and pass it to whoever needs sessions.
pub struct SessionManager<L> {
    launcher: L,
    viewport: Viewport,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl<L: SurfaceLauncher> SessionManager<L> {
    pub fn new(launcher: L) -> Self {
        Self::with_viewport(launcher, Viewport::default())
    }

    pub fn with_viewport(launcher: L, viewport: Viewport) -> Self {
        Self { launcher, viewport, sessions: RwLock::new(HashMap::new()) }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Close every session that has been idle longer than its timeout.
    /// Returns the ids that were closed.
    pub async fn reap_idle(&self) -> Vec<String> {
        let expired: Vec<String> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_expired())
            .map(|s| s.id.clone())
            .collect();
        let mut closed = Vec::with_capacity(expired.len());
        for id in expired {
            match self.close(&id).await {
                Ok(()) => {
                    info!(instance_id = %id, "closed idle session");
                    closed.push(id);
                }
                Err(CuaError::SessionNotFound(_)) => {}
                Err(e) => {
                    warn!(instance_id = %id, error = %e, "failed to close idle session");
                    closed.push(id);
                }
            }
        }
        closed
    }

    async fn fresh_id(&self) -> String {
        let sessions = self.sessions.read().await;
        loop {
            let id = nanoid!();
            if !sessions.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Run [`SessionManager::reap_idle`] every `every` until the task is aborted.
pub fn spawn_idle_reaper<L>(manager: Arc<SessionManager<L>>, every: Duration) -> JoinHandle<()>
where
    L: SurfaceLauncher + 'static,
{
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            let closed = manager.reap_idle().await;
            if !closed.is_empty() {
                debug!(count = closed.len(), "idle reaper pass");
            }
        }
    })
}

#[async_trait]
impl<L: SurfaceLauncher> SessionProvider for SessionManager<L> {
    async fn provision(
        &self,
        kind: SessionKind,
        options: SessionOptions,
    ) -> Result<Arc<Session>, CuaError> {
        if kind != SessionKind::Web {
            return Err(CuaError::UnsupportedSessionKind { kind: kind.to_string() });
        }
        let spec = LaunchSpec {
            viewport: self.viewport,
            headless: options.headless,
            blocked_domains: options.blocked_domains,
        };
        let launched = self.launcher.launch(&spec).await?;
        let id = self.fresh_id().await;
        let session = Arc::new(Session::new(
            id.clone(),
            kind,
            self.viewport,
            launched,
            options.idle_timeout,
        ));
        self.sessions.write().await.insert(id.clone(), session.clone());
        info!(
            instance_id = %id,
            kind = %kind,
            blocked = spec.blocked_domains.len(),
            "session provisioned"
        );
        Ok(session)
    }

    async fn get(&self, instance_id: &str) -> Result<Arc<Session>, CuaError> {
        self.sessions
            .read()
            .await
            .get(instance_id)
            .cloned()
            .ok_or_else(|| CuaError::SessionNotFound(instance_id.to_string()))
    }

    fn stream_info(&self, session: &Session) -> StreamInfo {
        let stream_url = session
            .stream_url
            .clone()
            .unwrap_or_else(|| format!("local://browser/{}", session.id));
        StreamInfo { instance_id: session.id.clone(), stream_url }
    }

    async fn close(&self, instance_id: &str) -> Result<(), CuaError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(instance_id)
            .ok_or_else(|| CuaError::SessionNotFound(instance_id.to_string()))?;
        session.surface.close().await?;
        info!(instance_id, "session closed");
        Ok(())
    }
}
