pub mod action;
pub mod browser;
pub mod config;
pub mod error;
pub mod executor;
pub mod keys;
pub mod provision;
pub mod reconstruct;
pub mod render;
pub mod report;
pub mod session;
pub mod surface;

pub use action::{ActionKind, ActionRequest, MouseButton, Point};
pub use browser::{Browser, BrowserConfig, ChromiumLauncher};
pub use config::{ConfigurationSource, EnvConfiguration, Settings};
pub use error::CuaError;
pub use executor::{execute, execute_recorded, execute_value, ActionOutcome};
pub use provision::{create_vm_instance, InstanceHandle};
pub use report::{ActionRecord, ActionStatus, Report, ReportGenerator, SharedReportGenerator};
pub use session::{
    Session, SessionKind, SessionManager, SessionOptions, SessionProvider, StreamInfo,
};
pub use surface::{InputSurface, Viewport};
