//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `session`: per-client session state and the push channel fan-in
//! - `monitor`: the three per-client monitor tasks
//! - `supervisor`: session registry and monitor lifecycle

/// The three per-client monitor tasks.
pub mod monitor;

/// Per-client session state and the push channel.
pub mod session;

/// Session registry and monitor lifecycle.
pub mod supervisor;

pub use monitor::{MonitorContext, MonitorSettings};
pub use session::{ClientSession, SessionChannel, SessionState, SharedSessionState};
pub use supervisor::{SessionHandle, SessionSupervisor, StartMonitoringError, SupervisorStatus};
