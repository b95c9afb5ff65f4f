//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → socket bindings → workers → buffer pools
//!     → servers → hosts → listeners → process state Running
//!     (process_state.rs opens every host gate.rs)
//!
//! Shutdown (startup.rs, shutdown.rs):
//!     Signal received (signals.rs) → suspend.rs (hosts answer 503)
//!     → shutdown guard → stop listeners → hosts → servers
//! ```
//!
//! # Design Decisions
//! - Ordered startup: listeners start last (traffic only when ready)
//! - Ordered shutdown: exact reverse of startup
//! - Suspend has a timeout: shutdown proceeds after the deadline

pub mod gate;
pub mod process_state;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod suspend;

pub use process_state::{ProcessState, ProcessStateNotifier};
pub use shutdown::Shutdown;
pub use startup::{Bootstrap, StartupError};
pub use suspend::SuspendController;
