pub mod config;
pub mod events;
pub mod parser;
pub mod patterns;
pub mod scheduler;
pub mod supervisor;

pub use events::{EventBus, EventKind, GameEvent};
pub use supervisor::command::CommandChannel;
pub use supervisor::error::{CommandError, StartError};
pub use supervisor::process::LaunchSpec;
pub use supervisor::state_machine::State;
pub use supervisor::{ServerHandle, Snapshot, Supervisor, SupervisorOptions};
