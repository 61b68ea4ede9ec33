//! Terminal sessions spawned on behalf of the agent.

pub mod command;
pub mod manager;
pub mod session;

pub use command::{plan_invocation, Invocation};
pub use manager::{CreateTerminal, TerminalManager};
pub use session::{ExitInfo, OutputSnapshot, ReleasedTerminal, RollingBuffer};
