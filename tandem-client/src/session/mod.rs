mod match_session;
mod session_command;
mod session_error;
mod session_handle;
mod session_snapshot;

pub use match_session::*;
pub use session_command::*;
pub use session_error::*;
pub use session_handle::*;
pub use session_snapshot::*;
