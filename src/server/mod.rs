//! Game-server process management.
//!
//! - [`process`] — low-level child launch (`java -jar server.jar nogui`,
//!   piped stdio) and `ram.txt` parsing.
//! - [`supervisor`] — the lifecycle state machine owning the child handle.

pub mod process;
pub mod supervisor;
