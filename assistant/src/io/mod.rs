//! I/O for assistant commands: settings, sessions, processes and the backend.

pub mod connection;
pub mod context;
pub mod executor;
pub mod gate;
pub mod init;
pub mod process;
pub mod prompt;
pub mod session_store;
pub mod settings;
pub mod transport;
pub mod watch;
