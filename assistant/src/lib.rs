//! Core of an editor-integrated coding assistant.
//!
//! The crate guards shell commands proposed by the model, keeps the backend
//! session and connection alive, and composes the system prompt from
//! prioritized modules. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (command matching, guard
//!   decisions, backoff, session merging, prompt composition). No I/O.
//! - **[`io`]**: Side-effecting operations (settings file, session
//!   persistence, process execution, HTTP transport, file watching).
//!
//! Orchestration modules ([`check`], [`execute`], [`connect`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod check;
pub mod connect;
pub mod core;
pub mod error;
pub mod execute;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
