//! term-session - terminal session backend for agent runtimes
//!
//! This library owns the processes that host interactive CLI agents. A
//! [`SessionBackend`] can spawn named, detached terminal sessions, inject
//! keystrokes into them, and capture their rendered output without ever
//! blocking the caller for long.
//!
//! Three implementations are provided:
//!
//! - [`TmuxBackend`] drives the host `tmux` server; sessions survive the
//!   parent process and can be attached to by a human.
//! - [`PtyBackend`] owns pseudo-terminals directly via `portable-pty`; no
//!   external multiplexer is required.
//! - [`InMemoryBackend`] replays scripted pane frames for tests.
//!
//! The trait is the contract: probing operations (`has_session`,
//! `capture_pane`, `kill_session`) never fail on a missing session, so
//! callers can poll cheaply.

pub mod backend;
pub mod memory;
pub mod pty;
pub mod tmux;

pub use backend::{BackendError, BackendResult, SessionBackend, SessionSpec};
pub use memory::InMemoryBackend;
pub use pty::PtyBackend;
pub use tmux::{TmuxBackend, TmuxBackendConfig};
