//! Room session controller for a collaborative math workspace.
//!
//! A [`session::Session`] is one participant's live view of a room: it keeps
//! a replica of room state, arbitrates who holds control, monitors the
//! connection, drives reference display, and captures view snapshots.
//! [`runtime::run_session`] drives it over a [`transport::Transport`].

pub mod config;
pub mod control;
pub mod frame;
pub mod heartbeat;
pub mod layout;
pub mod log;
pub mod model;
pub mod persistence;
pub mod reference;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod transport;
