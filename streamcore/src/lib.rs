//! streamcore: event loop, node/port/link graph, and scheduler core for
//! a media-streaming daemon.
//!
//! Three subsystems, mirroring the daemon this core drives:
//! - an event loop with cross-thread invocation ([`loop_`])
//! - a node/port/link object model with format and buffer negotiation
//!   ([`node`], [`port`], [`link`])
//! - a graph scheduler with an auto-linking policy ([`scheduler`],
//!   [`autolink`])
//!
//! [`core`] wires all of the above into the aggregate a daemon process
//! actually owns; [`registry`] is the authoritative list of Globals
//! shared across them.

pub mod autolink;
pub mod clock;
pub mod core;
pub mod error;
pub mod format;
pub mod link;
pub mod loop_;
pub mod node;
pub mod port;
pub mod properties;
pub mod registry;
pub mod scheduler;
pub mod work_queue;

pub use error::{Error, Outcome, Result};
