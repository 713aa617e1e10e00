//! Event loop and cross-thread invocation.
//!
//! See `pipewire/client/loop.c` for the original this module is ported
//! from: an `epoll`-driven dispatcher plus a ring buffer that lets other
//! threads hand callbacks to the loop's own thread without blocking.

// epoll/eventfd/timerfd/signalfd are Linux-specific, not generic POSIX --
// macOS/BSD use kqueue instead, which is a distinct enough API that this
// core does not attempt to abstract over it (matching the original,
// which is also Linux-only).
#[cfg(target_os = "linux")]
mod event_loop;
mod ring;
mod source;

#[cfg(target_os = "linux")]
pub use event_loop::{Loop, LoopInvoker};
pub use ring::{InvokeFunc, InvokeRecord, RingInvoker, DEFAULT_CAPACITY, INVALID_SEQ};
pub use source::{IoFlags, SourceId};
