//! Source kinds registered with a [`crate::loop_::Loop`].
//!
//! Grounded on `pipewire/client/loop.c`: each kind wraps exactly one
//! Linux readiness-fd primitive (`eventfd`, `timerfd`, `signalfd`) or an
//! arbitrary caller-owned fd for `Io`. `Idle` has no fd of its own in the
//! original (it piggybacks on an always-armed eventfd that the loop reads
//! and immediately rewrites when idle is enabled) and is modeled the
//! same way here.

use std::os::unix::io::RawFd;

/// Readiness mask delivered to a callback, matching `epoll` event bits
/// the original checks after `epoll_wait` (`EPOLLIN`/`EPOLLOUT`/
/// `EPOLLHUP`/`EPOLLERR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoFlags {
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
    pub error: bool,
}

impl IoFlags {
    /// True if any bit is set. A freshly cleared mask (all `false`) is
    /// what a sibling callback produces to suppress this round's dispatch.
    pub fn is_ready(&self) -> bool {
        self.readable || self.writable || self.hangup || self.error
    }
}

/// Stable identifier for a registered source, used by
/// `update_source`/`remove_source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

pub type IoCallback = Box<dyn FnMut(RawFd, IoFlags) + Send>;
pub type TimerCallback = Box<dyn FnMut(u64) + Send>;
pub type EventCallback = Box<dyn FnMut(u64) + Send>;
pub type SignalCallback = Box<dyn FnMut(i32) + Send>;
pub type IdleCallback = Box<dyn FnMut() + Send>;

/// What a [`SourceId`] resolves to: I/O, Timer, Event, Signal, or Idle.
pub(crate) enum SourceKind {
    Io {
        fd: RawFd,
        mask: IoFlags,
        rmask: IoFlags,
        callback: IoCallback,
    },
    Timer {
        fd: RawFd,
        rmask: IoFlags,
        callback: TimerCallback,
    },
    Event {
        fd: RawFd,
        rmask: IoFlags,
        callback: EventCallback,
    },
    Signal {
        fd: RawFd,
        signum: i32,
        rmask: IoFlags,
        callback: SignalCallback,
    },
    Idle {
        enabled: bool,
        callback: IdleCallback,
    },
}

impl SourceKind {
    pub(crate) fn fd(&self) -> Option<RawFd> {
        match self {
            SourceKind::Io { fd, .. } => Some(*fd),
            SourceKind::Timer { fd, .. } => Some(*fd),
            SourceKind::Event { fd, .. } => Some(*fd),
            SourceKind::Signal { fd, .. } => Some(*fd),
            SourceKind::Idle { .. } => None,
        }
    }

    /// The readiness mask pass 1 set for this round, or all-`false` if
    /// pass 1 hasn't run yet or a sibling callback already cleared it.
    pub(crate) fn rmask(&self) -> IoFlags {
        match self {
            SourceKind::Io { rmask, .. } => *rmask,
            SourceKind::Timer { rmask, .. } => *rmask,
            SourceKind::Event { rmask, .. } => *rmask,
            SourceKind::Signal { rmask, .. } => *rmask,
            SourceKind::Idle { .. } => IoFlags::default(),
        }
    }

    /// Pass 1 calls this once per triggered fd, before any callback runs.
    pub(crate) fn set_rmask(&mut self, new_mask: IoFlags) {
        match self {
            SourceKind::Io { rmask, .. } => *rmask = new_mask,
            SourceKind::Timer { rmask, .. } => *rmask = new_mask,
            SourceKind::Event { rmask, .. } => *rmask = new_mask,
            SourceKind::Signal { rmask, .. } => *rmask = new_mask,
            SourceKind::Idle { .. } => {}
        }
    }

    /// A callback manages a sibling source (e.g. one multiplexed fd
    /// fanning out to several logical sources) clears its mask through
    /// this to suppress that sibling's dispatch later in the same round.
    pub(crate) fn clear_rmask(&mut self) {
        self.set_rmask(IoFlags::default());
    }
}
