//! The event loop: readiness-driven dispatcher over `epoll`, with
//! `eventfd`/`timerfd`/`signalfd`-backed source kinds and a cross-thread
//! `invoke()` built on [`RingInvoker`].
//!
//! Grounded on `pipewire/client/loop.c`. The dispatch algorithm is the
//! original's two-pass design: `epoll_wait` fills a fixed array of
//! triggered events, and *all* of those are recorded before a single
//! callback runs — a callback that calls `remove_source`/`add_source`
//! mid-dispatch can't corrupt the batch currently being delivered,
//! because the batch was already captured as a list of ids before any
//! callback ran.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Outcome, Result};
use crate::loop_::ring::{InvokeFunc, RingInvoker, INVALID_SEQ};
use crate::loop_::source::{IoCallback, IoFlags, SourceId, SourceKind};

const MAX_EVENTS: usize = 64;

/// An event loop bound to the thread that calls [`Loop::run`]/
/// [`Loop::iterate`]. Not `Sync`: cross-thread callers use
/// [`Loop::invoker`] to obtain a [`LoopInvoker`] handle instead of
/// touching the Loop directly — only the owning thread may call
/// non-`invoke` methods.
pub struct Loop {
    epoll_fd: RawFd,
    wakeup_fd: RawFd,
    sources: HashMap<SourceId, SourceKind>,
    next_id: u64,
    ring: Arc<RingInvoker>,
    owner_thread: Arc<Mutex<Option<ThreadId>>>,
    running: Arc<AtomicBool>,
    enter_depth: u32,
    before_iterate_listeners: Vec<Box<dyn FnMut()>>,
    pre_hook: Option<Box<dyn FnMut()>>,
    post_hook: Option<Box<dyn FnMut()>>,
}

/// A cheap, `Clone`+`Send`+`Sync` handle other threads use to queue work
/// onto a [`Loop`] via `invoke`, obtained with [`Loop::invoker`] before
/// the owning thread starts running it. Combines the byte-ring
/// ([`RingInvoker`]) with the loop's wakeup `eventfd` and a shared record
/// of which thread currently owns the loop, so a call happening to run on
/// the loop's own thread (e.g. a callback re-entering `invoke`) still
/// takes the synchronous fast path instead of queueing a wakeup to
/// itself.
#[derive(Clone)]
pub struct LoopInvoker {
    ring: Arc<RingInvoker>,
    wakeup_fd: RawFd,
    owner_thread: Arc<Mutex<Option<ThreadId>>>,
}

impl LoopInvoker {
    /// Schedule `func` to run on the loop thread.
    ///
    /// `seq` is `INVALID_SEQ` for fire-and-forget, or a sequence id the
    /// caller already allocated from its own `WorkQueue` and wants
    /// echoed back through a later completion. If the calling thread is
    /// the loop's current owner, `func` runs immediately and
    /// synchronously — its side effects are visible to the caller
    /// before `invoke` returns. Otherwise the record is copied into the
    /// ring and the loop's wakeup `eventfd` is bumped so the owning
    /// thread's next `iterate()` drains it.
    pub fn invoke(&self, func: InvokeFunc, seq: u32, data: &[u8], user: u64) -> Result<Outcome> {
        let on_owner_thread = *self.owner_thread.lock() == Some(thread::current().id());
        if on_owner_thread {
            func(seq, data, user);
        } else {
            self.ring.push(func, seq, data, user)?;
            write_u64(self.wakeup_fd, 1)?;
        }
        Ok(if seq == INVALID_SEQ { Outcome::Ok } else { Outcome::Async(seq) })
    }
}

impl Loop {
    pub fn new() -> Result<Self> {
        let epoll_fd = checked_fd(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        let wakeup_fd = checked_fd(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })?;

        let mut this = Self {
            epoll_fd,
            wakeup_fd,
            sources: HashMap::new(),
            next_id: 0,
            ring: Arc::new(RingInvoker::new()),
            owner_thread: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            enter_depth: 0,
            before_iterate_listeners: Vec::new(),
            pre_hook: None,
            post_hook: None,
        };
        this.epoll_add(wakeup_fd, IoFlags { readable: true, ..Default::default() })?;
        Ok(this)
    }

    fn alloc_id(&mut self) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        id
    }

    fn epoll_add(&self, fd: RawFd, mask: IoFlags) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: io_flags_to_epoll(mask),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if rc < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn epoll_mod(&self, fd: RawFd, mask: IoFlags) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: io_flags_to_epoll(mask),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_MOD, fd, &mut ev) };
        if rc < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn epoll_del(&self, fd: RawFd) -> Result<()> {
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Register an arbitrary caller-owned fd.
    pub fn add_io(&mut self, fd: RawFd, mask: IoFlags, callback: IoCallback) -> Result<SourceId> {
        let id = self.alloc_id();
        self.epoll_add(fd, mask)?;
        self.sources.insert(id, SourceKind::Io { fd, mask, rmask: IoFlags::default(), callback });
        Ok(id)
    }

    /// Change the readiness mask of a registered `Io` source.
    pub fn update_source(&mut self, id: SourceId, mask: IoFlags) -> Result<()> {
        match self.sources.get_mut(&id) {
            Some(SourceKind::Io { fd, mask: current, .. }) => {
                *current = mask;
                self.epoll_mod(*fd, mask)
            }
            Some(_) => Err(Error::InvalidArguments("source is not an Io source".into())),
            None => Err(Error::InvalidArguments("unknown source id".into())),
        }
    }

    pub fn remove_source(&mut self, id: SourceId) -> Result<()> {
        let source = self
            .sources
            .remove(&id)
            .ok_or_else(|| Error::InvalidArguments("unknown source id".into()))?;
        if let Some(fd) = source.fd() {
            self.epoll_del(fd)?;
            unsafe {
                libc::close(fd);
            }
        }
        Ok(())
    }

    /// Create a timer source, initially disarmed.
    pub fn add_timer(&mut self, callback: crate::loop_::source::TimerCallback) -> Result<SourceId> {
        let fd = checked_fd(unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC)
        })?;
        let id = self.alloc_id();
        self.epoll_add(fd, IoFlags { readable: true, ..Default::default() })?;
        self.sources.insert(id, SourceKind::Timer { fd, rmask: IoFlags::default(), callback });
        Ok(id)
    }

    /// Arm/disarm/re-arm a timer. `value` of zero disarms it; `interval`
    /// of zero makes it one-shot. `absolute` interprets `value` as an
    /// absolute `CLOCK_MONOTONIC` deadline (`TFD_TIMER_ABSTIME`) rather
    /// than a relative delay from now.
    pub fn update_timer(&mut self, id: SourceId, value: Duration, interval: Duration, absolute: bool) -> Result<()> {
        let fd = match self.sources.get(&id) {
            Some(SourceKind::Timer { fd, .. }) => *fd,
            Some(_) => return Err(Error::InvalidArguments("source is not a Timer source".into())),
            None => return Err(Error::InvalidArguments("unknown source id".into())),
        };
        let spec = libc::itimerspec {
            it_interval: duration_to_timespec(interval),
            it_value: duration_to_timespec(value),
        };
        let flags = if absolute { libc::TFD_TIMER_ABSTIME } else { 0 };
        let rc = unsafe { libc::timerfd_settime(fd, flags, &spec, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Create an event source signaled by [`Loop::signal_event`] — used
    /// for cross-thread wakeups that
    /// don't carry a payload, as opposed to `invoke`.
    pub fn add_event(&mut self, callback: crate::loop_::source::EventCallback) -> Result<SourceId> {
        let fd = checked_fd(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })?;
        let id = self.alloc_id();
        self.epoll_add(fd, IoFlags { readable: true, ..Default::default() })?;
        self.sources.insert(id, SourceKind::Event { fd, rmask: IoFlags::default(), callback });
        Ok(id)
    }

    pub fn signal_event(&self, id: SourceId) -> Result<()> {
        let fd = match self.sources.get(&id) {
            Some(SourceKind::Event { fd, .. }) => *fd,
            Some(_) => return Err(Error::InvalidArguments("source is not an Event source".into())),
            None => return Err(Error::InvalidArguments("unknown source id".into())),
        };
        write_u64(fd, 1)
    }

    /// Register a signal source. Blocks `signum` in
    /// this thread's mask first, matching `loop_add_signal` exactly, so
    /// the signal is only ever observed through the fd, never as an
    /// async interrupt.
    pub fn add_signal(&mut self, signum: i32, callback: crate::loop_::source::SignalCallback) -> Result<SourceId> {
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, signum);
            if libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) != 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
            let fd = checked_fd(libc::signalfd(-1, &set, libc::SFD_NONBLOCK | libc::SFD_CLOEXEC))?;
            let id = self.alloc_id();
            self.epoll_add(fd, IoFlags { readable: true, ..Default::default() })?;
            self.sources.insert(id, SourceKind::Signal { fd, signum, rmask: IoFlags::default(), callback });
            Ok(id)
        }
    }

    /// Register an idle source. Idle sources run once per `iterate` pass
    /// while enabled, without needing a real readiness event, via the
    /// shared wakeup fd.
    pub fn add_idle(&mut self, callback: crate::loop_::source::IdleCallback) -> Result<SourceId> {
        let id = self.alloc_id();
        self.sources.insert(id, SourceKind::Idle { enabled: false, callback });
        Ok(id)
    }

    /// Idempotent per the resolved Open Question in DESIGN.md: enabling
    /// an already-enabled idle source (or disabling an already-disabled
    /// one) is a no-op.
    pub fn enable_idle(&mut self, id: SourceId, enabled: bool) -> Result<()> {
        match self.sources.get_mut(&id) {
            Some(SourceKind::Idle { enabled: current, .. }) => {
                *current = enabled;
                Ok(())
            }
            Some(_) => Err(Error::InvalidArguments("source is not an Idle source".into())),
            None => Err(Error::InvalidArguments("unknown source id".into())),
        }
    }

    /// A cheap, clonable handle other threads use to queue work onto
    /// this loop via `invoke`. Obtain this before spawning the
    /// thread that will call it — `Loop` itself is not `Sync`.
    pub fn invoker(&self) -> LoopInvoker {
        LoopInvoker {
            ring: Arc::clone(&self.ring),
            wakeup_fd: self.wakeup_fd,
            owner_thread: Arc::clone(&self.owner_thread),
        }
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Subscribe to the `before_iterate` signal emitted at the top of
    /// every `iterate()` pass, ahead of the pre-hook and the readiness
    /// wait. Multiple listeners may be registered; they run in
    /// registration order.
    pub fn add_before_iterate_listener(&mut self, listener: Box<dyn FnMut()>) {
        self.before_iterate_listeners.push(listener);
    }

    /// Install (or clear, with `None`) the single optional hook run right
    /// before the `epoll_wait` call each iteration.
    pub fn set_pre_hook(&mut self, hook: Option<Box<dyn FnMut()>>) {
        self.pre_hook = hook;
    }

    /// Install (or clear, with `None`) the single optional hook run right
    /// after `epoll_wait` returns, before any source is dispatched.
    pub fn set_post_hook(&mut self, hook: Option<Box<dyn FnMut()>>) {
        self.post_hook = hook;
    }

    /// Schedule `func` to run on this loop's thread.
    /// Since `Loop` is `!Sync`, the only thread that can ever hold `&self`
    /// here is the loop's own owning thread, so this call is always the
    /// synchronous, same-thread path: `func` runs before `invoke`
    /// returns, by construction. A
    /// caller on another thread that wants to reach this loop must go
    /// through [`Loop::invoker`] instead.
    pub fn invoke(&self, func: InvokeFunc, seq: u32, data: &[u8], user: u64) -> Result<Outcome> {
        func(seq, data, user);
        Ok(if seq == crate::loop_::ring::INVALID_SEQ {
            Outcome::Ok
        } else {
            Outcome::Async(seq)
        })
    }

    pub fn enter(&mut self) {
        if self.enter_depth == 0 {
            *self.owner_thread.lock() = Some(thread::current().id());
        }
        self.enter_depth += 1;
    }

    pub fn leave(&mut self) {
        self.enter_depth = self.enter_depth.saturating_sub(1);
        if self.enter_depth == 0 {
            *self.owner_thread.lock() = None;
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run until [`Loop::stop`] is called, polling with `timeout` as the
    /// per-iteration `epoll_wait` budget.
    pub fn run(&mut self, timeout: Duration) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            self.iterate(timeout)?;
        }
        Ok(())
    }

    /// Run a single dispatch pass. Steps 1-6 of the documented algorithm:
    /// emit `before_iterate`, run the pre-hook, `epoll_wait`, run the
    /// post-hook, then two passes over the triggered sources — the first
    /// sets each source's readiness mask before any callback runs, the
    /// second dispatches every source whose mask is still non-zero. That
    /// split lets a callback in pass 2 clear a sibling source's mask
    /// (e.g. one it manages as a unit with its own) and have that
    /// suppression take effect later in the same pass. Returns the
    /// number of callbacks invoked.
    pub fn iterate(&mut self, timeout: Duration) -> Result<usize> {
        self.enter();

        for listener in &mut self.before_iterate_listeners {
            listener();
        }
        if let Some(hook) = &mut self.pre_hook {
            hook();
        }

        let mut events: Vec<libc::epoll_event> = vec![unsafe { std::mem::zeroed() }; MAX_EVENTS];
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        let n = unsafe {
            libc::epoll_wait(self.epoll_fd, events.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms)
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            self.leave();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(Error::Io(err));
        }

        if let Some(hook) = &mut self.post_hook {
            hook();
        }

        // Pass 1: set every triggered source's readiness mask before any
        // callback runs. The wakeup fd isn't a registered Source -- its
        // own readiness is tracked locally instead.
        let mut wakeup_ready = false;
        let mut triggered_ids: Vec<SourceId> = Vec::with_capacity(n as usize);
        for ev in events.iter().take(n as usize) {
            let fd = ev.u64 as RawFd;
            if fd == self.wakeup_fd {
                wakeup_ready = true;
                continue;
            }
            let flags = epoll_to_io_flags(ev.events);
            if let Some(id) = self.find_source_by_fd(fd) {
                if let Some(source) = self.sources.get_mut(&id) {
                    source.set_rmask(flags);
                }
                triggered_ids.push(id);
            }
        }

        let mut dispatched = 0usize;

        if wakeup_ready {
            let _ = read_u64(self.wakeup_fd);
            self.drain_invocations();
        }

        // Pass 2: dispatch every source whose mask is still non-zero.
        for id in triggered_ids {
            let ready = self.sources.get(&id).is_some_and(|s| s.rmask().is_ready());
            if ready {
                dispatched += self.dispatch_source(id)?;
            }
        }

        dispatched += self.run_idle_sources();

        self.leave();
        Ok(dispatched)
    }

    fn find_source_by_fd(&self, fd: RawFd) -> Option<SourceId> {
        self.sources
            .iter()
            .find(|(_, kind)| kind.fd() == Some(fd))
            .map(|(id, _)| *id)
    }

    fn dispatch_source(&mut self, id: SourceId) -> Result<usize> {
        let rmask = match self.sources.get(&id) {
            Some(source) => source.rmask(),
            None => return Ok(0),
        };
        let result = match self.sources.get_mut(&id) {
            Some(SourceKind::Io { fd, callback, .. }) => {
                callback(*fd, rmask);
                1
            }
            Some(SourceKind::Timer { fd, callback, .. }) => {
                let fd = *fd;
                let expirations = read_u64(fd).unwrap_or(0);
                callback(expirations);
                1
            }
            Some(SourceKind::Event { fd, callback, .. }) => {
                let fd = *fd;
                let count = read_u64(fd).unwrap_or(0);
                callback(count);
                1
            }
            Some(SourceKind::Signal { fd, signum, callback, .. }) => {
                let fd = *fd;
                let signum = *signum;
                let _ = read_signalfd_siginfo(fd);
                callback(signum);
                1
            }
            Some(SourceKind::Idle { .. }) | None => 0,
        };
        if let Some(source) = self.sources.get_mut(&id) {
            source.clear_rmask();
        }
        Ok(result)
    }

    fn run_idle_sources(&mut self) -> usize {
        let ids: Vec<SourceId> = self
            .sources
            .iter()
            .filter_map(|(id, kind)| match kind {
                SourceKind::Idle { enabled: true, .. } => Some(*id),
                _ => None,
            })
            .collect();
        let mut ran = 0;
        for id in ids {
            if let Some(SourceKind::Idle { callback, .. }) = self.sources.get_mut(&id) {
                callback();
                ran += 1;
            }
        }
        ran
    }

    fn drain_invocations(&mut self) {
        while let Some(record) = self.ring.pop() {
            (record.func)(record.seq, &record.data, record.user);
        }
    }
}

impl Drop for Loop {
    fn drop(&mut self) {
        let fds: Vec<RawFd> = self.sources.values().filter_map(|s| s.fd()).collect();
        for fd in fds {
            unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
                libc::close(fd);
            }
        }
        unsafe {
            libc::close(self.wakeup_fd);
            libc::close(self.epoll_fd);
        }
    }
}

fn checked_fd(fd: RawFd) -> Result<RawFd> {
    if fd < 0 {
        Err(Error::Io(std::io::Error::last_os_error()))
    } else {
        Ok(fd)
    }
}

fn io_flags_to_epoll(mask: IoFlags) -> u32 {
    let mut bits = 0u32;
    if mask.readable {
        bits |= libc::EPOLLIN as u32;
    }
    if mask.writable {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}

fn epoll_to_io_flags(events: u32) -> IoFlags {
    IoFlags {
        readable: events & (libc::EPOLLIN as u32) != 0,
        writable: events & (libc::EPOLLOUT as u32) != 0,
        hangup: events & (libc::EPOLLHUP as u32) != 0,
        error: events & (libc::EPOLLERR as u32) != 0,
    }
}

fn duration_to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

fn write_u64(fd: RawFd, value: u64) -> Result<()> {
    let bytes = value.to_ne_bytes();
    let rc = unsafe { libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Ok(());
        }
        return Err(Error::Io(err));
    }
    Ok(())
}

fn read_u64(fd: RawFd) -> Result<u64> {
    let mut bytes = [0u8; 8];
    let rc = unsafe { libc::read(fd, bytes.as_mut_ptr() as *mut libc::c_void, bytes.len()) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Ok(0);
        }
        return Err(Error::Io(err));
    }
    Ok(u64::from_ne_bytes(bytes))
}

fn read_signalfd_siginfo(fd: RawFd) -> Result<()> {
    let mut info: libc::signalfd_siginfo = unsafe { std::mem::zeroed() };
    let size = std::mem::size_of::<libc::signalfd_siginfo>();
    let rc = unsafe { libc::read(fd, &mut info as *mut _ as *mut libc::c_void, size) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Ok(());
        }
        return Err(Error::Io(err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::{Mutex as StdMutex, OnceLock};

    /// S1 target buffer: `InvokeFunc` is a plain fn pointer with no
    /// closure capture (mirroring `spa_invoke_func_t`), so the "shared
    /// buffer" the scenario writes into is a static guarded by a plain
    /// `std::sync::Mutex` rather than anything the call site captures.
    static ECHO_TARGET: OnceLock<StdMutex<Vec<u8>>> = OnceLock::new();

    fn echo_into_target(_seq: u32, data: &[u8], _user: u64) -> i32 {
        *ECHO_TARGET.get_or_init(|| StdMutex::new(Vec::new())).lock().unwrap() = data.to_vec();
        0
    }

    #[test]
    fn invoke_on_owner_thread_is_synchronous() {
        // `Loop::invoke` can only ever be called while holding `&Loop`,
        // which only the owning thread can do (`Loop` is `!Sync`) -- so
        // this path is synchronous by construction.
        fn mark(_seq: u32, _data: &[u8], _user: u64) -> i32 {
            0
        }
        let ev_loop = Loop::new().unwrap();
        let outcome = ev_loop.invoke(mark, INVALID_SEQ, &[], 0).unwrap();
        assert_eq!(outcome, Outcome::Ok);
    }

    #[test]
    fn cross_thread_invoke_echoes_payload_and_completes() {
        // S1: thread T2 invokes with seq=7 and a 3-byte payload; T1
        // (this test's thread, which owns `ev_loop`) observes the echo
        // after one `iterate()` and the caller sees `Outcome::Async(7)`.
        let mut ev_loop = Loop::new().unwrap();
        let invoker = ev_loop.invoker();

        let outcome = std::thread::spawn(move || {
            invoker.invoke(echo_into_target, 7, &[0x01, 0x02, 0x03], 0).unwrap()
        })
        .join()
        .unwrap();
        assert_eq!(outcome, Outcome::Async(7));

        ev_loop.iterate(Duration::from_millis(100)).unwrap();

        let target = ECHO_TARGET.get_or_init(|| StdMutex::new(Vec::new()));
        assert_eq!(*target.lock().unwrap(), vec![0x01, 0x02, 0x03]);
    }

    static RECORDED_SEQS: OnceLock<StdMutex<Vec<u32>>> = OnceLock::new();

    fn record_seq(seq: u32, _data: &[u8], _user: u64) -> i32 {
        RECORDED_SEQS
            .get_or_init(|| StdMutex::new(Vec::new()))
            .lock()
            .unwrap()
            .push(seq);
        0
    }

    #[test]
    fn cross_thread_overflow_then_single_iterate_drains_fifo() {
        // S6: flood the ring from another thread without iterating.
        // Some invocations succeed, the rest fail `QueueFull`; one
        // `iterate()` on the owning thread then drains every accepted
        // entry in submission order.
        RECORDED_SEQS.get_or_init(|| StdMutex::new(Vec::new())).lock().unwrap().clear();

        let mut ev_loop = Loop::new().unwrap();
        let invoker = ev_loop.invoker();

        let accepted = std::thread::spawn(move || {
            let mut accepted = Vec::new();
            for seq in 0..10_000u32 {
                match invoker.invoke(record_seq, seq, &[0u8; 64], 0) {
                    Ok(_) => accepted.push(seq),
                    Err(Error::QueueFull) => break,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            accepted
        })
        .join()
        .unwrap();

        assert!(!accepted.is_empty());
        assert!(accepted.len() < 10_000, "flooding an unbounded ring defeats the point of this test");

        ev_loop.iterate(Duration::from_millis(100)).unwrap();

        let recorded = RECORDED_SEQS.get().unwrap().lock().unwrap().clone();
        assert_eq!(recorded, accepted);
    }

    #[test]
    fn event_source_fires_when_signaled() {
        let mut ev_loop = Loop::new().unwrap();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_cb = Arc::clone(&fired);
        let id = ev_loop
            .add_event(Box::new(move |_count| {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        ev_loop.signal_event(id).unwrap();
        ev_loop.iterate(Duration::from_millis(100)).unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn idle_source_runs_every_iteration_while_enabled() {
        let mut ev_loop = Loop::new().unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let count_cb = Arc::clone(&count);
        let id = ev_loop
            .add_idle(Box::new(move || {
                count_cb.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        ev_loop.enable_idle(id, true).unwrap();

        ev_loop.iterate(Duration::from_millis(10)).unwrap();
        ev_loop.iterate(Duration::from_millis(10)).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn enable_idle_is_idempotent() {
        let mut ev_loop = Loop::new().unwrap();
        let id = ev_loop.add_idle(Box::new(|| {})).unwrap();
        ev_loop.enable_idle(id, true).unwrap();
        ev_loop.enable_idle(id, true).unwrap();
        ev_loop.enable_idle(id, false).unwrap();
        ev_loop.enable_idle(id, false).unwrap();
    }

    #[test]
    fn removed_source_no_longer_dispatches() {
        // Property 1: after `remove_source`, `iterate()` must not
        // deliver that source's callback, even if its fd would
        // otherwise have gone ready.
        let mut ev_loop = Loop::new().unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let count_cb = Arc::clone(&count);
        let id = ev_loop
            .add_event(Box::new(move |_count| {
                count_cb.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        ev_loop.signal_event(id).unwrap();
        ev_loop.iterate(Duration::from_millis(10)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        ev_loop.remove_source(id).unwrap();
        assert!(ev_loop.signal_event(id).is_err(), "removed source id must no longer resolve");

        ev_loop.iterate(Duration::from_millis(10)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1, "removed source must not dispatch again");
    }

    #[test]
    fn timer_source_fires_after_interval() {
        let mut ev_loop = Loop::new().unwrap();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_cb = Arc::clone(&fired);
        let id = ev_loop
            .add_timer(Box::new(move |_expirations| {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        ev_loop
            .update_timer(id, Duration::from_millis(5), Duration::from_secs(0), false)
            .unwrap();

        ev_loop.iterate(Duration::from_millis(200)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
