//! Cross-thread invocation ring.
//!
//! Grounded on `pipewire/client/loop.c`'s `loop_invoke`/`SpaRingbuffer`
//! pair: a fixed-capacity byte-accounted ring holds pending invocations
//! so a control thread can hand work to the Loop's data thread without
//! blocking on a full queue allocation. The original stores each
//! record's header and payload as a flat memcpy into a 32 KiB byte
//! array; a record that would straddle the end of the array is instead
//! placed at offset 0, and the skipped tail is recorded as a "hole" so
//! the single consumer knows to jump over it rather than read garbage.
//!
//! This port keeps the same offset/hole bookkeeping (so capacity
//! accounting and the wrap convention described in the data model match
//! the original exactly) but stores each record's payload as a `Vec<u8>`
//! behind the queue entry rather than as raw bytes inside one flat
//! allocation — the original's flat buffer exists to avoid a per-call
//! allocation in C; Rust's allocator makes that tradeoff unnecessary
//! without reintroducing unsafe transmutes of caller closures.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Default ring capacity, matching the original's `DATAS_SIZE` (4096 * 8).
pub const DEFAULT_CAPACITY: usize = 32 * 1024;

/// Per-record accounting overhead charged against capacity, standing in
/// for the original's record header (sequence id, user pointer, and
/// length fields).
const RECORD_HEADER: usize = 24;

/// Sentinel meaning "fire-and-forget": `invoke(callback, seq, ...)` with
/// `seq = INVALID` never produces a `WorkQueue`/`async_complete`
/// completion. Callers that want a completion allocate a real sequence
/// id from their own object's [`crate::work_queue::WorkQueue`] before
/// calling `invoke`.
pub const INVALID_SEQ: u32 = u32::MAX;

/// A pointer-sized, plain-data callback — mirroring the C API's
/// `spa_invoke_func_t` function pointer (not a capturing closure), which
/// is what makes the record byte-representable in the original. `user`
/// carries the original's opaque user-data pointer (here: any value the
/// caller chooses to stash and reinterpret, e.g. an index into a side
/// table it owns — this crate's pure-Rust ports never need unsafe
/// pointer casts to make use of it).
pub type InvokeFunc = fn(seq: u32, data: &[u8], user: u64) -> i32;

#[derive(Debug, Clone)]
pub struct InvokeRecord {
    pub seq: u32,
    pub func: InvokeFunc,
    pub data: Vec<u8>,
    pub user: u64,
}

enum Slot {
    Item(InvokeRecord),
    /// Dead zone skipped because the next record didn't fit before wrap.
    Hole,
}

struct Entry {
    size: usize,
    slot: Slot,
}

pub struct RingInvoker {
    inner: Mutex<Inner>,
}

struct Inner {
    capacity: usize,
    used: usize,
    write_offset: usize,
    read_offset: usize,
    entries: VecDeque<Entry>,
}

impl RingInvoker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity,
                used: 0,
                write_offset: 0,
                read_offset: 0,
                entries: VecDeque::new(),
            }),
        }
    }

    /// Queue a callback for the Loop's dispatch thread. `seq` is
    /// caller-assigned (`INVALID_SEQ` for fire-and-forget,
    /// otherwise a sequence the caller already tracks in its own
    /// `WorkQueue`); this ring never invents sequence ids, matching the
    /// original where `loop_invoke`'s seq is an in/out parameter the
    /// caller supplies. Multiple concurrent producers must serialize
    /// their own calls to this method (they may call it concurrently
    /// here — the mutex does that serialization for them).
    pub fn push(&self, func: InvokeFunc, seq: u32, data: &[u8], user: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let capacity = inner.capacity;
        if data.len() > capacity / 2 {
            return Err(Error::PayloadTooLarge(data.len()));
        }
        let size = RECORD_HEADER + data.len();

        let remaining_to_end = capacity - inner.write_offset;
        if size > remaining_to_end {
            if inner.used + remaining_to_end > capacity {
                return Err(Error::QueueFull);
            }
            if remaining_to_end > 0 {
                inner.entries.push_back(Entry {
                    size: remaining_to_end,
                    slot: Slot::Hole,
                });
                inner.used += remaining_to_end;
            }
            inner.write_offset = 0;
        }

        if inner.used + size > capacity {
            return Err(Error::QueueFull);
        }

        inner.entries.push_back(Entry {
            size,
            slot: Slot::Item(InvokeRecord {
                seq,
                func,
                data: data.to_vec(),
                user,
            }),
        });
        inner.write_offset = (inner.write_offset + size) % capacity.max(1);
        inner.used += size;

        Ok(())
    }

    /// Pop the next queued invocation, transparently skipping any holes
    /// left by a wrapped write. Called only from the Loop's dispatch
    /// thread (single consumer).
    pub fn pop(&self) -> Option<InvokeRecord> {
        let mut inner = self.inner.lock();
        loop {
            let entry = inner.entries.pop_front()?;
            let capacity = inner.capacity.max(1);
            inner.read_offset = (inner.read_offset + entry.size) % capacity;
            inner.used -= entry.size;
            match entry.slot {
                Slot::Hole => continue,
                Slot::Item(record) => return Some(record),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.entries.iter().all(|e| matches!(e.slot, Slot::Hole))
    }
}

impl Default for RingInvoker {
    fn default() -> Self {
        Self::new()
    }
}
