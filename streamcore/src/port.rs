//! Port object model: format negotiation and buffer bookkeeping.
//!
//! A `Port` is one side of a potential `Link`: it advertises candidate
//! formats, accepts one negotiated format, and holds the buffer pool
//! used to move data once it's streaming. Buffer allocation for MEMFD /
//! DMABUF descriptors is an external collaborator (the shm pool); this
//! crate's own allocator only ever produces `MemPtr` blocks, so those two
//! variants round-trip as opaque metadata.

use crate::error::{Error, Outcome, Result};
use crate::format::{FormatSpec, MediaFormat};
use crate::properties::Properties;
use crate::work_queue::WorkQueue;

/// Raw file descriptor value carried in `DataBlock::MemFd`/`DmaBuf`
/// metadata. Kept as a bare `i32` rather than `std::os::unix::io::RawFd`
/// so this module stays portable; the descriptor is only ever opened,
/// mapped, and closed by the external shm-pool collaborator, never by
/// this crate.
pub type Fd = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Port lifecycle states: `Configure` accepts format proposals,
/// `Ready` has a negotiated format awaiting buffers, `Paused` has
/// buffers allocated but is not exchanging data, `Streaming` is
/// actively queuing/dequeuing buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Configure,
    Ready,
    Paused,
    Streaming,
    Error,
}

/// One memory descriptor backing a buffer's data plane. `MemFd`/`DmaBuf`
/// carry only metadata here — the external shm-pool collaborator owns
/// mapping them; `MemPtr` is backed by this crate's own allocator and
/// carries the bytes directly.
#[derive(Debug, Clone)]
pub enum DataBlock {
    MemFd { fd: Fd, offset: usize, size: usize },
    DmaBuf { fd: Fd, size: usize },
    MemPtr { data: Vec<u8> },
}

impl DataBlock {
    pub fn size(&self) -> usize {
        match self {
            DataBlock::MemFd { size, .. } => *size,
            DataBlock::DmaBuf { size, .. } => *size,
            DataBlock::MemPtr { data } => data.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferMeta {
    pub id: BufferId,
    pub stride: usize,
    pub block: DataBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferOwner {
    /// Held by this port, available to be filled/drained.
    Port,
    /// Handed to the peer side of the link.
    Peer,
}

struct Buffer {
    meta: BufferMeta,
    owner: BufferOwner,
}

pub struct Port {
    pub id: PortId,
    pub direction: Direction,
    pub properties: Properties,
    state: PortState,
    candidates: Vec<FormatSpec>,
    format: Option<MediaFormat>,
    buffers: Vec<Buffer>,
    queue: std::collections::VecDeque<usize>,
    pub work: WorkQueue,
}

impl Port {
    pub fn new(id: PortId, direction: Direction, candidates: Vec<FormatSpec>) -> Self {
        Self {
            id,
            direction,
            properties: Properties::new(),
            state: PortState::Configure,
            candidates,
            format: None,
            buffers: Vec::new(),
            queue: std::collections::VecDeque::new(),
            work: WorkQueue::new(),
        }
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn format(&self) -> Option<MediaFormat> {
        self.format
    }

    /// Restartable index-based candidate enumeration. `filter` narrows
    /// the returned format the same way a peer's accepted set narrows an
    /// output's produced set during negotiation.
    pub fn enum_formats(&self, index: usize, filter: Option<&FormatSpec>) -> Option<MediaFormat> {
        let spec = self.candidates.get(index)?;
        match filter {
            Some(f) => spec.intersect(f).ok().map(|merged| merged.resolve()),
            None => spec.enumerate(0),
        }
    }

    /// Accept a concrete negotiated format. Valid only from `Configure`;
    /// moves the port to `Ready`.
    pub fn set_format(&mut self, format: MediaFormat) -> Result<Outcome> {
        if self.state != PortState::Configure {
            return Err(Error::InvalidArguments(format!(
                "set_format requires Configure state, port is {:?}",
                self.state
            )));
        }
        self.format = Some(format);
        self.state = PortState::Ready;
        Ok(Outcome::Ok)
    }

    /// Allocate buffers for a negotiated format. Requires `Ready`; moves
    /// the port to `Paused`. Modeled as an async-capable operation the
    /// way a real MEMFD/DMABUF allocation round-trip through the
    /// shm-pool collaborator would be: this crate's own `MemPtr`
    /// allocator resolves it immediately, but the caller still receives
    /// an `Outcome::Async` seq and drains it through
    /// [`Port::drain_completions`].
    pub fn use_buffers(&mut self, count: usize, size_per_buffer: usize, stride: usize) -> Result<Outcome> {
        if self.state != PortState::Ready {
            return Err(Error::NoFormat);
        }
        if count == 0 {
            return Err(Error::InvalidArguments("buffer count must be > 0".into()));
        }
        self.buffers = (0..count)
            .map(|i| Buffer {
                meta: BufferMeta {
                    id: BufferId(i as u32),
                    stride,
                    block: DataBlock::MemPtr {
                        data: vec![0u8; size_per_buffer],
                    },
                },
                owner: BufferOwner::Port,
            })
            .collect();
        self.queue = (0..count).collect();
        self.state = PortState::Paused;
        let seq = self.work.submit();
        self.work.complete(seq);
        Ok(Outcome::Async(seq))
    }

    pub fn drain_completions(&mut self) -> Vec<u32> {
        self.work.drain_ready()
    }

    /// `set_format(flags, none)`: drop the negotiated format and
    /// buffers, returning the port to `Configure`. Fails if a buffer is
    /// still held by the peer side of the link (e.g. mid-transfer while
    /// streaming) — the caller (`Node::suspend`) surfaces that as the
    /// node going to `Error` instead of `Suspended`.
    pub fn clear_format(&mut self) -> Result<()> {
        if self.buffers.iter().any(|b| b.owner == BufferOwner::Peer) {
            return Err(Error::InvalidBufferId(
                "cannot clear format while a buffer is held by the peer".into(),
            ));
        }
        self.format = None;
        self.buffers.clear();
        self.queue.clear();
        self.state = PortState::Configure;
        Ok(())
    }

    pub fn start_streaming(&mut self) -> Result<()> {
        if self.state != PortState::Paused && self.state != PortState::Streaming {
            return Err(Error::InvalidArguments(format!(
                "start_streaming requires Paused state, port is {:?}",
                self.state
            )));
        }
        self.state = PortState::Streaming;
        Ok(())
    }

    pub fn stop_streaming(&mut self) -> Result<()> {
        if self.state == PortState::Streaming {
            self.state = PortState::Paused;
        }
        Ok(())
    }

    /// Hand a buffer to the peer (dequeue from this port's own pool).
    pub fn dequeue_buffer(&mut self) -> Result<Option<BufferId>> {
        if self.buffers.is_empty() {
            return Err(Error::NoBuffers);
        }
        let Some(slot) = self.queue.pop_front() else {
            return Ok(None);
        };
        self.buffers[slot].owner = BufferOwner::Peer;
        Ok(Some(self.buffers[slot].meta.id))
    }

    /// Return a buffer the peer is done with back into this port's
    /// available queue.
    pub fn queue_buffer(&mut self, id: BufferId) -> Result<()> {
        let slot = self
            .buffers
            .iter()
            .position(|b| b.meta.id == id)
            .ok_or_else(|| Error::InvalidBufferId(format!("{:?}", id)))?;
        self.buffers[slot].owner = BufferOwner::Port;
        self.queue.push_back(slot);
        Ok(())
    }

    pub fn buffer_meta(&self, id: BufferId) -> Option<&BufferMeta> {
        self.buffers.iter().find(|b| b.meta.id == id).map(|b| &b.meta)
    }

    pub fn candidates(&self) -> &[FormatSpec] {
        &self.candidates
    }

    pub fn mark_error(&mut self) {
        self.state = PortState::Error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Range, SampleFormat};

    fn spec() -> FormatSpec {
        FormatSpec {
            encodings: vec![SampleFormat::S16LE],
            rate: Range::fixed(48000),
            channels: Range::fixed(2),
        }
    }

    #[test]
    fn format_then_buffers_then_stream_lifecycle() {
        let mut port = Port::new(PortId(1), Direction::Output, vec![spec()]);
        assert_eq!(port.state(), PortState::Configure);

        let fmt = port.enum_formats(0, None).unwrap();
        port.set_format(fmt).unwrap();
        assert_eq!(port.state(), PortState::Ready);

        port.use_buffers(4, 1024, 4).unwrap();
        assert_eq!(port.state(), PortState::Paused);

        port.start_streaming().unwrap();
        assert_eq!(port.state(), PortState::Streaming);

        let buf = port.dequeue_buffer().unwrap().unwrap();
        port.queue_buffer(buf).unwrap();
    }

    #[test]
    fn use_buffers_before_format_fails() {
        let mut port = Port::new(PortId(1), Direction::Input, vec![spec()]);
        assert!(matches!(port.use_buffers(2, 64, 4), Err(Error::NoFormat)));
    }

    #[test]
    fn dequeue_without_buffers_is_no_buffers_error() {
        let mut port = Port::new(PortId(1), Direction::Input, vec![spec()]);
        assert!(matches!(port.dequeue_buffer(), Err(Error::NoBuffers)));
    }

    #[test]
    fn clear_format_returns_port_to_configure() {
        let mut port = Port::new(PortId(1), Direction::Output, vec![spec()]);
        let fmt = port.enum_formats(0, None).unwrap();
        port.set_format(fmt).unwrap();
        port.use_buffers(2, 64, 4).unwrap();

        port.clear_format().unwrap();
        assert_eq!(port.state(), PortState::Configure);
        assert!(port.format().is_none());
        assert!(matches!(port.dequeue_buffer(), Err(Error::NoBuffers)));
    }

    #[test]
    fn clear_format_fails_while_peer_holds_a_buffer() {
        let mut port = Port::new(PortId(1), Direction::Output, vec![spec()]);
        let fmt = port.enum_formats(0, None).unwrap();
        port.set_format(fmt).unwrap();
        port.use_buffers(1, 64, 4).unwrap();
        port.start_streaming().unwrap();
        port.dequeue_buffer().unwrap();

        assert!(matches!(port.clear_format(), Err(Error::InvalidBufferId(_))));
        assert_eq!(port.state(), PortState::Streaming, "failed clear must not change port state");
    }

    #[test]
    fn queue_unknown_buffer_id_errors() {
        let mut port = Port::new(PortId(1), Direction::Output, vec![spec()]);
        let fmt = port.enum_formats(0, None).unwrap();
        port.set_format(fmt).unwrap();
        port.use_buffers(1, 64, 4).unwrap();
        assert!(matches!(port.queue_buffer(BufferId(99)), Err(Error::InvalidBufferId(_))));
    }
}
