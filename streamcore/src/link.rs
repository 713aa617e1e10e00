//! Link negotiation protocol and state machine.
//!
//! A `Link` connects one node's output `Port` to another node's input
//! `Port`. Negotiation walks the output's candidate formats against the
//! input's, same shape as `alsa-sink.c`'s format/buffer negotiation but
//! generalized across two software ports instead of one hardware port:
//! intersect formats first, then allocate buffers sized from the
//! resolved format, then the link is ready to run.

use crate::error::{Error, Result};
use crate::format::MediaFormat;
use crate::node::{Node, NodeId};
use crate::port::{BufferId, Direction, PortId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

/// Link lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Init,
    Negotiating,
    Allocating,
    Paused,
    Running,
    Unlinked,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub node: NodeId,
    pub port: PortId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    StateChanged { old: LinkState, new: LinkState, error: Option<String> },
}

pub type LinkListener = Box<dyn FnMut(LinkId, LinkEvent) + Send>;

pub struct Link {
    pub id: LinkId,
    pub output: Endpoint,
    pub input: Endpoint,
    state: LinkState,
    format: Option<MediaFormat>,
    listeners: Vec<LinkListener>,
    last_error: Option<String>,
}

const DEFAULT_BUFFER_COUNT: usize = 4;
const DEFAULT_STRIDE: usize = 4;

impl Link {
    pub fn new(id: LinkId, output: Endpoint, input: Endpoint) -> Self {
        Self {
            id,
            output,
            input,
            state: LinkState::Init,
            format: None,
            listeners: Vec::new(),
            last_error: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn format(&self) -> Option<MediaFormat> {
        self.format
    }

    /// The message from the most recent `Error` transition, retained
    /// across later state changes the same way `Node::last_error` is.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn add_listener(&mut self, listener: LinkListener) {
        self.listeners.push(listener);
    }

    fn emit(&mut self, event: LinkEvent) {
        for listener in &mut self.listeners {
            listener(self.id, event.clone());
        }
    }

    /// The sole mutator of `state`, mirroring `Node::update_state`:
    /// latches `error` into `last_error` when given, then always emits
    /// `StateChanged`, even when `old == new` -- `activate`'s idempotent
    /// re-assert of an already-`Running` link relies on that to re-emit.
    fn set_state(&mut self, new_state: LinkState, error: Option<String>) {
        if error.is_some() {
            self.last_error = error;
        }
        let old = self.state;
        self.state = new_state;
        self.emit(LinkEvent::StateChanged { old, new: new_state, error: self.last_error.clone() });
    }

    /// Drive format negotiation and buffer allocation to completion:
    /// intersect candidate formats, call `set_format` on both ports,
    /// then `use_buffers` on both. Takes the two owning nodes directly
    /// since ports live inside their node.
    pub fn negotiate(&mut self, output_node: &mut Node, input_node: &mut Node) -> Result<()> {
        if self.state != LinkState::Init {
            return Err(Error::InvalidArguments(format!(
                "negotiate requires Init state, link is {:?}",
                self.state
            )));
        }
        self.set_state(LinkState::Negotiating, None);

        let out_port = output_node
            .port(self.output.port)
            .ok_or_else(|| Error::InvalidPort(format!("{:?}", self.output.port)))?;
        let in_port = input_node
            .port(self.input.port)
            .ok_or_else(|| Error::InvalidPort(format!("{:?}", self.input.port)))?;

        if out_port.direction != Direction::Output || in_port.direction != Direction::Input {
            let msg = "link endpoints must be an Output port and an Input port".to_string();
            self.set_state(LinkState::Error, Some(msg.clone()));
            return Err(Error::InvalidArguments(msg));
        }

        let mut resolved = None;
        'outer: for (oi, out_spec) in out_port.candidates().iter().enumerate() {
            for in_spec in in_port.candidates() {
                if let Ok(merged) = out_spec.intersect(in_spec) {
                    resolved = Some((oi, merged.resolve()));
                    break 'outer;
                }
            }
        }
        let Some((_, format)) = resolved else {
            let msg = "no format common to both link endpoints".to_string();
            self.set_state(LinkState::Error, Some(msg.clone()));
            return Err(Error::NoCommonFormat(msg));
        };

        output_node
            .port_mut(self.output.port)
            .unwrap()
            .set_format(format)?;
        input_node
            .port_mut(self.input.port)
            .unwrap()
            .set_format(format)?;

        self.format = Some(format);
        self.set_state(LinkState::Allocating, None);

        let size = (format.channels as usize) * DEFAULT_STRIDE;
        if let Err(e) = output_node
            .port_mut(self.output.port)
            .unwrap()
            .use_buffers(DEFAULT_BUFFER_COUNT, size, DEFAULT_STRIDE)
        {
            self.set_state(LinkState::Error, Some(e.to_string()));
            return Err(e);
        }
        if let Err(e) = input_node
            .port_mut(self.input.port)
            .unwrap()
            .use_buffers(DEFAULT_BUFFER_COUNT, size, DEFAULT_STRIDE)
        {
            self.set_state(LinkState::Error, Some(e.to_string()));
            return Err(e);
        }

        self.set_state(LinkState::Paused, None);
        output_node.mark_port_linked(self.output.port);
        input_node.mark_port_linked(self.input.port);

        Ok(())
    }

    /// Move a negotiated, paused link to `Running` once both endpoint
    /// nodes are scheduled (a node's RUNNING/IDLE transitions (de)activate
    /// every link on its ports). Idempotent: activating an already-running
    /// link is a no-op, since a node's `Start` command re-asserts
    /// activation on every link it touches regardless of each individual
    /// link's current state.
    pub fn activate(&mut self, output_node: &mut Node, input_node: &mut Node) -> Result<()> {
        if self.state == LinkState::Running {
            // A node's Start command re-asserts activation on every link it
            // touches regardless of that link's current state, so entering
            // RUNNING re-emits state_changed even on this idempotent path.
            self.emit(LinkEvent::StateChanged {
                old: LinkState::Running,
                new: LinkState::Running,
                error: self.last_error.clone(),
            });
            return Ok(());
        }
        if self.state != LinkState::Paused {
            return Err(Error::InvalidArguments(format!(
                "activate requires Paused state, link is {:?}",
                self.state
            )));
        }
        output_node
            .port_mut(self.output.port)
            .ok_or_else(|| Error::InvalidPort(format!("{:?}", self.output.port)))?
            .start_streaming()?;
        input_node
            .port_mut(self.input.port)
            .ok_or_else(|| Error::InvalidPort(format!("{:?}", self.input.port)))?
            .start_streaming()?;
        self.set_state(LinkState::Running, None);
        Ok(())
    }

    pub fn deactivate(&mut self, output_node: &mut Node, input_node: &mut Node) -> Result<()> {
        if self.state != LinkState::Running {
            return Ok(());
        }
        if let Some(port) = output_node.port_mut(self.output.port) {
            port.stop_streaming()?;
        }
        if let Some(port) = input_node.port_mut(self.input.port) {
            port.stop_streaming()?;
        }
        self.set_state(LinkState::Paused, None);
        Ok(())
    }

    /// Move one buffer from the output port's queue to the input port.
    /// Used by the scheduler's push/pull drive.
    pub fn transfer_buffer(&self, output_node: &mut Node, input_node: &mut Node) -> Result<Option<BufferId>> {
        if self.state != LinkState::Running {
            return Ok(None);
        }
        let Some(buf) = output_node
            .port_mut(self.output.port)
            .ok_or_else(|| Error::InvalidPort(format!("{:?}", self.output.port)))?
            .dequeue_buffer()?
        else {
            return Ok(None);
        };
        input_node
            .port_mut(self.input.port)
            .ok_or_else(|| Error::InvalidPort(format!("{:?}", self.input.port)))?
            .queue_buffer(buf)?;
        Ok(Some(buf))
    }

    pub fn unlink(&mut self, output_node: &mut Node, input_node: &mut Node) {
        output_node.mark_port_unlinked(self.output.port);
        input_node.mark_port_unlinked(self.input.port);
        self.set_state(LinkState::Unlinked, None);
    }

    /// True if either endpoint belongs to `node_id`. Used when a node is
    /// removed to find the links that must go with it.
    pub fn touches(&self, node_id: NodeId) -> bool {
        self.output.node == node_id || self.input.node == node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FormatSpec, Range, SampleFormat};
    use crate::port::Port;
    use crate::properties::Properties;

    fn make_spec() -> FormatSpec {
        FormatSpec {
            encodings: vec![SampleFormat::S16LE],
            rate: Range::fixed(48000),
            channels: Range::fixed(2),
        }
    }

    fn make_pair() -> (Node, Node, Link) {
        let mut out_node = Node::new(NodeId(1), Properties::new());
        out_node.add_port(Port::new(PortId(10), Direction::Output, vec![make_spec()]));
        let mut in_node = Node::new(NodeId(2), Properties::new());
        in_node.add_port(Port::new(PortId(20), Direction::Input, vec![make_spec()]));

        let link = Link::new(
            LinkId(1),
            Endpoint {
                node: NodeId(1),
                port: PortId(10),
            },
            Endpoint {
                node: NodeId(2),
                port: PortId(20),
            },
        );
        (out_node, in_node, link)
    }

    #[test]
    fn negotiate_reaches_paused_with_common_format() {
        let (mut out_node, mut in_node, mut link) = make_pair();
        link.negotiate(&mut out_node, &mut in_node).unwrap();
        assert_eq!(link.state(), LinkState::Paused);
        assert!(link.format().is_some());
    }

    #[test]
    fn activate_then_transfer_moves_a_buffer() {
        let (mut out_node, mut in_node, mut link) = make_pair();
        link.negotiate(&mut out_node, &mut in_node).unwrap();
        link.activate(&mut out_node, &mut in_node).unwrap();
        assert_eq!(link.state(), LinkState::Running);

        let moved = link.transfer_buffer(&mut out_node, &mut in_node).unwrap();
        assert!(moved.is_some());
    }

    #[test]
    fn negotiate_fails_on_incompatible_formats() {
        let mut out_node = Node::new(NodeId(1), Properties::new());
        out_node.add_port(Port::new(
            PortId(10),
            Direction::Output,
            vec![FormatSpec {
                encodings: vec![SampleFormat::S32LE],
                rate: Range::fixed(48000),
                channels: Range::fixed(2),
            }],
        ));
        let mut in_node = Node::new(NodeId(2), Properties::new());
        in_node.add_port(Port::new(
            PortId(20),
            Direction::Input,
            vec![FormatSpec {
                encodings: vec![SampleFormat::S16LE],
                rate: Range::fixed(48000),
                channels: Range::fixed(2),
            }],
        ));
        let mut link = Link::new(
            LinkId(1),
            Endpoint { node: NodeId(1), port: PortId(10) },
            Endpoint { node: NodeId(2), port: PortId(20) },
        );
        assert!(link.negotiate(&mut out_node, &mut in_node).is_err());
        assert_eq!(link.state(), LinkState::Error);
    }

    #[test]
    fn negotiation_failure_emits_state_changed_with_error_message() {
        let mut out_node = Node::new(NodeId(1), Properties::new());
        out_node.add_port(Port::new(
            PortId(10),
            Direction::Output,
            vec![FormatSpec {
                encodings: vec![SampleFormat::S32LE],
                rate: Range::fixed(48000),
                channels: Range::fixed(2),
            }],
        ));
        let mut in_node = Node::new(NodeId(2), Properties::new());
        in_node.add_port(Port::new(
            PortId(20),
            Direction::Input,
            vec![FormatSpec {
                encodings: vec![SampleFormat::S16LE],
                rate: Range::fixed(48000),
                channels: Range::fixed(2),
            }],
        ));
        let mut link = Link::new(
            LinkId(1),
            Endpoint { node: NodeId(1), port: PortId(10) },
            Endpoint { node: NodeId(2), port: PortId(20) },
        );

        let events: std::sync::Arc<std::sync::Mutex<Vec<LinkEvent>>> =
            std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let events_cb = std::sync::Arc::clone(&events);
        link.add_listener(Box::new(move |_id, ev| {
            events_cb.lock().unwrap().push(ev);
        }));

        link.negotiate(&mut out_node, &mut in_node).unwrap_err();

        assert_eq!(link.last_error(), Some("no format common to both link endpoints"));
        let recorded = events.lock().unwrap().clone();
        assert_eq!(
            recorded.last().unwrap(),
            &LinkEvent::StateChanged {
                old: LinkState::Negotiating,
                new: LinkState::Error,
                error: Some("no format common to both link endpoints".to_string()),
            }
        );
    }

    #[test]
    fn reactivating_a_running_link_reemits_state_changed() {
        let (mut out_node, mut in_node, mut link) = make_pair();
        link.negotiate(&mut out_node, &mut in_node).unwrap();
        link.activate(&mut out_node, &mut in_node).unwrap();

        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_cb = std::sync::Arc::clone(&count);
        link.add_listener(Box::new(move |_id, _ev| {
            count_cb.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));

        link.activate(&mut out_node, &mut in_node).unwrap();
        assert_eq!(link.state(), LinkState::Running);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
