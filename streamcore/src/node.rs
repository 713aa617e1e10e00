//! Node lifecycle and state machine.
//!
//! Grounded on `src/pipewire/node.c`. Two paths mutate a node's state:
//! the command path (`pw_node_set_state`, driven by `send_command`) and
//! the low-level path (`pw_node_update_state`), which is the *only*
//! function allowed to actually flip `Node::state` and always emits, in
//! this exact order: `state_changed`, then `info_changed`, then an
//! `info` broadcast to every resource watching the node. `send_command`
//! never writes `state` directly — it computes the target state and
//! calls `update_state`, same as the original's `node_update_state`
//! being the sole writer while `pw_node_set_state` is just a caller of
//! it with command-specific validation up front.

use std::collections::{HashMap, HashSet};

use crate::clock::{Clock, ClockTime};
use crate::error::{Error, Outcome, Result};
use crate::port::{Direction, Port, PortId};
use crate::properties::Properties;
use crate::work_queue::WorkQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Node lifecycle states: `Creating` is pre-registration,
/// `Suspended` is registered but without negotiated ports, `Idle` has a
/// ready graph position but isn't scheduled, `Running` is actively
/// processed by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Creating,
    Suspended,
    Idle,
    Running,
    Error,
}

/// The only commands a caller may send: anything else is
/// rejected with `Error::NotImplemented`, matching the original's
/// narrow command set as far as this core models it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Start,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    StateChanged { old: NodeState, new: NodeState, error: Option<String> },
    InfoChanged,
    Info { error: Option<String> },
}

pub type NodeListener = Box<dyn FnMut(NodeId, NodeEvent) + Send>;

/// Clock-update packet a running node periodically emits, built from a
/// `Clock` reading.
#[derive(Debug, Clone, Copy)]
pub struct ClockUpdate {
    pub node_id: NodeId,
    pub time: ClockTime,
}

/// External driver seam: the actual data-processing behavior a node
/// wraps (an ALSA sink, a software mixer, ...), held as a trait object
/// so the core never needs to know the concrete implementation behind
/// a node's `process_input`/`process_output` pair.
pub trait NodeImpl: Send {
    /// Called by the scheduler's push step, before buffers are handed to
    /// downstream links.
    fn process_output(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called by the scheduler's pull step, after buffers from upstream
    /// links have been transferred in.
    fn process_input(&mut self) -> Result<()> {
        Ok(())
    }
}

struct NoopImpl;
impl NodeImpl for NoopImpl {}

pub struct Node {
    pub id: NodeId,
    state: NodeState,
    pub properties: Properties,
    ports: HashMap<PortId, Port>,
    linked_ports: HashSet<PortId>,
    listeners: Vec<NodeListener>,
    pub work: WorkQueue,
    driver: Box<dyn NodeImpl>,
    had_first_suspend: bool,
    last_error: Option<String>,
}

impl Node {
    pub fn new(id: NodeId, properties: Properties) -> Self {
        Self::with_impl(id, properties, Box::new(NoopImpl))
    }

    pub fn with_impl(id: NodeId, properties: Properties, driver: Box<dyn NodeImpl>) -> Self {
        Self {
            id,
            state: NodeState::Creating,
            properties,
            ports: HashMap::new(),
            linked_ports: HashSet::new(),
            listeners: Vec::new(),
            work: WorkQueue::new(),
            driver,
            had_first_suspend: false,
            last_error: None,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// The message from the most recent `Error` transition, retained
    /// across further state changes until this node is dropped and
    /// recreated -- every `info`/`info_changed` broadcast after an error
    /// carries it, not just the one at the moment of the transition.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn add_listener(&mut self, listener: NodeListener) {
        self.listeners.push(listener);
    }

    /// The sole mutator of `state`. Always fires `StateChanged`, then
    /// `InfoChanged`, then `Info`, in that order, matching
    /// `pw_node_update_state`/`pw_impl_node_emit_info` in the original.
    /// `error` is latched into `last_error` whenever it's `Some`, and
    /// every broadcast after that -- not just this one -- carries it.
    fn update_state(&mut self, new_state: NodeState, error: Option<String>) {
        if error.is_some() {
            self.last_error = error;
        }
        if self.state == new_state {
            return;
        }
        let old = self.state;
        self.state = new_state;
        self.emit(NodeEvent::StateChanged { old, new: new_state, error: self.last_error.clone() });
        self.emit(NodeEvent::InfoChanged);
        self.emit(NodeEvent::Info { error: self.last_error.clone() });
    }

    fn emit(&mut self, event: NodeEvent) {
        for listener in &mut self.listeners {
            listener(self.id, event);
        }
    }

    /// `pw_node_register`'s CREATING -> SUSPENDED transition. Called
    /// once by the registry when the node is added as a Global.
    pub fn register(&mut self) {
        if self.state == NodeState::Creating {
            self.update_state(NodeState::Suspended, None);
        }
    }

    /// True exactly once: the first time this node reaches `Suspended`.
    /// The auto-link policy only attempts linking on this transition,
    /// mirroring `on_node_created`'s guard against re-firing on later
    /// suspends.
    pub fn just_reached_first_suspend(&mut self) -> bool {
        if self.state == NodeState::Suspended && !self.had_first_suspend {
            self.had_first_suspend = true;
            true
        } else {
            false
        }
    }

    pub fn add_port(&mut self, port: Port) {
        self.ports.insert(port.id, port);
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn port_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.ports.get_mut(&id)
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    pub fn ports_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.ports.values_mut()
    }

    pub fn mark_port_linked(&mut self, id: PortId) {
        self.linked_ports.insert(id);
    }

    pub fn mark_port_unlinked(&mut self, id: PortId) {
        self.linked_ports.remove(&id);
    }

    /// `pw_node_get_free_port`: the first port of `direction` this node
    /// owns that currently has no link.
    pub fn get_free_port(&self, direction: Direction) -> Option<PortId> {
        self.ports
            .values()
            .filter(|p| p.direction == direction)
            .map(|p| p.id)
            .find(|id| !self.linked_ports.contains(id))
    }

    /// Validates then delegates to `update_state`. Submitted through
    /// this node's `WorkQueue` like any other async operation — it
    /// happens to resolve immediately since this core's state
    /// transitions are synchronous, but callers still get back an
    /// `Outcome::Async` seq and must drain it through
    /// [`Node::drain_completions`] the same way a genuinely async
    /// implementation would require.
    pub fn send_command(&mut self, command: Command) -> Result<Outcome> {
        match command {
            Command::Start => {
                if self.state != NodeState::Idle {
                    return Err(Error::InvalidArguments(format!(
                        "Start requires Idle, node is {:?}",
                        self.state
                    )));
                }
                self.update_state(NodeState::Running, None);
            }
            Command::Pause => {
                if !matches!(self.state, NodeState::Suspended | NodeState::Running | NodeState::Idle) {
                    return Err(Error::InvalidArguments(format!(
                        "Pause requires Suspended, Running, or Idle, node is {:?}",
                        self.state
                    )));
                }
                self.update_state(NodeState::Idle, None);
            }
        }
        let seq = self.work.submit();
        self.work.complete(seq);
        Ok(Outcome::Async(seq))
    }

    /// Drain command completions in submission order.
    pub fn drain_completions(&mut self) -> Vec<u32> {
        self.work.drain_ready()
    }

    /// `pw_node_set_state`'s direct suspend path, reachable from `Core`
    /// on node removal rather than through `send_command`. Clears the
    /// format on every port first; if any port refuses to clear (a
    /// buffer still held by its peer), the node goes to `Error` instead
    /// of `Suspended`.
    pub fn suspend(&mut self) {
        // Every port must be given the chance to clear, even if an
        // earlier one fails -- `any()` would short-circuit and skip the
        // rest, leaving them with a stale format.
        let mut any_clear_failed = false;
        for port in self.ports.values_mut() {
            if port.clear_format().is_err() {
                any_clear_failed = true;
            }
        }
        if any_clear_failed {
            self.update_state(NodeState::Error, Some("a port refused to clear its format".into()));
        } else {
            self.update_state(NodeState::Suspended, None);
        }
    }

    /// `pw_impl_node_set_state`'s forced-error path: any caller outside
    /// this module that decides the node can't continue (a failed link
    /// activation, a driver fault) routes through here with the reason.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.update_state(NodeState::Error, Some(message.into()));
    }

    /// Build a clock-update packet for a running node.
    pub fn clock_update(&self, clock: &dyn Clock) -> Option<ClockUpdate> {
        if self.state != NodeState::Running {
            return None;
        }
        Some(ClockUpdate {
            node_id: self.id,
            time: clock.now(),
        })
    }

    /// Drive this node's output-producing driver callback, the push step
    /// of the scheduler's cycle. Only meaningful while `Running`; the
    /// scheduler is the only caller.
    pub fn process_output(&mut self) -> Result<()> {
        if self.state != NodeState::Running {
            return Ok(());
        }
        self.driver.process_output()
    }

    /// Drive this node's input-consuming driver callback, the pull step
    /// of the scheduler's cycle, called after upstream buffers have been
    /// transferred onto this node's input ports.
    pub fn process_input(&mut self) -> Result<()> {
        if self.state != NodeState::Running {
            return Ok(());
        }
        self.driver.process_input()
    }
}

/// Borrow two distinct nodes out of the same map mutably at once. Both
/// the scheduler's push step and the auto-link policy's link-activation
/// path need this, since a link's two endpoints are usually two
/// different entries of the same `HashMap<NodeId, Node>`.
pub(crate) fn split_pair_mut(
    nodes: &mut HashMap<NodeId, Node>,
    a: NodeId,
    b: NodeId,
) -> Option<(&mut Node, &mut Node)> {
    if a == b {
        return None;
    }
    // SAFETY: `a` and `b` are distinct keys into the same map; taking two
    // mutable borrows of disjoint entries is sound even though the
    // borrow checker can't see that through a single `get_mut` call.
    let ptr: *mut HashMap<NodeId, Node> = nodes;
    unsafe {
        let map_a = &mut *ptr;
        let map_b = &mut *ptr;
        let node_a = map_a.get_mut(&a)?;
        let node_b = map_b.get_mut(&b)?;
        Some((node_a, node_b))
    }
}
