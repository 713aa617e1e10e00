//! Wiring together the Registry, Nodes, Links, Scheduler, and AutoLink
//! policy into the object a daemon process actually owns.
//!
//! This is the crate's top-level aggregate: the registry, node/link
//! maps, scheduler, and auto-link policy each need somewhere to live
//! together and call each other, which is what `pw_core` plays in the
//! original system.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::autolink::AutoLinkPolicy;
use crate::clock::{Clock, SoftwareClock};
use crate::link::{Link, LinkId};
use crate::node::{split_pair_mut, Node, NodeId, NodeImpl};
use crate::port::{Direction, Port, PortId};
use crate::properties::Properties;
use crate::registry::{GlobalId, GlobalKind, Registry};
use crate::scheduler::Scheduler;

pub struct Core {
    pub registry: Registry,
    nodes: HashMap<NodeId, Node>,
    links: HashMap<LinkId, Link>,
    scheduler: Scheduler,
    autolink: AutoLinkPolicy,
    clock: Box<dyn Clock>,
    node_globals: HashMap<NodeId, GlobalId>,
    next_node_id: u64,
    next_port_id: u64,
}

impl Core {
    pub fn new() -> Self {
        Self::with_clock(Box::new(SoftwareClock::new()))
    }

    /// Build a `Core` against an explicit clock source, e.g. one backed
    /// by a hardware-synced implementation of [`Clock`] rather than the
    /// default free-running [`SoftwareClock`].
    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Self {
            registry: Registry::new(),
            nodes: HashMap::new(),
            links: HashMap::new(),
            scheduler: Scheduler::new(),
            autolink: AutoLinkPolicy::new(),
            clock,
            node_globals: HashMap::new(),
            next_node_id: 0,
            next_port_id: 0,
        }
    }

    /// Create a node, register it as a Global (CREATING -> SUSPENDED),
    /// and run the auto-link policy over it.
    pub fn create_node(&mut self, properties: Properties, driver: Box<dyn NodeImpl>) -> NodeId {
        let node_id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        let global_id = self.registry.add_global(GlobalKind::Node, properties.clone());
        self.node_globals.insert(node_id, global_id);

        let mut node = Node::with_impl(node_id, properties, driver);
        node.register();
        self.scheduler.add_node(node_id);

        let reached_first_suspend = node.just_reached_first_suspend();
        self.nodes.insert(node_id, node);

        if reached_first_suspend {
            self.autolink
                .on_node_suspended(node_id, &mut self.nodes, &mut self.links, &mut self.scheduler);
        }

        info!(?node_id, "node created");
        node_id
    }

    pub fn add_port(&mut self, node_id: NodeId, direction: Direction, candidates: Vec<crate::format::FormatSpec>) -> Option<PortId> {
        let port_id = PortId(self.next_port_id);
        self.next_port_id += 1;
        {
            let node = self.nodes.get_mut(&node_id)?;
            node.add_port(Port::new(port_id, direction, candidates));
        }
        self.autolink
            .on_port_added(node_id, port_id, direction, &mut self.nodes, &mut self.links, &mut self.scheduler);
        Some(port_id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Forward a command to `node_id`, then (de)activate every link
    /// touching it to match: §4.4's "when entering IDLE it deactivates
    /// every link on every port; when entering RUNNING it activates
    /// them" — `Start` brings the node's links to `Running`, `Pause`
    /// brings them back to `Paused`. A link that can't (de)activate (an
    /// endpoint port in an unexpected state) is logged and skipped
    /// rather than failing the whole command, matching §7's propagation
    /// policy of surfacing link-level failures as that link's own
    /// `state_changed(_, ERROR, _)` rather than the command's result.
    pub fn send_command(&mut self, node_id: NodeId, command: crate::node::Command) -> crate::error::Result<crate::error::Outcome> {
        let outcome = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| crate::error::Error::InvalidArguments("unknown node".into()))?
            .send_command(command)?;

        let running = matches!(command, crate::node::Command::Start);
        self.set_links_running_for_node(node_id, running);

        if running {
            if let Some(update) = self.nodes.get(&node_id).and_then(|n| n.clock_update(self.clock.as_ref())) {
                debug!(?node_id, clock_id = self.clock.clock_id(), monotonic_nanos = update.time.monotonic_nanos, "clock update");
            }
        }

        Ok(outcome)
    }

    fn set_links_running_for_node(&mut self, node_id: NodeId, running: bool) {
        let touching: Vec<LinkId> = self
            .links
            .iter()
            .filter(|(_, link)| link.touches(node_id))
            .map(|(id, _)| *id)
            .collect();

        for link_id in touching {
            let Some((out_node, in_node)) = self.links.get(&link_id).map(|l| (l.output.node, l.input.node)) else {
                continue;
            };
            let Some((a, b)) = split_pair_mut(&mut self.nodes, out_node, in_node) else {
                continue;
            };
            let Some(link) = self.links.get_mut(&link_id) else {
                continue;
            };
            let result = if running { link.activate(a, b) } else { link.deactivate(a, b) };
            if let Err(e) = result {
                warn!(?link_id, ?node_id, error = %e, "link (de)activation skipped");
            }
        }
    }

    /// Remove a node and every link attached to it, cancelling any
    /// outstanding command/buffer-allocation completions still pending on
    /// the node or its ports rather than leaving them stranded. Each
    /// removed link unlinks its surviving port, then hands that port back
    /// to the auto-link policy so it can be re-paired with another node.
    pub fn remove_node(&mut self, node_id: NodeId) {
        self.scheduler.remove_node(node_id);

        let touching: Vec<LinkId> = self
            .links
            .iter()
            .filter(|(_, link)| link.touches(node_id))
            .map(|(id, _)| *id)
            .collect();

        let mut survivors = Vec::new();
        for link_id in touching {
            let Some(mut link) = self.links.remove(&link_id) else {
                continue;
            };
            let output_node = link.output.node;
            let input_node = link.input.node;
            if let Some((a, b)) = split_pair_mut(&mut self.nodes, output_node, input_node) {
                link.unlink(a, b);
            }
            if output_node == node_id {
                survivors.push((input_node, link.input.port, Direction::Input));
            } else {
                survivors.push((output_node, link.output.port, Direction::Output));
            }
        }

        if let Some(mut node) = self.nodes.remove(&node_id) {
            node.suspend();
            node.work.cancel_all();
            for port in node.ports_mut() {
                port.work.cancel_all();
            }
        }

        for (survivor_node, survivor_port, survivor_dir) in survivors {
            self.autolink.on_port_unlinked(
                survivor_node,
                survivor_port,
                survivor_dir,
                &mut self.nodes,
                &mut self.links,
                &mut self.scheduler,
            );
        }

        if let Some(global_id) = self.node_globals.remove(&node_id) {
            self.registry.remove_global(global_id);
        }
    }

    /// Run one scheduler pass over the current graph.
    pub fn run_cycle(&mut self) -> crate::error::Result<()> {
        self.scheduler.run_cycle(&mut self.nodes, &mut self.links)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}
