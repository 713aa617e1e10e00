//! Auto-link policy.
//!
//! Grounded on `src/modules/module-autolink.c`. The policy watches the
//! registry for new nodes and ports; the first time a node reaches
//! `Suspended` (`on_node_created` in the original, guarded so later
//! suspends don't re-trigger it), it tries to link each of that node's
//! ports: `pipewire.target.node` pins an explicit peer, otherwise
//! `pipewire.autoconnect` opts the port into scanning every other known
//! node for a free, direction-compatible, format-compatible port. When a
//! link's far side disappears (`link_port_unlinked`), the surviving
//! input port is re-offered to the scan so it doesn't stay silently
//! dangling.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::link::{Endpoint, Link, LinkId};
use crate::node::{split_pair_mut, Node, NodeId};
use crate::port::{Direction, PortId};
use crate::properties;
use crate::scheduler::Scheduler;

pub struct AutoLinkPolicy {
    next_link_id: u64,
}

impl AutoLinkPolicy {
    pub fn new() -> Self {
        Self { next_link_id: 0 }
    }

    fn alloc_link_id(&mut self) -> LinkId {
        let id = LinkId(self.next_link_id);
        self.next_link_id += 1;
        id
    }

    /// Entry point called once per node, on its first CREATING ->
    /// SUSPENDED transition. Attempts to link every currently-unlinked,
    /// autoconnect-eligible port on that node.
    pub fn on_node_suspended(
        &mut self,
        node_id: NodeId,
        nodes: &mut HashMap<NodeId, Node>,
        links: &mut HashMap<LinkId, Link>,
        scheduler: &mut Scheduler,
    ) {
        let port_ids: Vec<(PortId, Direction)> = match nodes.get(&node_id) {
            Some(node) => node.ports().map(|p| (p.id, p.direction)).collect(),
            None => return,
        };

        for (port_id, direction) in port_ids {
            if let Err(e) = self.try_link_port(node_id, port_id, direction, nodes, links, scheduler) {
                debug!(?node_id, ?port_id, error = %e, "auto-link attempt did not produce a link");
            }
        }
    }

    /// `node_port_added`: a port added to an already-known node gets its
    /// own immediate link attempt, independent of the node's own
    /// suspend-transition pass.
    pub fn on_port_added(
        &mut self,
        node_id: NodeId,
        port_id: PortId,
        direction: Direction,
        nodes: &mut HashMap<NodeId, Node>,
        links: &mut HashMap<LinkId, Link>,
        scheduler: &mut Scheduler,
    ) {
        if let Err(e) = self.try_link_port(node_id, port_id, direction, nodes, links, scheduler) {
            debug!(?node_id, ?port_id, error = %e, "auto-link attempt did not produce a link");
        }
    }

    /// `try_link_port`: resolve a target node for `port_id` (explicit
    /// `target.node` property, or a scan over autoconnect-eligible
    /// nodes) and, if a compatible peer port is found, create and
    /// negotiate a `Link` to it.
    fn try_link_port(
        &mut self,
        node_id: NodeId,
        port_id: PortId,
        direction: Direction,
        nodes: &mut HashMap<NodeId, Node>,
        links: &mut HashMap<LinkId, Link>,
        scheduler: &mut Scheduler,
    ) -> crate::error::Result<()> {
        let node_props = nodes
            .get(&node_id)
            .map(|n| n.properties.clone())
            .unwrap_or_default();

        if !node_props.get_bool(properties::AUTOCONNECT) && !node_props.contains_key(properties::TARGET_NODE) {
            return Ok(());
        }

        let peer_direction = match direction {
            Direction::Output => Direction::Input,
            Direction::Input => Direction::Output,
        };

        let explicit_target = node_props
            .get_id(properties::TARGET_NODE)
            .map(NodeId);

        let peer = if let Some(target) = explicit_target {
            nodes
                .get(&target)
                .and_then(|n| n.get_free_port(peer_direction))
                .map(|peer_port| (target, peer_port))
        } else {
            nodes
                .iter()
                .filter(|(&id, _)| id != node_id)
                .find_map(|(&id, n)| n.get_free_port(peer_direction).map(|p| (id, p)))
        };

        let Some((peer_node, peer_port)) = peer else {
            return Ok(());
        };

        let (output_ep, input_ep) = match direction {
            Direction::Output => (
                Endpoint { node: node_id, port: port_id },
                Endpoint { node: peer_node, port: peer_port },
            ),
            Direction::Input => (
                Endpoint { node: peer_node, port: peer_port },
                Endpoint { node: node_id, port: port_id },
            ),
        };

        self.create_and_activate_link(output_ep, input_ep, nodes, links, scheduler)
    }

    fn create_and_activate_link(
        &mut self,
        output: Endpoint,
        input: Endpoint,
        nodes: &mut HashMap<NodeId, Node>,
        links: &mut HashMap<LinkId, Link>,
        scheduler: &mut Scheduler,
    ) -> crate::error::Result<()> {
        let link_id = self.alloc_link_id();
        scheduler.try_add_link(link_id, output.node, input.node)?;

        let mut link = Link::new(link_id, output, input);
        let (a, b) = match split_pair_mut(nodes, output.node, input.node) {
            Some(pair) => pair,
            None => {
                scheduler.remove_link(output.node, input.node);
                return Err(crate::error::Error::InvalidArguments("link endpoint node missing".into()));
            }
        };
        // A link that fails negotiation or activation still stays in the
        // registry, parked in Error state, same as any other link until
        // something explicitly destroys it -- only the scheduler
        // registration is rolled back.
        if let Err(e) = link.negotiate(a, b) {
            scheduler.remove_link(output.node, input.node);
            links.insert(link_id, link);
            return Err(e);
        }
        if let Err(e) = link.activate(a, b) {
            scheduler.remove_link(output.node, input.node);
            links.insert(link_id, link);
            return Err(e);
        }

        info!(?link_id, ?output.node, ?input.node, "auto-linked");
        links.insert(link_id, link);
        Ok(())
    }

    /// `link_port_unlinked`: re-pair the surviving input port after its
    /// peer disappears.
    pub fn on_port_unlinked(
        &mut self,
        node_id: NodeId,
        port_id: PortId,
        direction: Direction,
        nodes: &mut HashMap<NodeId, Node>,
        links: &mut HashMap<LinkId, Link>,
        scheduler: &mut Scheduler,
    ) {
        if let Err(e) = self.try_link_port(node_id, port_id, direction, nodes, links, scheduler) {
            warn!(?node_id, ?port_id, error = %e, "re-link after unlink failed");
        }
    }
}

impl Default for AutoLinkPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FormatSpec, Range, SampleFormat};
    use crate::port::Port;

    fn spec() -> FormatSpec {
        FormatSpec {
            encodings: vec![SampleFormat::S16LE],
            rate: Range::fixed(48000),
            channels: Range::fixed(2),
        }
    }

    #[test]
    fn autoconnect_links_two_compatible_nodes() {
        let mut nodes = HashMap::new();
        let mut links = HashMap::new();
        let mut scheduler = Scheduler::new();

        let mut source = Node::new(NodeId(1), properties::Properties::new());
        source.properties.set(properties::AUTOCONNECT, "1");
        source.add_port(Port::new(PortId(10), Direction::Output, vec![spec()]));
        source.register();

        let mut sink = Node::new(NodeId(2), properties::Properties::new());
        sink.add_port(Port::new(PortId(20), Direction::Input, vec![spec()]));
        sink.register();

        nodes.insert(NodeId(1), source);
        nodes.insert(NodeId(2), sink);

        let mut policy = AutoLinkPolicy::new();
        policy.on_node_suspended(NodeId(1), &mut nodes, &mut links, &mut scheduler);

        assert_eq!(links.len(), 1);
        let link = links.values().next().unwrap();
        assert_eq!(link.state(), crate::link::LinkState::Running);
    }

    #[test]
    fn failed_negotiation_still_leaves_the_link_in_the_registry() {
        let mut nodes = HashMap::new();
        let mut links = HashMap::new();
        let mut scheduler = Scheduler::new();

        let mut source = Node::new(NodeId(1), properties::Properties::new());
        source.properties.set(properties::AUTOCONNECT, "1");
        source.add_port(Port::new(
            PortId(10),
            Direction::Output,
            vec![FormatSpec {
                encodings: vec![SampleFormat::S32LE],
                rate: Range::fixed(48000),
                channels: Range::fixed(2),
            }],
        ));
        source.register();

        let mut sink = Node::new(NodeId(2), properties::Properties::new());
        sink.add_port(Port::new(PortId(20), Direction::Input, vec![spec()]));
        sink.register();

        nodes.insert(NodeId(1), source);
        nodes.insert(NodeId(2), sink);

        let mut policy = AutoLinkPolicy::new();
        policy.on_node_suspended(NodeId(1), &mut nodes, &mut links, &mut scheduler);

        assert_eq!(links.len(), 1, "a link that failed negotiation must stay in the registry");
        let link = links.values().next().unwrap();
        assert_eq!(link.state(), crate::link::LinkState::Error);
        assert!(link.last_error().is_some());
    }

    #[test]
    fn node_without_autoconnect_is_left_alone() {
        let mut nodes = HashMap::new();
        let mut links = HashMap::new();
        let mut scheduler = Scheduler::new();

        let mut source = Node::new(NodeId(1), properties::Properties::new());
        source.add_port(Port::new(PortId(10), Direction::Output, vec![spec()]));
        source.register();
        nodes.insert(NodeId(1), source);

        let mut policy = AutoLinkPolicy::new();
        policy.on_node_suspended(NodeId(1), &mut nodes, &mut links, &mut scheduler);

        assert!(links.is_empty());
    }
}
