//! Graph scheduler: pull/push execution order and cycle rejection.
//!
//! The processing graph is nodes-as-vertices, links-as-edges. Each
//! scheduling cycle visits nodes in topological order and, after a node
//! processes, pushes its output buffers across outgoing links so the
//! next node downstream has input ready when its turn comes — the
//! "push" half of the pull/push model; the "pull" half is `Node::process`
//! itself asking its driver for output (or feeding it input) through the
//! `NodeImpl` seam.
//!
//! Cycle rejection at link-activation time is a deliberate tightening
//! over a looser original that never validated the graph was acyclic
//! before activating a link — see the rationale in DESIGN.md. `petgraph`
//! contributes the topological sort and cycle check.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use crate::error::{Error, Result};
use crate::link::{Link, LinkId};
use crate::node::{split_pair_mut, Node, NodeId};

pub struct Scheduler {
    graph: StableDiGraph<NodeId, LinkId>,
    node_indices: HashMap<NodeId, NodeIndex>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            node_indices: HashMap::new(),
        }
    }

    pub fn add_node(&mut self, id: NodeId) {
        if self.node_indices.contains_key(&id) {
            return;
        }
        let idx = self.graph.add_node(id);
        self.node_indices.insert(id, idx);
    }

    pub fn remove_node(&mut self, id: NodeId) {
        if let Some(idx) = self.node_indices.remove(&id) {
            self.graph.remove_node(idx);
        }
    }

    /// Add an edge for a newly-activated link, rejecting it if it would
    /// close a cycle: a cyclic graph has no valid processing order for a
    /// pull/push scheduler.
    pub fn try_add_link(&mut self, link_id: LinkId, from: NodeId, to: NodeId) -> Result<()> {
        self.add_node(from);
        self.add_node(to);
        let from_idx = self.node_indices[&from];
        let to_idx = self.node_indices[&to];

        let edge = self.graph.add_edge(from_idx, to_idx, link_id);
        if toposort(&self.graph, None).is_err() {
            self.graph.remove_edge(edge);
            return Err(Error::InvalidArguments(format!(
                "link {link_id:?} would introduce a cycle between {from:?} and {to:?}"
            )));
        }
        Ok(())
    }

    pub fn remove_link(&mut self, from: NodeId, to: NodeId) {
        let (Some(&from_idx), Some(&to_idx)) = (self.node_indices.get(&from), self.node_indices.get(&to))
        else {
            return;
        };
        if let Some(edge) = self.graph.find_edge(from_idx, to_idx) {
            self.graph.remove_edge(edge);
        }
    }

    /// Topological processing order for the current graph.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let order = toposort(&self.graph, None)
            .map_err(|_| Error::InvalidArguments("scheduler graph contains a cycle".into()))?;
        Ok(order.into_iter().map(|idx| self.graph[idx]).collect())
    }

    /// Run one scheduling pass over the graph in topological order,
    /// following the pull/push model: every node's `process_output`
    /// runs first (producers have a chance to fill their output ports),
    /// then ready buffers are pushed across active links, then every
    /// node's `process_input` runs (consumers see buffers their
    /// upstream link just delivered).
    pub fn run_cycle(&self, nodes: &mut HashMap<NodeId, Node>, links: &mut HashMap<LinkId, Link>) -> Result<()> {
        let order = self.topological_order()?;

        for node_id in &order {
            if let Some(node) = nodes.get_mut(node_id) {
                node.process_output()?;
            }
        }

        for link in links.values() {
            if link.state() != crate::link::LinkState::Running {
                continue;
            }
            let Some(&out_idx) = self.node_indices.get(&link.output.node) else {
                continue;
            };
            let Some(&in_idx) = self.node_indices.get(&link.input.node) else {
                continue;
            };
            if self.graph.find_edge(out_idx, in_idx).is_none() {
                continue;
            }
            let output_node = link.output.node;
            let input_node = link.input.node;
            if output_node == input_node {
                continue;
            }
            let (a, b) = split_pair_mut(nodes, output_node, input_node)
                .ok_or_else(|| Error::InvalidArguments("link endpoint node missing".into()))?;
            link.transfer_buffer(a, b)?;
        }

        for node_id in &order {
            if let Some(node) = nodes.get_mut(node_id) {
                node.process_input()?;
            }
        }

        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topological_order_respects_edges() {
        let mut sched = Scheduler::new();
        sched.add_node(NodeId(1));
        sched.add_node(NodeId(2));
        sched.add_node(NodeId(3));
        sched.try_add_link(LinkId(1), NodeId(1), NodeId(2)).unwrap();
        sched.try_add_link(LinkId(2), NodeId(2), NodeId(3)).unwrap();

        let order = sched.topological_order().unwrap();
        let pos = |id: NodeId| order.iter().position(|&n| n == id).unwrap();
        assert!(pos(NodeId(1)) < pos(NodeId(2)));
        assert!(pos(NodeId(2)) < pos(NodeId(3)));
    }

    #[test]
    fn cyclic_link_is_rejected() {
        let mut sched = Scheduler::new();
        sched.add_node(NodeId(1));
        sched.add_node(NodeId(2));
        sched.try_add_link(LinkId(1), NodeId(1), NodeId(2)).unwrap();
        let result = sched.try_add_link(LinkId(2), NodeId(2), NodeId(1));
        assert!(result.is_err());
        // The rejected edge must not have been left in the graph.
        assert!(sched.topological_order().is_ok());
    }

    #[test]
    fn remove_link_drops_edge() {
        let mut sched = Scheduler::new();
        sched.add_node(NodeId(1));
        sched.add_node(NodeId(2));
        sched.try_add_link(LinkId(1), NodeId(1), NodeId(2)).unwrap();
        sched.remove_link(NodeId(1), NodeId(2));
        // Re-adding in the opposite direction should now succeed, which
        // would have cycled if the old edge was still present.
        sched.try_add_link(LinkId(2), NodeId(2), NodeId(1)).unwrap();
    }
}
