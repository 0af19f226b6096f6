//! In-memory mirror of the PipeWire graph.

use std::collections::{BTreeMap, HashMap};

use sharemic_core::Properties;
use tracing::{debug, trace};

use crate::link::LinkInfo;
use crate::node::{NodeInfo, PortInfo};

/// What a removal notification turned out to refer to.
#[derive(Debug, Clone, PartialEq)]
pub enum Removed {
    Node(NodeInfo),
    Link(LinkInfo),
    Port { node_id: u32 },
    /// An object we never mirrored (client, device, metadata...)
    Unknown,
}

/// Eventually-consistent copy of the nodes, ports and links we care about.
///
/// Only the engine loop touches the mirror, so it carries no locking.
/// Cross references (port -> node, link -> nodes) are plain IDs.
#[derive(Debug, Default)]
pub struct GraphMirror {
    /// Nodes by ID, each owning its ports
    nodes: BTreeMap<u32, NodeInfo>,
    /// Links by ID
    links: BTreeMap<u32, LinkInfo>,
    /// Port ID -> parent node ID
    port_owners: HashMap<u32, u32>,
}

impl GraphMirror {
    /// Create an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a node.
    ///
    /// `props` of `None` keeps the properties already known.
    pub fn upsert_node(&mut self, id: u32, props: Option<Properties>, max_output_ports: u32) -> &NodeInfo {
        let node = self.nodes.entry(id).or_insert_with(|| NodeInfo::placeholder(id));

        if let Some(props) = props {
            node.properties = props;
        }
        node.max_output_ports = max_output_ports;

        trace!(id, name = %node.name(), app = %node.application_name(), "Node updated");
        node
    }

    /// Append a port to its parent, creating a placeholder parent if the
    /// node has not been announced yet.
    pub fn append_port(&mut self, node_id: u32, port: PortInfo) {
        if let Some(previous) = self.port_owners.insert(port.id, node_id) {
            if previous != node_id {
                if let Some(old) = self.nodes.get_mut(&previous) {
                    old.ports.retain(|p| p.id != port.id);
                }
            }
        }

        let node = self.nodes.entry(node_id).or_insert_with(|| NodeInfo::placeholder(node_id));

        match node.ports.iter_mut().find(|p| p.id == port.id) {
            Some(existing) => *existing = port,
            None => {
                trace!(id = port.id, node_id, channel = %port.channel(), "Port added");
                node.ports.push(port);
            }
        }
    }

    /// Insert or update a link.
    pub fn upsert_link(&mut self, link: LinkInfo) {
        trace!(
            id = link.id,
            output_node = link.output_node,
            input_node = link.input_node,
            output_port = link.output_port,
            input_port = link.input_port,
            "Link updated"
        );
        self.links.insert(link.id, link);
    }

    /// Remove whatever object carries this ID.
    pub fn remove(&mut self, id: u32) -> Removed {
        if let Some(node) = self.nodes.remove(&id) {
            for port in &node.ports {
                self.port_owners.remove(&port.id);
            }
            debug!(id, name = %node.name(), "Node removed from graph");
            return Removed::Node(node);
        }

        if let Some(link) = self.links.remove(&id) {
            trace!(id, "Link removed from graph");
            return Removed::Link(link);
        }

        if let Some(node_id) = self.port_owners.remove(&id) {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.ports.retain(|p| p.id != id);
            }
            return Removed::Port { node_id };
        }

        Removed::Unknown
    }

    /// Get a node by ID.
    #[must_use]
    pub fn node(&self, id: u32) -> Option<&NodeInfo> {
        self.nodes.get(&id)
    }

    /// Get a link by ID.
    #[must_use]
    pub fn link(&self, id: u32) -> Option<&LinkInfo> {
        self.links.get(&id)
    }

    /// Get a node by name.
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.values().find(|n| n.name() == name)
    }

    /// All nodes, ordered by ID.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    /// All node IDs, ordered.
    #[must_use]
    pub fn node_ids(&self) -> Vec<u32> {
        self.nodes.keys().copied().collect()
    }

    /// All link IDs, ordered.
    #[must_use]
    pub fn link_ids(&self) -> Vec<u32> {
        self.links.keys().copied().collect()
    }

    #[must_use]
    pub fn contains_node(&self, id: u32) -> bool {
        self.nodes.contains_key(&id)
    }
}
