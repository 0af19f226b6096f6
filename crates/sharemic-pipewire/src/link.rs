//! PipeWire link model.

use serde::{Deserialize, Serialize};

/// A link that exists somewhere in the graph, created by anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    /// PipeWire global ID
    pub id: u32,
    /// Output (source) node ID
    pub output_node: u32,
    /// Output port ID
    pub output_port: u32,
    /// Input (destination) node ID
    pub input_node: u32,
    /// Input port ID
    pub input_port: u32,
}

/// A link created by us from a routed node into the virtual sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedLink {
    /// PipeWire global ID of the link
    pub id: u32,
    /// Virtual sink input port
    pub sink_port: u32,
    /// Routed node output port
    pub target_port: u32,
}

/// Parameters for creating a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkParams {
    /// Output node ID
    pub output_node: u32,
    /// Output port ID
    pub output_port: u32,
    /// Input node ID
    pub input_node: u32,
    /// Input port ID
    pub input_port: u32,
    /// Whether the link should persist after its proxy is gone
    pub linger: bool,
}

impl LinkParams {
    /// Create parameters for a link owned by this client.
    #[must_use]
    pub fn new(output_node: u32, output_port: u32, input_node: u32, input_port: u32) -> Self {
        Self { output_node, output_port, input_node, input_port, linger: false }
    }
}
