//! Graph change events and the parsing of registry properties into them.
//!
//! The PipeWire thread turns registry and proxy callbacks into
//! [`GraphEvent`]s; the engine consumes them in order.

use serde::Deserialize;
use sharemic_core::{Properties, keys};
use tracing::{trace, warn};

use crate::link::LinkInfo;
use crate::node::{PortDirection, PortInfo};

/// Events produced by the audio server connection.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// A node was announced or its info changed
    NodeInfo { id: u32, props: Option<Properties>, max_output_ports: u32 },
    /// A port was announced
    PortAdded { node_id: u32, port: PortInfo },
    /// A link was announced
    LinkAdded(LinkInfo),
    /// The "default" metadata object was bound
    DefaultMetadata { id: u32 },
    /// A property on the "default" metadata object changed
    MetadataProperty { subject: u32, key: Option<String>, value: Option<String> },
    /// Any global went away
    Removed { id: u32 },
}

fn parse_id(props: &Properties, key: &str) -> Option<u32> {
    props.get(key).and_then(|v| v.parse().ok())
}

/// Build a port event from registry global properties.
///
/// Ports without a parseable parent are skipped with a warning.
#[must_use]
pub fn port_event(id: u32, props: Properties) -> Option<GraphEvent> {
    let Some(raw_parent) = props.get(keys::NODE_ID) else {
        warn!(id, "Port has no parent");
        return None;
    };

    let Ok(node_id) = raw_parent.parse::<u32>() else {
        warn!(id, parent = %raw_parent, "Failed to parse parent node");
        return None;
    };

    let Some(direction) = props.get(keys::PORT_DIRECTION).and_then(|d| PortDirection::parse(d)) else {
        warn!(id, node_id, "Port has no direction");
        return None;
    };

    trace!(id, node_id, ?direction, "New port");
    Some(GraphEvent::PortAdded { node_id, port: PortInfo { id, direction, properties: props } })
}

/// Build a link event from registry global properties.
#[must_use]
pub fn link_event(id: u32, props: &Properties) -> Option<GraphEvent> {
    let link = LinkInfo {
        id,
        output_node: parse_id(props, "link.output.node")?,
        output_port: parse_id(props, "link.output.port")?,
        input_node: parse_id(props, "link.input.node")?,
        input_port: parse_id(props, "link.input.port")?,
    };

    Some(GraphEvent::LinkAdded(link))
}

#[derive(Deserialize)]
struct MetadataName {
    name: String,
}

/// Extract the node name from a `default.audio.sink` value such as
/// `{ "name": "alsa_output.pci-0000_00_1f.3.analog-stereo" }`.
#[must_use]
pub fn parse_speaker_name(value: &str) -> Option<String> {
    serde_json::from_str::<MetadataName>(value).ok().map(|m| m.name)
}
