//! In-memory backend and graph fixtures for unit tests.

use std::collections::BTreeMap;
use std::time::Duration;

use sharemic_core::Properties;

use crate::backend::GraphBackend;
use crate::error::{PwError, PwResult};
use crate::graph::GraphMirror;
use crate::link::{LinkInfo, LinkParams};
use crate::monitor::GraphEvent;
use crate::node::{PortDirection, PortInfo, VirtualSinkProps};

pub fn props(pairs: &[(&str, &str)]) -> Properties {
    pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

pub fn port(id: u32, direction: PortDirection, index: usize, channel: &str) -> PortInfo {
    PortInfo {
        id,
        direction,
        properties: props(&[("audio.channel", channel), ("port.id", &index.to_string())]),
    }
}

/// Events announcing an application node with one output port per channel.
/// Port IDs are `id * 10 + index`.
pub fn app_events(id: u32, app: &str, channels: &[&str]) -> Vec<GraphEvent> {
    let mut events = vec![GraphEvent::NodeInfo {
        id,
        props: Some(props(&[
            ("application.name", app),
            ("node.name", app),
            ("media.class", "Stream/Output/Audio"),
        ])),
        max_output_ports: u32::try_from(channels.len()).unwrap_or(u32::MAX),
    }];

    events.extend(channels.iter().enumerate().map(|(i, ch)| GraphEvent::PortAdded {
        node_id: id,
        port: port(id * 10 + i as u32, PortDirection::Output, i, ch),
    }));

    events
}

/// Events announcing a hardware playback device with stereo inputs.
pub fn device_events(id: u32, name: &str) -> Vec<GraphEvent> {
    vec![
        GraphEvent::NodeInfo {
            id,
            props: Some(props(&[("node.name", name), ("device.id", "42"), ("media.class", "Audio/Sink")])),
            max_output_ports: 0,
        },
        GraphEvent::PortAdded { node_id: id, port: port(id * 10, PortDirection::Input, 0, "FL") },
        GraphEvent::PortAdded { node_id: id, port: port(id * 10 + 1, PortDirection::Input, 1, "FR") },
    ]
}

pub fn link_event(id: u32, output_node: u32, input_node: u32) -> GraphEvent {
    GraphEvent::LinkAdded(LinkInfo {
        id,
        output_node,
        output_port: output_node * 10,
        input_node,
        input_port: input_node * 10,
    })
}

/// Apply node and port events straight to a mirror.
pub fn apply(graph: &mut GraphMirror, events: Vec<GraphEvent>) {
    for event in events {
        match event {
            GraphEvent::NodeInfo { id, props, max_output_ports } => {
                graph.upsert_node(id, props, max_output_ports);
            }
            GraphEvent::PortAdded { node_id, port } => graph.append_port(node_id, port),
            GraphEvent::LinkAdded(link) => graph.upsert_link(link),
            _ => {}
        }
    }
}

/// Insert a stereo application node into a mirror.
pub fn stereo_node(graph: &mut GraphMirror, id: u32, app: &str) {
    apply(graph, app_events(id, app, &["FL", "FR"]));
}

fn sink_events(id: u32, name: &str) -> Vec<GraphEvent> {
    let serial = (id + 5000).to_string();
    let mut events = vec![GraphEvent::NodeInfo {
        id,
        props: Some(props(&[
            ("node.name", name),
            ("media.class", "Audio/Source/Virtual"),
            ("object.serial", &serial),
        ])),
        max_output_ports: 2,
    }];

    let layout = [
        (PortDirection::Input, 0, "FL"),
        (PortDirection::Input, 1, "FR"),
        (PortDirection::Output, 0, "FL"),
        (PortDirection::Output, 1, "FR"),
    ];
    for (offset, (direction, index, channel)) in (1..).zip(layout) {
        events.push(GraphEvent::PortAdded { node_id: id, port: port(id + offset, direction, index, channel) });
    }

    events
}

/// Backend that keeps the server side in memory.
///
/// Objects it creates are announced through the next `pump`/`sync`, the
/// same way the registry announces them.
#[derive(Debug)]
pub struct MockBackend {
    next_id: u32,
    pending: Vec<GraphEvent>,
    links_created: usize,
    /// Links that currently exist, by ID
    pub live: BTreeMap<u32, LinkParams>,
    pub destroyed_links: Vec<u32>,
    pub sinks: Vec<u32>,
    pub destroyed_sinks: Vec<u32>,
    /// (subject, key) -> value
    pub metadata: BTreeMap<(u32, String), String>,
    /// Fail every `create_link` once this many links were created
    pub fail_links_after: Option<usize>,
    /// Whether a created sink announces its ports
    pub announce_sink_ports: bool,
    pub syncs: usize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            next_id: 1000,
            pending: Vec::new(),
            links_created: 0,
            live: BTreeMap::new(),
            destroyed_links: Vec::new(),
            sinks: Vec::new(),
            destroyed_sinks: Vec::new(),
            metadata: BTreeMap::new(),
            fail_links_after: None,
            announce_sink_ports: true,
            syncs: 0,
        }
    }

    fn allocate(&mut self, count: u32) -> u32 {
        let id = self.next_id;
        self.next_id += count;
        id
    }

    /// Queue events as if the server had sent them.
    pub fn inject(&mut self, events: impl IntoIterator<Item = GraphEvent>) {
        self.pending.extend(events);
    }

    /// Create a sink and put it into a mirror directly.
    pub fn add_sink_to(&mut self, graph: &mut GraphMirror) -> u32 {
        let id = self.allocate(5);
        self.sinks.push(id);
        apply(graph, sink_events(id, "sharemic-screen-share"));
        id
    }

    pub fn live_links(&self) -> Vec<u32> {
        self.live.keys().copied().collect()
    }

    /// Live links leaving the given node.
    pub fn links_from(&self, node_id: u32) -> usize {
        self.live.values().filter(|l| l.output_node == node_id).count()
    }
}

impl GraphBackend for MockBackend {
    fn pump(&mut self, _timeout: Duration) -> PwResult<Vec<GraphEvent>> {
        Ok(std::mem::take(&mut self.pending))
    }

    fn sync(&mut self) -> PwResult<Vec<GraphEvent>> {
        self.syncs += 1;
        Ok(std::mem::take(&mut self.pending))
    }

    fn create_sink(&mut self, props: &VirtualSinkProps) -> PwResult<u32> {
        let id = self.allocate(5);
        self.sinks.push(id);

        let mut events = sink_events(id, &props.name);
        if !self.announce_sink_ports {
            events.truncate(1);
        }
        self.pending.extend(events);

        Ok(id)
    }

    fn destroy_sink(&mut self, id: u32) {
        self.destroyed_sinks.push(id);
        self.pending.extend((1..=4).map(|offset| GraphEvent::Removed { id: id + offset }));
        self.pending.push(GraphEvent::Removed { id });
    }

    fn create_link(&mut self, params: &LinkParams) -> PwResult<u32> {
        if self.fail_links_after.is_some_and(|limit| self.links_created >= limit) {
            return Err(PwError::LinkCreationFailed("refused by mock".to_string()));
        }

        let id = self.allocate(1);
        self.links_created += 1;
        self.live.insert(id, params.clone());
        self.pending.push(GraphEvent::LinkAdded(LinkInfo {
            id,
            output_node: params.output_node,
            output_port: params.output_port,
            input_node: params.input_node,
            input_port: params.input_port,
        }));

        Ok(id)
    }

    fn destroy_link(&mut self, id: u32) {
        if self.live.remove(&id).is_some() {
            self.destroyed_links.push(id);
            self.pending.push(GraphEvent::Removed { id });
        }
    }

    fn set_metadata(&mut self, subject: u32, key: &str, _type_: &str, value: &str) -> PwResult<()> {
        self.metadata.insert((subject, key.to_string()), value.to_string());
        Ok(())
    }

    fn clear_metadata(&mut self, subject: u32, key: &str) -> PwResult<()> {
        self.metadata.remove(&(subject, key.to_string()));
        Ok(())
    }
}
