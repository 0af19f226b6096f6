//! The engine loop state machine.
//!
//! [`Engine`] owns the graph mirror, the active [`FilterSpec`], the default
//! speaker and the [`LinkManager`]. It is driven by two ordered streams:
//! graph events from the audio server and commands from the facade. Both are
//! handled on the single thread that owns the backend.

use std::time::{Duration, Instant};

use sharemic_core::{Command, FilterSpec, Properties, Reply, RoutingMode, keys};
use tracing::{debug, info, trace, warn};

use crate::backend::{GraphBackend, SPA_ID_TYPE};
use crate::error::{PwError, PwResult};
use crate::graph::{GraphMirror, Removed};
use crate::lifecycle::{LinkManager, VirtualSink};
use crate::monitor::{GraphEvent, parse_speaker_name};
use crate::node::{NodeInfo, VirtualSinkProps};

/// Properties a node must carry to be listed when the caller names none.
pub const DEFAULT_LIST_PROPS: [&str; 2] = [keys::APP_NAME, keys::NODE_NAME];

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long the facade waits for the engine thread to come up
    pub ready_timeout: Duration,
    /// `node.name` of the virtual microphone
    pub sink_name: String,
    /// How long to wait for the virtual microphone's ports
    pub sink_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(1),
            sink_name: "sharemic-screen-share".to_string(),
            sink_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No filter spec, no virtual sink
    Idle,
    /// A filter spec is active
    Routing,
}

/// How the loop was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Clean up, acknowledge and stop
    Quit,
    /// Stop without touching the graph
    Abort,
}

/// The current default playback device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Speaker {
    /// `node.name` from the default metadata
    pub name: String,
    /// Node ID, once a node with that name was seen
    pub id: Option<u32>,
}

pub struct Engine<B: GraphBackend> {
    backend: B,
    config: EngineConfig,
    graph: GraphMirror,
    links: LinkManager,
    spec: Option<FilterSpec>,
    speaker: Option<Speaker>,
    /// ID of the bound "default" metadata object
    metadata: Option<u32>,
    exit: Option<Exit>,
}

impl<B: GraphBackend> Engine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            graph: GraphMirror::new(),
            links: LinkManager::new(),
            spec: None,
            speaker: None,
            metadata: None,
            exit: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        if self.spec.is_some() { EngineState::Routing } else { EngineState::Idle }
    }

    #[must_use]
    pub fn graph(&self) -> &GraphMirror {
        &self.graph
    }

    #[must_use]
    pub fn links(&self) -> &LinkManager {
        &self.links
    }

    #[must_use]
    pub fn spec(&self) -> Option<&FilterSpec> {
        self.spec.as_ref()
    }

    #[must_use]
    pub fn speaker(&self) -> Option<&Speaker> {
        self.speaker.as_ref()
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Set once a quit or abort command was handled.
    #[must_use]
    pub fn exit(&self) -> Option<Exit> {
        self.exit
    }

    /// Dispatch server messages for up to `timeout` and apply the resulting
    /// events.
    ///
    /// # Errors
    /// Returns an error if the backend connection failed.
    pub fn poll(&mut self, timeout: Duration) -> PwResult<()> {
        for event in self.backend.pump(timeout)? {
            self.handle_event(event);
        }
        Ok(())
    }

    /// Apply one graph event and re-evaluate whatever it affects.
    pub fn handle_event(&mut self, event: GraphEvent) {
        match event {
            GraphEvent::NodeInfo { id, props, max_output_ports } => {
                self.graph.upsert_node(id, props, max_output_ports);
                self.on_new_node(id);
            }
            GraphEvent::PortAdded { node_id, port } => {
                self.graph.append_port(node_id, port);
                // Ports may arrive after their node
                self.on_node(node_id);
            }
            GraphEvent::LinkAdded(link) => {
                self.graph.upsert_link(link);
                self.on_link(link.id);
            }
            GraphEvent::DefaultMetadata { id } => {
                info!(id, "Found default metadata");
                self.metadata = Some(id);
            }
            GraphEvent::MetadataProperty { subject, key, value } => {
                self.on_metadata(subject, key.as_deref(), value.as_deref());
            }
            GraphEvent::Removed { id } => self.on_removed(id),
        }
    }

    /// Handle one facade command. Returns the reply to send back, if the
    /// command has one.
    pub fn handle_command(&mut self, command: Command) -> Option<Reply> {
        debug!(command = command.name(), "Handling command");

        match command {
            Command::ListNodes { props } => Some(Reply::Nodes(self.list_nodes(&props))),
            Command::Link(spec) => {
                self.link(spec);
                None
            }
            Command::Unlink => {
                self.unlink();
                None
            }
            Command::Quit => {
                self.unlink();
                // Link destruction and metadata clears must reach the server
                // before the connection is dropped
                match self.backend.sync() {
                    Ok(events) => {
                        for event in events {
                            self.handle_event(event);
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to flush cleanup before quitting"),
                }
                self.exit = Some(Exit::Quit);
                Some(Reply::Quit)
            }
            Command::Abort => {
                warn!("Aborting engine loop");
                self.exit = Some(Exit::Abort);
                None
            }
        }
    }

    fn list_nodes(&mut self, props: &[String]) -> Vec<Properties> {
        match self.backend.sync() {
            Ok(events) => {
                for event in events {
                    self.handle_event(event);
                }
            }
            Err(e) => warn!(error = %e, "Failed to sync before listing"),
        }

        let required: Vec<&str> = if props.is_empty() {
            DEFAULT_LIST_PROPS.to_vec()
        } else {
            props.iter().map(String::as_str).collect()
        };

        self.graph
            .nodes()
            .filter(|node| node.can_output())
            .filter(|node| required.iter().all(|key| node.properties.get(*key).is_some_and(|v| !v.is_empty())))
            .map(|node| node.properties.clone())
            .collect()
    }

    fn link(&mut self, spec: FilterSpec) {
        if let Err(e) = self.ensure_sink() {
            warn!(error = %e, "Failed to create virtual sink");
            return;
        }

        info!(mode = ?spec.mode(), include = spec.include.len(), exclude = spec.exclude.len(), "Filter updated");
        self.spec = Some(spec);
        self.reload();
    }

    fn unlink(&mut self) {
        self.links.reset(&mut self.backend, true);
        if self.spec.take().is_some() {
            info!("Routing stopped");
        }
    }

    /// Create the virtual sink unless it exists, then wait until it reports
    /// all of its ports.
    fn ensure_sink(&mut self) -> PwResult<()> {
        if self.links.sink().is_some() {
            return Ok(());
        }

        let props = VirtualSinkProps::stereo_mic(&self.config.sink_name);
        let id = self.backend.create_sink(&props)?;
        info!(id, name = %props.name, "Created virtual sink");

        let deadline = Instant::now() + self.config.sink_timeout;

        loop {
            let ports = self.graph.node(id).map_or(0, |n| n.ports.len());
            if ports >= props.expected_ports() {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                self.backend.destroy_sink(id);
                return Err(PwError::NodeCreationFailed(format!(
                    "{} reported {ports} of {} ports within {:?}",
                    props.name,
                    props.expected_ports(),
                    self.config.sink_timeout
                )));
            }

            let events = match self.backend.pump(deadline - now) {
                Ok(events) => events,
                Err(e) => {
                    self.backend.destroy_sink(id);
                    return Err(e);
                }
            };

            for event in events {
                self.handle_event(event);
            }
        }

        debug!(id, "Virtual sink ready");
        self.links.attach_sink(VirtualSink { id });
        Ok(())
    }

    /// Drop all links and re-evaluate every known node and link.
    fn reload(&mut self) {
        self.links.reset(&mut self.backend, false);

        for id in self.graph.node_ids() {
            self.on_node(id);
        }

        for id in self.graph.link_ids() {
            self.on_link(id);
        }

        debug!(links = self.links.created_count(), "Reload finished");
    }

    fn on_new_node(&mut self, id: u32) {
        if self.links.sink().is_some() && self.metadata.is_some() {
            let wanted = match (&self.spec, self.graph.node(id)) {
                (Some(spec), Some(node)) => spec.wants_workaround(&node.properties),
                _ => false,
            };

            if wanted {
                self.apply_workaround(id);
                return;
            }
        }

        self.on_node(id);
    }

    /// Point a node at the virtual sink through metadata. Applied at most
    /// once per filter spec.
    fn apply_workaround(&mut self, id: u32) {
        let Some(sink) = self.links.sink() else {
            return;
        };

        let serial = self.graph.node(sink.id).and_then(NodeInfo::serial).unwrap_or_default().to_string();
        debug!(id, serial = %serial, "Applying workaround");

        let writes = [(keys::TARGET_OBJECT, serial), (keys::TARGET_NODE, sink.id.to_string())];
        for (key, value) in writes {
            if let Err(e) = self.backend.set_metadata(id, key, SPA_ID_TYPE, &value) {
                warn!(id, key, error = %e, "Failed to set redirect");
            }
        }

        self.links.set_redirect(id);
        if let Some(spec) = self.spec.as_mut() {
            spec.workaround.clear();
        }
    }

    fn on_node(&mut self, id: u32) {
        let Some(node) = self.graph.node(id) else {
            return;
        };

        if let Some(speaker) = self.speaker.as_mut() {
            if !speaker.name.is_empty() && node.name() == speaker.name {
                debug!(id, name = %speaker.name, "Speaker resolved");
                speaker.id = Some(id);
                return;
            }
        }

        let Some(spec) = &self.spec else {
            return;
        };

        if spec.mode() != RoutingMode::Include {
            return;
        }

        if node.ports.is_empty() {
            trace!(id, "Node has no ports");
            return;
        }

        if spec.is_excluded(&node.properties) {
            debug!(id, "Node is excluded");
            return;
        }

        if !spec.is_included(&node.properties) {
            trace!(id, "Node is not included");
            return;
        }

        self.route(id);
    }

    fn on_link(&mut self, id: u32) {
        let Some(spec) = &self.spec else {
            return;
        };

        let Some(link) = self.graph.link(id).copied() else {
            return;
        };

        match spec.mode() {
            RoutingMode::Include => return,
            RoutingMode::DefaultSpeaker => {
                let speaker = self.speaker.as_ref().and_then(|s| s.id);
                if speaker != Some(link.input_node) {
                    trace!(id, input = link.input_node, "Link does not reach the speaker");
                    return;
                }
            }
            RoutingMode::AnyDevice => {
                if !self.graph.node(link.input_node).is_some_and(NodeInfo::is_device) {
                    trace!(id, input = link.input_node, "Link does not reach a device");
                    return;
                }
            }
        }

        if self.graph.node(link.output_node).is_some_and(|n| spec.is_excluded(&n.properties)) {
            trace!(id, output = link.output_node, "Link source is excluded");
            return;
        }

        self.route(link.output_node);
    }

    fn route(&mut self, id: u32) {
        let (Some(spec), Some(node)) = (&self.spec, self.graph.node(id)) else {
            return;
        };

        if !spec.permits(&node.properties) {
            debug!(id, class = %node.media_class(), device = node.is_device(), "Prevented link");
            return;
        }

        self.links.route(&mut self.backend, &self.graph, id);
    }

    fn on_metadata(&mut self, subject: u32, key: Option<&str>, value: Option<&str>) {
        trace!(subject, key, value, "Metadata property changed");

        if key != Some(keys::DEFAULT_AUDIO_SINK) {
            return;
        }

        let Some(value) = value else {
            debug!("Default sink cleared, keeping speaker");
            return;
        };

        let Some(name) = parse_speaker_name(value) else {
            warn!(value, "Failed to parse speaker");
            return;
        };

        info!(name = %name, "Speaker changed");
        self.speaker = Some(Speaker { name, id: None });
        self.reload();
    }

    fn on_removed(&mut self, id: u32) {
        match self.graph.remove(id) {
            Removed::Node(node) => {
                trace!(id, name = %node.name(), "Node removed");
                if self.speaker.as_ref().is_some_and(|s| s.id == Some(id)) {
                    debug!(id, "Speaker node removed");
                    if let Some(speaker) = self.speaker.as_mut() {
                        speaker.id = None;
                    }
                }
            }
            Removed::Link(_) | Removed::Port { .. } => {}
            Removed::Unknown => {
                if self.metadata == Some(id) {
                    warn!(id, "Default metadata removed");
                    self.metadata = None;
                }
            }
        }

        let had_sink = self.links.sink().is_some();
        self.links.forget(&mut self.backend, id);

        if had_sink && self.links.sink().is_none() && self.spec.take().is_some() {
            warn!(id, "Virtual sink removed by the server, routing stopped");
        }
    }
}
