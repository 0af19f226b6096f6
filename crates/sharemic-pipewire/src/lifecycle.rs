//! Ownership of the virtual sink and of every link we created.

use std::collections::BTreeMap;

use sharemic_core::keys;
use tracing::{debug, info, warn};

use crate::backend::GraphBackend;
use crate::graph::GraphMirror;
use crate::link::{CreatedLink, LinkParams};
use crate::mapping::map_ports;

/// The virtual microphone node we created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualSink {
    /// PipeWire global ID
    pub id: u32,
}

/// Creates and destroys our links, keyed by the node that caused them.
#[derive(Debug, Default)]
pub struct LinkManager {
    sink: Option<VirtualSink>,
    /// Routed node ID -> links from that node into the sink
    created: BTreeMap<u32, Vec<CreatedLink>>,
    /// Node carrying a `target.object` redirect onto the sink
    redirect: Option<u32>,
}

impl LinkManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sink(&self) -> Option<VirtualSink> {
        self.sink
    }

    pub fn attach_sink(&mut self, sink: VirtualSink) {
        self.sink = Some(sink);
    }

    /// Links created for a node.
    #[must_use]
    pub fn created_for(&self, node_id: u32) -> &[CreatedLink] {
        self.created.get(&node_id).map_or(&[], Vec::as_slice)
    }

    /// IDs of all nodes we currently route.
    pub fn routed_nodes(&self) -> impl Iterator<Item = u32> + '_ {
        self.created.keys().copied()
    }

    /// Total number of links we own.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn redirect(&self) -> Option<u32> {
        self.redirect
    }

    pub fn set_redirect(&mut self, node_id: u32) {
        self.redirect = Some(node_id);
    }

    /// Connect a node's outputs to the sink.
    ///
    /// Pairs that are already linked are kept, links that no longer match the
    /// mapping are destroyed. A failed link creation stops this call; the next
    /// event for the node retries. Returns the number of links created.
    pub fn route<B: GraphBackend>(&mut self, backend: &mut B, graph: &GraphMirror, node_id: u32) -> usize {
        let Some(sink) = self.sink else {
            return 0;
        };

        if node_id == sink.id {
            warn!(id = node_id, "Prevented link to self");
            return 0;
        }

        let Some(target) = graph.node(node_id) else {
            warn!(id = node_id, "Called with unknown node");
            return 0;
        };

        let Some(sink_node) = graph.node(sink.id) else {
            warn!(id = sink.id, "Virtual sink missing from graph");
            return 0;
        };

        let outputs: Vec<_> = target.output_ports().collect();
        if outputs.is_empty() {
            warn!(id = node_id, "Node has no output ports");
            return 0;
        }

        let inputs: Vec<_> = sink_node.input_ports().collect();
        let mut mapping = map_ports(&outputs, &inputs);

        let existing = self.created.entry(node_id).or_default();

        existing.retain(|link| {
            let keep = mapping.iter().any(|pair| pair.is_linked_by(link));
            if !keep {
                debug!(id = link.id, node = node_id, "Dropping stale link");
                backend.destroy_link(link.id);
            }
            keep
        });

        mapping.retain(|pair| !existing.iter().any(|link| pair.is_linked_by(link)));

        let mut count = 0;
        for pair in mapping {
            let params = LinkParams::new(node_id, pair.target_port, sink.id, pair.sink_port);

            match backend.create_link(&params) {
                Ok(id) => {
                    debug!(
                        id,
                        sink_port = pair.sink_port,
                        target_port = pair.target_port,
                        channel = %pair.channel,
                        "Created link"
                    );
                    existing.push(CreatedLink { id, sink_port: pair.sink_port, target_port: pair.target_port });
                    count += 1;
                }
                Err(e) => {
                    warn!(
                        sink_port = pair.sink_port,
                        target_port = pair.target_port,
                        error = %e,
                        "Failed to link"
                    );
                    break;
                }
            }
        }

        if existing.is_empty() {
            self.created.remove(&node_id);
        } else {
            debug!(id = node_id, links = existing.len(), "Node routed");
        }

        count
    }

    /// Destroy every link created for a node.
    pub fn unroute<B: GraphBackend>(&mut self, backend: &mut B, node_id: u32) {
        if let Some(links) = self.created.remove(&node_id) {
            debug!(id = node_id, links = links.len(), "Unrouting node");
            for link in links {
                backend.destroy_link(link.id);
            }
        }
    }

    /// Drop all our links, lift the redirect and optionally the sink too.
    pub fn reset<B: GraphBackend>(&mut self, backend: &mut B, destroy_sink: bool) {
        for (_, links) in std::mem::take(&mut self.created) {
            for link in links {
                backend.destroy_link(link.id);
            }
        }

        if let Some(target) = self.redirect.take() {
            for key in [keys::TARGET_NODE, keys::TARGET_OBJECT] {
                if let Err(e) = backend.clear_metadata(target, key) {
                    warn!(id = target, key, error = %e, "Failed to clear redirect");
                }
            }
        }

        if destroy_sink {
            if let Some(sink) = self.sink.take() {
                info!(id = sink.id, "Destroying virtual sink");
                backend.destroy_sink(sink.id);
            }
        }
    }

    /// Forget everything tied to an object the server removed.
    pub fn forget<B: GraphBackend>(&mut self, backend: &mut B, id: u32) {
        self.unroute(backend, id);

        // One of our links went away underneath us; the next event for its
        // node recreates it.
        self.created.retain(|_, links| {
            links.retain(|link| link.id != id);
            !links.is_empty()
        });

        if self.redirect == Some(id) {
            self.redirect = None;
        }

        if self.sink.is_some_and(|s| s.id == id) {
            warn!(id, "Virtual sink was removed by the server");
            self.sink = None;
            self.reset(backend, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, stereo_node};

    fn setup() -> (MockBackend, GraphMirror, LinkManager) {
        let mut backend = MockBackend::new();
        let mut graph = GraphMirror::new();
        let mut links = LinkManager::new();

        let sink = backend.add_sink_to(&mut graph);
        links.attach_sink(VirtualSink { id: sink });

        (backend, graph, links)
    }

    #[test]
    fn test_route_without_sink_is_noop() {
        let mut backend = MockBackend::new();
        let mut graph = GraphMirror::new();
        stereo_node(&mut graph, 10, "foo");

        let mut links = LinkManager::new();
        assert_eq!(links.route(&mut backend, &graph, 10), 0);
        assert!(backend.live_links().is_empty());
    }

    #[test]
    fn test_route_self_is_noop() {
        let (mut backend, graph, mut links) = setup();
        let sink = links.sink().expect("sink").id;

        assert_eq!(links.route(&mut backend, &graph, sink), 0);
        assert_eq!(links.created_count(), 0);
    }

    #[test]
    fn test_route_unknown_node_is_noop() {
        let (mut backend, graph, mut links) = setup();

        assert_eq!(links.route(&mut backend, &graph, 999), 0);
        assert!(backend.live_links().is_empty());
    }

    #[test]
    fn test_route_is_idempotent() {
        let (mut backend, mut graph, mut links) = setup();
        stereo_node(&mut graph, 10, "foo");

        assert_eq!(links.route(&mut backend, &graph, 10), 2);
        assert_eq!(links.route(&mut backend, &graph, 10), 0);
        assert_eq!(links.created_for(10).len(), 2);
        assert_eq!(backend.live_links().len(), 2);
        assert!(backend.destroyed_links.is_empty());
    }

    #[test]
    fn test_failed_link_aborts_remaining_pairs() {
        let (mut backend, mut graph, mut links) = setup();
        stereo_node(&mut graph, 10, "foo");
        backend.fail_links_after = Some(1);

        assert_eq!(links.route(&mut backend, &graph, 10), 1);
        assert_eq!(links.created_for(10).len(), 1);

        backend.fail_links_after = None;
        assert_eq!(links.route(&mut backend, &graph, 10), 1);
        assert_eq!(links.created_for(10).len(), 2);
    }

    #[test]
    fn test_unroute_destroys_links() {
        let (mut backend, mut graph, mut links) = setup();
        stereo_node(&mut graph, 10, "foo");
        links.route(&mut backend, &graph, 10);

        links.unroute(&mut backend, 10);

        assert!(links.created_for(10).is_empty());
        assert!(backend.live_links().is_empty());
        assert_eq!(backend.destroyed_links.len(), 2);
    }

    #[test]
    fn test_reset_keeps_or_destroys_sink() {
        let (mut backend, mut graph, mut links) = setup();
        stereo_node(&mut graph, 10, "foo");
        links.route(&mut backend, &graph, 10);

        links.reset(&mut backend, false);
        assert!(links.sink().is_some());
        assert_eq!(links.created_count(), 0);

        links.reset(&mut backend, true);
        assert!(links.sink().is_none());
        assert_eq!(backend.destroyed_sinks.len(), 1);
    }

    #[test]
    fn test_reset_clears_redirect() {
        let (mut backend, _graph, mut links) = setup();
        backend.set_metadata(10, "target.node", "Spa:Id", "5").expect("metadata");
        backend.set_metadata(10, "target.object", "Spa:Id", "77").expect("metadata");
        links.set_redirect(10);

        links.reset(&mut backend, false);

        assert!(links.redirect().is_none());
        assert!(backend.metadata.is_empty());
    }

    #[test]
    fn test_forget_removed_link() {
        let (mut backend, mut graph, mut links) = setup();
        stereo_node(&mut graph, 10, "foo");
        links.route(&mut backend, &graph, 10);
        let gone = links.created_for(10)[0].id;

        links.forget(&mut backend, gone);

        assert_eq!(links.created_for(10).len(), 1);
        assert_eq!(links.route(&mut backend, &graph, 10), 1);
    }

    #[test]
    fn test_forget_sink_drops_everything() {
        let (mut backend, mut graph, mut links) = setup();
        let sink = links.sink().expect("sink").id;
        stereo_node(&mut graph, 10, "foo");
        links.route(&mut backend, &graph, 10);

        links.forget(&mut backend, sink);

        assert!(links.sink().is_none());
        assert_eq!(links.created_count(), 0);
        assert!(backend.destroyed_sinks.is_empty());
    }
}
