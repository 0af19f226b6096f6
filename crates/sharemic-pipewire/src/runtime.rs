//! PipeWire connection and the engine thread.
//!
//! Every PipeWire object lives on one thread. Registry and proxy callbacks
//! only append [`GraphEvent`]s to a buffer; the [`Engine`] drains that buffer
//! through [`GraphBackend::pump`], so no callback ever re-enters engine state.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use pipewire::context::ContextRc;
use pipewire::core::{CoreRc, PW_ID_CORE};
use pipewire::link::Link;
use pipewire::main_loop::MainLoopRc;
use pipewire::metadata::{Metadata, MetadataListener};
use pipewire::node::{Node, NodeListener};
use pipewire::properties::properties;
use pipewire::proxy::{ProxyListener, ProxyT};
use pipewire::registry::{GlobalObject, RegistryRc};
use pipewire::spa::utils::dict::DictRef;
use pipewire::types::ObjectType;
use sharemic_core::{Command, Properties, Reply, keys};
use tracing::{debug, error, info, trace, warn};

use crate::backend::GraphBackend;
use crate::engine::{Engine, EngineConfig, Exit};
use crate::error::{PwError, PwResult};
use crate::link::LinkParams;
use crate::monitor::{GraphEvent, link_event, port_event};
use crate::node::VirtualSinkProps;

/// Upper bound for a single loop iteration while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Granularity of blocking waits, so aborts are noticed quickly.
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// How long to wait for the server to acknowledge a created object.
const CREATE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a round-trip may take.
const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Reported by the core when the connection is gone.
const EPIPE: i32 = 32;

type EventBuffer = Rc<RefCell<Vec<GraphEvent>>>;

fn dict_to_props(dict: &DictRef) -> Properties {
    dict.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// A bound registry node; dropping it stops info updates.
struct BoundNode {
    _proxy: Node,
    _listener: NodeListener,
}

/// The bound "default" metadata object.
struct BoundMetadata {
    id: u32,
    proxy: Metadata,
    _listener: MetadataListener,
}

/// Objects bound from registry callbacks.
#[derive(Default)]
struct Bindings {
    nodes: HashMap<u32, BoundNode>,
    metadata: Option<BoundMetadata>,
    /// Links we created, by global ID
    links: HashMap<u32, Link>,
}

/// [`GraphBackend`] backed by a live PipeWire connection.
pub struct PipeWireBackend {
    main_loop: MainLoopRc,
    _context: ContextRc,
    core: CoreRc,
    registry: RegistryRc,
    events: EventBuffer,
    bindings: Rc<RefCell<Bindings>>,
    /// Virtual sinks we created, by global ID
    sinks: HashMap<u32, Node>,
    /// Sequence number of the last `done` from the core
    done: Rc<Cell<Option<i32>>>,
    /// Set when the core reported a fatal error
    broken: Rc<Cell<bool>>,
    abort: Arc<AtomicBool>,
    _core_listener: pipewire::core::Listener,
    _registry_listener: pipewire::registry::Listener,
}

impl PipeWireBackend {
    /// Connect to the PipeWire daemon and start listening to the registry.
    ///
    /// # Errors
    /// Returns an error if the main loop, context, core or registry cannot be
    /// created.
    pub fn connect(abort: Arc<AtomicBool>) -> PwResult<Self> {
        pipewire::init();

        let main_loop = MainLoopRc::new(None)
            .map_err(|e| PwError::MainLoopError(format!("Failed to create main loop: {e}")))?;

        let context = ContextRc::new(&main_loop, None)
            .map_err(|e| PwError::ConnectionFailed(format!("Failed to create context: {e}")))?;

        let core = context
            .connect_rc(None)
            .map_err(|e| PwError::ConnectionFailed(format!("Failed to connect: {e}")))?;

        let registry = core
            .get_registry_rc()
            .map_err(|e| PwError::RegistryError(format!("Failed to get registry: {e}")))?;

        info!("Connected to PipeWire");

        let events: EventBuffer = Rc::default();
        let bindings: Rc<RefCell<Bindings>> = Rc::default();
        let done = Rc::new(Cell::new(None));
        let broken = Rc::new(Cell::new(false));

        let core_listener = core
            .add_listener_local()
            .done({
                let done = Rc::clone(&done);
                move |id, seq| {
                    if id == PW_ID_CORE {
                        done.set(Some(seq.seq()));
                    }
                }
            })
            .error({
                let broken = Rc::clone(&broken);
                move |id, seq, res, message| {
                    warn!(id, seq, res, message, "PipeWire error");
                    if id == PW_ID_CORE && res == -EPIPE {
                        broken.set(true);
                    }
                }
            })
            .register();

        let registry_listener = registry
            .add_listener_local()
            .global({
                let registry = registry.clone();
                let events = Rc::clone(&events);
                let bindings = Rc::clone(&bindings);
                move |global| handle_global(&registry, &events, &bindings, global)
            })
            .global_remove({
                let events = Rc::clone(&events);
                let bindings = Rc::clone(&bindings);
                move |id| handle_global_remove(&events, &bindings, id)
            })
            .register();

        Ok(Self {
            main_loop,
            _context: context,
            core,
            registry,
            events,
            bindings,
            sinks: HashMap::new(),
            done,
            broken,
            abort,
            _core_listener: core_listener,
            _registry_listener: registry_listener,
        })
    }

    /// The main loop, for attaching command receivers.
    #[must_use]
    pub fn main_loop(&self) -> &MainLoopRc {
        &self.main_loop
    }

    fn iterate(&self, timeout: Duration) {
        let loop_ = self.main_loop.loop_();
        loop_.enter();
        let result = loop_.iterate(timeout);
        loop_.leave();

        if result < 0 {
            trace!(result, "Loop iteration interrupted");
        }
    }

    fn take_events(&self) -> Vec<GraphEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    fn check_connection(&self) -> PwResult<()> {
        if self.broken.get() {
            return Err(PwError::ConnectionFailed("Connection to PipeWire lost".to_string()));
        }
        Ok(())
    }

    /// Iterate until a created proxy is bound to a global, fails or times out.
    fn wait_bound(&self, bound: &Cell<Option<u32>>, failed: &RefCell<Option<String>>) -> Result<u32, String> {
        let deadline = Instant::now() + CREATE_TIMEOUT;

        loop {
            if let Some(id) = bound.get() {
                return Ok(id);
            }

            if let Some(message) = failed.borrow_mut().take() {
                return Err(message);
            }

            if self.broken.get() {
                return Err("connection lost".to_string());
            }

            if Instant::now() >= deadline {
                return Err("timed out waiting for the server".to_string());
            }

            self.iterate(WAIT_SLICE);
        }
    }

    /// Create an object through a factory and wait for its global ID.
    fn create_bound<T, D>(&self, factory: &str, props: &D) -> Result<(T, u32), String>
    where
        T: ProxyT + 'static,
        D: AsRef<DictRef>,
    {
        let proxy = self
            .core
            .create_object::<T>(factory, props)
            .map_err(|e| format!("Failed to create object: {e}"))?;

        let bound = Rc::new(Cell::new(None));
        let failed = Rc::new(RefCell::new(None));

        let listener: ProxyListener = proxy
            .upcast_ref()
            .add_listener_local()
            .bound({
                let bound = Rc::clone(&bound);
                move |id| bound.set(Some(id))
            })
            .error({
                let failed = Rc::clone(&failed);
                move |_seq, res, message| {
                    *failed.borrow_mut() = Some(format!("{message} ({res})"));
                }
            })
            .register();

        let id = self.wait_bound(&bound, &failed)?;
        drop(listener);

        Ok((proxy, id))
    }

    fn with_metadata<F>(&self, f: F) -> PwResult<()>
    where
        F: FnOnce(&Metadata),
    {
        let bindings = self.bindings.borrow();
        let Some(metadata) = bindings.metadata.as_ref() else {
            return Err(PwError::MetadataError("Default metadata is not bound".to_string()));
        };

        f(&metadata.proxy);
        Ok(())
    }
}

impl GraphBackend for PipeWireBackend {
    fn pump(&mut self, timeout: Duration) -> PwResult<Vec<GraphEvent>> {
        let timeout = if self.events.borrow().is_empty() { timeout } else { Duration::ZERO };
        self.iterate(timeout);
        self.check_connection()?;
        Ok(self.take_events())
    }

    fn sync(&mut self) -> PwResult<Vec<GraphEvent>> {
        let seq = self
            .core
            .sync(0)
            .map_err(|e| PwError::MainLoopError(format!("Failed to sync: {e}")))?
            .seq();

        let deadline = Instant::now() + SYNC_TIMEOUT;

        while self.done.get() != Some(seq) {
            if self.abort.load(Ordering::SeqCst) {
                return Err(PwError::Timeout("Sync aborted".to_string()));
            }

            if Instant::now() >= deadline {
                return Err(PwError::Timeout(format!("No reply to sync {seq}")));
            }

            self.check_connection()?;
            self.iterate(WAIT_SLICE);
        }

        trace!(seq, "Sync done");
        Ok(self.take_events())
    }

    fn create_sink(&mut self, props: &VirtualSinkProps) -> PwResult<u32> {
        info!(name = %props.name, "Creating virtual sink");

        let channels = props.channels.to_string();
        let node_props = properties! {
            "factory.name" => "support.null-audio-sink",
            "node.name" => props.name.as_str(),
            "node.description" => props.description.as_str(),
            "media.class" => props.media_class.as_str(),
            "audio.channels" => channels.as_str(),
            "audio.position" => props.positions.as_str(),
        };

        let (proxy, id) = self
            .create_bound::<Node, _>("adapter", &node_props)
            .map_err(|e| PwError::NodeCreationFailed(format!("{}: {e}", props.name)))?;

        debug!(id, name = %props.name, "Virtual sink bound");
        self.sinks.insert(id, proxy);

        Ok(id)
    }

    fn destroy_sink(&mut self, id: u32) {
        if self.sinks.remove(&id).is_some() {
            debug!(id, "Virtual sink destroyed");
        }
    }

    fn create_link(&mut self, params: &LinkParams) -> PwResult<u32> {
        let output_node = params.output_node.to_string();
        let output_port = params.output_port.to_string();
        let input_node = params.input_node.to_string();
        let input_port = params.input_port.to_string();

        let link_props = properties! {
            "link.output.node" => output_node.as_str(),
            "link.output.port" => output_port.as_str(),
            "link.input.node" => input_node.as_str(),
            "link.input.port" => input_port.as_str(),
            "object.linger" => if params.linger { "true" } else { "false" },
        };

        let (proxy, id) = self
            .create_bound::<Link, _>("link-factory", &link_props)
            .map_err(PwError::LinkCreationFailed)?;

        self.bindings.borrow_mut().links.insert(id, proxy);
        Ok(id)
    }

    fn destroy_link(&mut self, id: u32) {
        if self.bindings.borrow_mut().links.remove(&id).is_none() {
            trace!(id, "Link already gone");
            return;
        }

        match self.registry.destroy_global(id).into_result() {
            Ok(_) => trace!(id, "Link destroyed"),
            Err(e) => warn!(id, error = %e, "Failed to destroy link"),
        }
    }

    fn set_metadata(&mut self, subject: u32, key: &str, type_: &str, value: &str) -> PwResult<()> {
        self.with_metadata(|metadata| {
            metadata.set_property(subject, key, Some(type_), Some(value));
        })
    }

    fn clear_metadata(&mut self, subject: u32, key: &str) -> PwResult<()> {
        self.with_metadata(|metadata| {
            metadata.set_property(subject, key, None, None);
        })
    }
}

fn handle_global(
    registry: &RegistryRc,
    events: &EventBuffer,
    bindings: &Rc<RefCell<Bindings>>,
    global: &GlobalObject<&DictRef>,
) {
    let props = global.props.map(dict_to_props).unwrap_or_default();

    match global.type_ {
        ObjectType::Node => bind_node(registry, events, bindings, global),
        ObjectType::Port => {
            if let Some(event) = port_event(global.id, props) {
                events.borrow_mut().push(event);
            }
        }
        ObjectType::Link => match link_event(global.id, &props) {
            Some(event) => events.borrow_mut().push(event),
            None => trace!(id = global.id, "Link without endpoints"),
        },
        ObjectType::Metadata => {
            if props.get(keys::METADATA_NAME).map(String::as_str) == Some("default") {
                bind_metadata(registry, events, bindings, global);
            }
        }
        _ => {}
    }
}

fn bind_node(
    registry: &RegistryRc,
    events: &EventBuffer,
    bindings: &Rc<RefCell<Bindings>>,
    global: &GlobalObject<&DictRef>,
) {
    let proxy: Node = match registry.bind(global) {
        Ok(proxy) => proxy,
        Err(e) => {
            warn!(id = global.id, error = %e, "Failed to bind node");
            return;
        }
    };

    let listener = proxy
        .add_listener_local()
        .info({
            let events = Rc::clone(events);
            move |info| {
                events.borrow_mut().push(GraphEvent::NodeInfo {
                    id: info.id(),
                    props: info.props().map(dict_to_props),
                    max_output_ports: info.max_output_ports(),
                });
            }
        })
        .register();

    trace!(id = global.id, "Node bound");
    bindings.borrow_mut().nodes.insert(global.id, BoundNode { _proxy: proxy, _listener: listener });
}

fn bind_metadata(
    registry: &RegistryRc,
    events: &EventBuffer,
    bindings: &Rc<RefCell<Bindings>>,
    global: &GlobalObject<&DictRef>,
) {
    let proxy: Metadata = match registry.bind(global) {
        Ok(proxy) => proxy,
        Err(e) => {
            warn!(id = global.id, error = %e, "Failed to bind metadata");
            return;
        }
    };

    events.borrow_mut().push(GraphEvent::DefaultMetadata { id: global.id });

    let listener = proxy
        .add_listener_local()
        .property({
            let events = Rc::clone(events);
            move |subject, key, _type, value| {
                events.borrow_mut().push(GraphEvent::MetadataProperty {
                    subject,
                    key: key.map(str::to_string),
                    value: value.map(str::to_string),
                });
                0
            }
        })
        .register();

    bindings.borrow_mut().metadata = Some(BoundMetadata { id: global.id, proxy, _listener: listener });
}

fn handle_global_remove(events: &EventBuffer, bindings: &Rc<RefCell<Bindings>>, id: u32) {
    {
        let mut bindings = bindings.borrow_mut();
        bindings.nodes.remove(&id);
        bindings.links.remove(&id);

        if bindings.metadata.as_ref().is_some_and(|m| m.id == id) {
            bindings.metadata = None;
        }
    }

    events.borrow_mut().push(GraphEvent::Removed { id });
}

/// Body of the engine thread.
///
/// Connects, performs the initial round-trip, reports readiness and then
/// serves commands until quit or abort. Dropping the backend at the end
/// releases every proxy we own.
pub(crate) fn run_engine_thread(
    config: EngineConfig,
    commands: pipewire::channel::Receiver<Command>,
    replies: Sender<Reply>,
    abort: Arc<AtomicBool>,
) {
    let mut backend = match PipeWireBackend::connect(Arc::clone(&abort)) {
        Ok(backend) => backend,
        Err(e) => {
            error!(error = %e, "Could not connect to PipeWire");
            let _ = replies.send(Reply::Ready { success: false });
            return;
        }
    };

    let queue: Rc<RefCell<VecDeque<Command>>> = Rc::default();

    // The attached receiver borrows the loop, the backend must stay movable
    let main_loop = backend.main_loop().clone();
    let _receiver = commands.attach(main_loop.loop_(), {
        let queue = Rc::clone(&queue);
        move |command| queue.borrow_mut().push_back(command)
    });

    let initial = match backend.sync() {
        Ok(events) => events,
        Err(e) => {
            error!(error = %e, "Initial sync failed");
            let _ = replies.send(Reply::Ready { success: false });
            return;
        }
    };

    if abort.load(Ordering::SeqCst) {
        warn!("Startup aborted");
        let _ = replies.send(Reply::Ready { success: false });
        return;
    }

    let mut engine = Engine::new(backend, config);
    for event in initial {
        engine.handle_event(event);
    }

    info!(nodes = engine.graph().node_ids().len(), "Engine ready");
    let _ = replies.send(Reply::Ready { success: true });

    loop {
        let next = queue.borrow_mut().pop_front();

        if let Some(command) = next {
            if let Some(reply) = engine.handle_command(command) {
                if replies.send(reply).is_err() {
                    warn!("Reply receiver dropped");
                }
            }

            match engine.exit() {
                Some(Exit::Quit) => {
                    info!("Engine loop finished");
                    break;
                }
                Some(Exit::Abort) => break,
                None => continue,
            }
        }

        if let Err(e) = engine.poll(POLL_INTERVAL) {
            error!(error = %e, "Engine loop failed");
            break;
        }
    }
}
