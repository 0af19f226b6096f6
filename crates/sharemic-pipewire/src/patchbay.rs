//! Thread-safe handle to the engine thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use sharemic_core::{Command, FilterSpec, Properties, Reply};
use tracing::{debug, error, info, warn};

use crate::engine::EngineConfig;
use crate::error::{PwError, PwResult};
use crate::probe;
use crate::runtime::run_engine_thread;

struct Channels {
    commands: pipewire::channel::Sender<Command>,
    replies: Receiver<Reply>,
}

impl Channels {
    fn send(&self, command: Command) -> PwResult<()> {
        let name = command.name();
        self.commands
            .send(command)
            .map_err(|_| PwError::EngineUnavailable(format!("Engine thread is gone, dropped {name}")))
    }
}

/// Entry point for callers on arbitrary threads.
///
/// Every call is turned into a command for the engine thread. Calls are
/// serialized: a caller holds the channel until its own reply has arrived.
/// Dropping the patchbay stops routing, destroys the virtual sink and joins
/// the engine thread.
pub struct Patchbay {
    channels: Mutex<Channels>,
    thread: Option<JoinHandle<()>>,
}

impl Patchbay {
    /// Spawn the engine thread and wait until it is connected.
    ///
    /// # Errors
    /// Returns [`PwError::NotSupported`] if the active sound server is not
    /// PipeWire, [`PwError::ConnectionFailed`] if the engine could not
    /// connect and [`PwError::Timeout`] if it did not report back within
    /// `config.ready_timeout`.
    pub fn new(config: EngineConfig) -> PwResult<Self> {
        Self::start(config, Self::has_audio_server, run_engine_thread)
    }

    fn start<P, F>(config: EngineConfig, has_server: P, body: F) -> PwResult<Self>
    where
        P: FnOnce() -> bool,
        F: FnOnce(EngineConfig, pipewire::channel::Receiver<Command>, Sender<Reply>, Arc<AtomicBool>)
            + Send
            + 'static,
    {
        if !has_server() {
            return Err(PwError::NotSupported("The active sound server is not PipeWire".to_string()));
        }

        let (commands, engine_commands) = pipewire::channel::channel();
        let (engine_replies, replies) = crossbeam_channel::unbounded();
        let abort = Arc::new(AtomicBool::new(false));
        let ready_timeout = config.ready_timeout;

        let thread = std::thread::Builder::new()
            .name("sharemic-engine".to_string())
            .spawn({
                let abort = Arc::clone(&abort);
                move || body(config, engine_commands, engine_replies, abort)
            })
            .map_err(|e| PwError::MainLoopError(format!("Failed to spawn engine thread: {e}")))?;

        let ready = handshake(&replies, ready_timeout, || {
            abort.store(true, Ordering::SeqCst);
            let _ = commands.send(Command::Abort);
        });

        if let Err(e) = ready {
            if thread.join().is_err() {
                error!("Engine thread panicked during startup");
            }
            return Err(e);
        }

        debug!("Engine is ready");

        Ok(Self {
            channels: Mutex::new(Channels { commands, replies }),
            thread: Some(thread),
        })
    }

    /// List nodes that carry every property in `props` and can output
    /// audio. An empty `props` means `application.name` and `node.name`.
    ///
    /// # Errors
    /// Returns [`PwError::EngineUnavailable`] if the engine thread stopped.
    pub fn list(&self, props: Vec<String>) -> PwResult<Vec<Properties>> {
        let channels = self.channels.lock();
        channels.send(Command::ListNodes { props })?;

        loop {
            match channels.replies.recv() {
                Ok(Reply::Nodes(nodes)) => return Ok(nodes),
                Ok(other) => warn!(reply = ?other, "Discarding stale reply"),
                Err(_) => return Err(PwError::EngineUnavailable("Engine thread is gone".to_string())),
            }
        }
    }

    /// Start routing, or replace the active filter.
    ///
    /// # Errors
    /// Returns [`PwError::Core`] for an invalid spec and
    /// [`PwError::NotSupported`] if the sound server is not PipeWire.
    pub fn link(&self, spec: FilterSpec) -> PwResult<()> {
        spec.validate()?;

        if !Self::has_audio_server() {
            return Err(PwError::NotSupported("The active sound server is not PipeWire".to_string()));
        }

        info!(mode = ?spec.mode(), "Linking");
        self.channels.lock().send(Command::Link(spec))
    }

    /// Stop routing and destroy the virtual sink.
    ///
    /// # Errors
    /// Returns [`PwError::EngineUnavailable`] if the engine thread stopped.
    pub fn unlink(&self) -> PwResult<()> {
        info!("Unlinking");
        self.channels.lock().send(Command::Unlink)
    }

    /// Check if the active sound server is PipeWire. Independent of any
    /// engine instance.
    #[must_use]
    pub fn has_audio_server() -> bool {
        probe::has_pipewire()
    }
}

/// Wait for the engine thread to report in.
///
/// On timeout `abort` is called and the thread's final answer is awaited;
/// a late `Ready { success: true }` still counts as a failed start.
fn handshake(replies: &Receiver<Reply>, timeout: Duration, abort: impl FnOnce()) -> PwResult<()> {
    let ready = match replies.recv_timeout(timeout) {
        Ok(Reply::Ready { success }) => success,
        Ok(other) => {
            warn!(reply = ?other, "Unexpected reply during startup");
            false
        }
        Err(RecvTimeoutError::Timeout) => {
            error!(?timeout, "Engine did not respond in time, aborting");
            abort();

            // Whatever it answers now, it is shutting down
            let late = replies.recv();
            debug!(reply = ?late, "Engine answered after abort");
            return Err(PwError::Timeout(format!("Engine not ready within {timeout:?}")));
        }
        Err(RecvTimeoutError::Disconnected) => false,
    };

    if ready {
        Ok(())
    } else {
        Err(PwError::ConnectionFailed("Engine failed to start".to_string()))
    }
}

impl Drop for Patchbay {
    fn drop(&mut self) {
        let channels = self.channels.lock();

        if channels.send(Command::Quit).is_ok() {
            loop {
                match channels.replies.recv() {
                    Ok(Reply::Quit) | Err(_) => break,
                    Ok(other) => debug!(reply = ?other, "Discarding reply during shutdown"),
                }
            }
        }

        drop(channels);

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Engine thread panicked");
            }
        }
    }
}
