//! sharemic PipeWire - Graph mirror, dynamic linking and the engine loop.
//!
//! This crate handles all interactions with PipeWire, including:
//! - Mirroring the nodes, ports and links of the audio graph
//! - Creating the virtual microphone
//! - Linking matching application streams into it
//! - Tracking the default speaker through the "default" metadata

pub mod backend;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod link;
pub mod mapping;
pub mod monitor;
pub mod node;
pub mod patchbay;
pub mod probe;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use backend::GraphBackend;
pub use engine::{Engine, EngineConfig, EngineState, Speaker};
pub use error::{PwError, PwResult};
pub use graph::GraphMirror;
pub use monitor::GraphEvent;
pub use patchbay::Patchbay;
pub use runtime::PipeWireBackend;
