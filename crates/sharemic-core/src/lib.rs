//! sharemic Core - Filter specifications, matching rules and engine commands.
//!
//! This crate contains the domain types shared between the PipeWire engine,
//! the IPC layer and the front-ends. Nothing in here touches PipeWire.

pub mod command;
pub mod error;
pub mod filter;

use std::collections::HashMap;

pub use command::{Command, Reply};
pub use error::{Error, Result};
pub use filter::{FilterSpec, PropertyMatch, RoutingMode};

/// Property dictionary of a graph object (node, port, link).
pub type Properties = HashMap<String, String>;

/// Well-known PipeWire property keys used across the workspace.
pub mod keys {
    pub const NODE_NAME: &str = "node.name";
    pub const NODE_ID: &str = "node.id";
    pub const APP_NAME: &str = "application.name";
    pub const MEDIA_CLASS: &str = "media.class";
    pub const DEVICE_ID: &str = "device.id";
    pub const OBJECT_SERIAL: &str = "object.serial";
    pub const AUDIO_CHANNEL: &str = "audio.channel";
    pub const PORT_ID: &str = "port.id";
    pub const PORT_DIRECTION: &str = "port.direction";
    pub const METADATA_NAME: &str = "metadata.name";
    pub const DEFAULT_AUDIO_SINK: &str = "default.audio.sink";
    pub const TARGET_OBJECT: &str = "target.object";
    pub const TARGET_NODE: &str = "target.node";
}
