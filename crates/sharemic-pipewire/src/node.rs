//! PipeWire node and port model.

use serde::{Deserialize, Serialize};
use sharemic_core::{Properties, keys};

/// A mirrored PipeWire node and the ports seen for it so far.
///
/// Ports may be announced before the node itself; in that case the node
/// exists with empty properties until its info arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// PipeWire global ID
    pub id: u32,
    /// All node properties
    pub properties: Properties,
    /// Maximum number of output ports (0 = cannot produce audio)
    pub max_output_ports: u32,
    /// Child ports in arrival order
    pub ports: Vec<PortInfo>,
}

impl NodeInfo {
    /// Create a node with no properties and no ports.
    #[must_use]
    pub fn placeholder(id: u32) -> Self {
        Self { id, ..Self::default() }
    }

    fn prop(&self, key: &str) -> &str {
        self.properties.get(key).map_or("", String::as_str)
    }

    /// Node name (`node.name`), empty if unknown.
    #[must_use]
    pub fn name(&self) -> &str {
        self.prop(keys::NODE_NAME)
    }

    /// Application name (`application.name`), empty if unknown.
    #[must_use]
    pub fn application_name(&self) -> &str {
        self.prop(keys::APP_NAME)
    }

    #[must_use]
    pub fn media_class(&self) -> &str {
        self.prop(keys::MEDIA_CLASS)
    }

    /// Check if this node belongs to a hardware device.
    #[must_use]
    pub fn is_device(&self) -> bool {
        !self.prop(keys::DEVICE_ID).is_empty()
    }

    /// Object serial, used by session managers for `target.object`.
    #[must_use]
    pub fn serial(&self) -> Option<&str> {
        self.properties.get(keys::OBJECT_SERIAL).map(String::as_str)
    }

    /// Check if the node can produce audio at all.
    #[must_use]
    pub fn can_output(&self) -> bool {
        self.max_output_ports > 0
    }

    /// Input ports, in arrival order.
    pub fn input_ports(&self) -> impl Iterator<Item = &PortInfo> {
        self.ports.iter().filter(|p| p.direction == PortDirection::Input)
    }

    /// Output ports (monitor ports for sinks), in arrival order.
    pub fn output_ports(&self) -> impl Iterator<Item = &PortInfo> {
        self.ports.iter().filter(|p| p.direction == PortDirection::Output)
    }
}

/// Information about a PipeWire port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// PipeWire global ID
    pub id: u32,
    /// Port direction (in/out)
    pub direction: PortDirection,
    /// All port properties
    pub properties: Properties,
}

impl PortInfo {
    /// Audio channel position (FL, FR, MONO, UNK...), empty if unknown.
    #[must_use]
    pub fn channel(&self) -> &str {
        self.properties.get(keys::AUDIO_CHANNEL).map_or("", String::as_str)
    }

    /// Port index within its node (`port.id`), not the global ID.
    #[must_use]
    pub fn index(&self) -> &str {
        self.properties.get(keys::PORT_ID).map_or("", String::as_str)
    }
}

/// Port direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port (receives audio)
    Input,
    /// Output port (sends audio)
    Output,
}

impl PortDirection {
    /// Parse a `port.direction` value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in" => Some(Self::Input),
            "out" => Some(Self::Output),
            _ => None,
        }
    }
}

/// Properties for creating the virtual microphone.
#[derive(Debug, Clone)]
pub struct VirtualSinkProps {
    /// Node name (e.g., "sharemic-screen-share")
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Media class the node announces itself as
    pub media_class: String,
    /// Number of audio channels
    pub channels: u32,
    /// Audio channel positions (e.g., "FL,FR")
    pub positions: String,
}

impl VirtualSinkProps {
    /// Create properties for a stereo virtual microphone.
    #[must_use]
    pub fn stereo_mic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: format!("{name} (virtual microphone)"),
            media_class: "Audio/Source/Virtual".to_string(),
            channels: 2,
            positions: "FL,FR".to_string(),
        }
    }

    /// Number of ports the adapter creates: one input and one monitor
    /// output per channel.
    #[must_use]
    pub fn expected_ports(&self) -> usize {
        self.channels as usize * 2
    }
}
