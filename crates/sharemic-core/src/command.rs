//! Commands sent to the engine loop and the replies it sends back.
//!
//! Commands are issued by the facade on arbitrary threads and are processed,
//! in order, by the single thread that owns the PipeWire connection.

use crate::Properties;
use crate::filter::FilterSpec;

/// A request for the engine loop.
#[derive(Debug, Clone)]
pub enum Command {
    /// List nodes that carry all of the given (non-empty) properties
    ListNodes { props: Vec<String> },
    /// Replace the active filter spec and start routing
    Link(FilterSpec),
    /// Stop routing and destroy the virtual sink
    Unlink,
    /// Finish pending work, clean up and stop the loop
    Quit,
    /// Stop the loop immediately without touching the graph
    Abort,
}

impl Command {
    /// Short name used in log lines.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListNodes { .. } => "list-nodes",
            Self::Link(_) => "link",
            Self::Unlink => "unlink",
            Self::Quit => "quit",
            Self::Abort => "abort",
        }
    }
}

/// A reply from the engine loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Result of [`Command::ListNodes`]
    Nodes(Vec<Properties>),
    /// Startup handshake result
    Ready { success: bool },
    /// Acknowledges [`Command::Quit`] after cleanup
    Quit,
}
