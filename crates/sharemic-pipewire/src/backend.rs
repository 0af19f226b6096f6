//! The graph operations the engine needs from an audio server.
//!
//! The real implementation lives in [`crate::runtime`] and must only be used
//! from the thread that owns the PipeWire main loop. Tests drive the engine
//! with an in-memory implementation instead.

use std::time::Duration;

use crate::error::PwResult;
use crate::link::LinkParams;
use crate::monitor::GraphEvent;
use crate::node::VirtualSinkProps;

/// Metadata value type used for node targets.
pub const SPA_ID_TYPE: &str = "Spa:Id";

/// Graph operations, issued from the engine loop only.
pub trait GraphBackend {
    /// Dispatch pending server messages, waiting at most `timeout` for
    /// activity, and return the graph events collected so far.
    ///
    /// # Errors
    /// Returns an error if the connection is no longer usable.
    fn pump(&mut self, timeout: Duration) -> PwResult<Vec<GraphEvent>>;

    /// Round-trip to the server so that every change it already sent has
    /// been received, then return the collected events.
    ///
    /// # Errors
    /// Returns an error if the round-trip fails or times out.
    fn sync(&mut self) -> PwResult<Vec<GraphEvent>>;

    /// Create the virtual sink and return its global ID.
    ///
    /// # Errors
    /// Returns [`crate::PwError::NodeCreationFailed`] if the server refuses.
    fn create_sink(&mut self, props: &VirtualSinkProps) -> PwResult<u32>;

    /// Destroy a sink created by [`GraphBackend::create_sink`].
    fn destroy_sink(&mut self, id: u32);

    /// Create a link and return its global ID.
    ///
    /// # Errors
    /// Returns [`crate::PwError::LinkCreationFailed`] if the server refuses.
    fn create_link(&mut self, params: &LinkParams) -> PwResult<u32>;

    /// Destroy a link created by [`GraphBackend::create_link`]. Links that
    /// are already gone are ignored.
    fn destroy_link(&mut self, id: u32);

    /// Set a property on the "default" metadata object.
    ///
    /// # Errors
    /// Returns [`crate::PwError::MetadataError`] if no metadata is bound.
    fn set_metadata(&mut self, subject: u32, key: &str, type_: &str, value: &str) -> PwResult<()>;

    /// Remove a property from the "default" metadata object.
    ///
    /// # Errors
    /// Returns [`crate::PwError::MetadataError`] if no metadata is bound.
    fn clear_metadata(&mut self, subject: u32, key: &str) -> PwResult<()>;
}
