//! Page navigation and live-refresh coordination.
//!
//! The controller owns the current-page pointer and the draw queue; the
//! coordinator keeps one cancellable refresh loop attached to whichever page
//! is visible. Pages own their position and refresh channel.

pub mod controller;
pub mod position;
pub mod queue;
pub mod refresh;
pub mod registry;

#[cfg(test)]
pub(crate) mod fake;

pub use controller::{PageController, PageFactory};
pub use position::Position;
pub use queue::{Layer, PageTrack, StatusKind};
pub use refresh::{RefreshChannel, RefreshCoordinator, RefreshEvent};

use anyhow::Result;
use futures::future::BoxFuture;

/// Contract every navigable page fulfils.
pub trait PageView: Send + Sync {
    fn name(&self) -> &str;

    fn signals(&self) -> &RefreshChannel;

    /// Re-fetches and redraws the page's content.
    fn refresh(&self) -> BoxFuture<'_, Result<()>>;

    fn restore_position(&self, _position: Position) {}

    /// Fire-and-forget request picked up by the page's refresh loop.
    fn trigger_refresh(&self) -> bool {
        self.signals().trigger()
    }
}
