//! Wayland compositor integration
//!
//! - daemon: display-thread state and event loop
//! - surface: per-output layer surface with its GPU drawable
//! - pump: frame pacing between compositor callbacks and decoded frames
//! - event_handlers: Wayland protocol event handlers
//! - listing: `--help-output` output listing

mod daemon;
mod event_handlers;
mod listing;
mod pump;
mod surface;

pub use daemon::{DisplayOptions, DisplayThread};
pub use listing::list_outputs;

pub(crate) use daemon::VideoDaemon;
