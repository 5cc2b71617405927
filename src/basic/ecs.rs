//! bevy `App` wrapper that runs the solve as a system pipeline.
pub mod network;
pub mod plugin;
pub mod post_processing;
