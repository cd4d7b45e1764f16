//! Daemon event loop.

mod orchdaemon;

pub use orchdaemon::{OrchDaemon, OrchDaemonConfig, StopHandle};
