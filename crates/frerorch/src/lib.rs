//! SONiC FRER orchestration daemon.
//!
//! Control plane for IEEE 802.1CB Frame Replication and Elimination for
//! Reliability: validates per-instance FRER configuration, programs the
//! compound streams, member streams and TCEs an instance needs, binds it to
//! its ingress streams, and runs latent error detection and operational
//! diagnostics.
//!
//! # Architecture
//!
//! ```text
//! [config file] ──> conf_set replay ──┐
//!                                     ▼
//! [stream provider] ──> [FrerOrch] ──> [FrerApi] ──> [ASIC]
//! [link/VLAN/STP]   ──>     ▲
//!                           │
//!                     [OrchDaemon]  (tasks, timers, notifications)
//! ```
//!
//! # Key Components
//!
//! - [`frer::FrerOrch`]: the FRER engine and its operator surface
//! - [`daemon::OrchDaemon`]: main event loop
//! - [`sim::SimSwitch`]: in-memory switch implementing every contract the
//!   engine consumes
//! - [`audit`]: structured audit records for configuration changes

#[macro_use]
pub mod audit;

pub mod config;
pub mod daemon;
pub mod frer;
pub mod sim;
