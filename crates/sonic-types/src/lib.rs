//! Common L2 types shared by the FRER control plane.
//!
//! - [`PortNo`] and [`PortList`]: zero-based switch port numbers and ordered port sets
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers
//! - [`StpState`]: per-port spanning-tree forwarding state

mod port;
mod vlan;

pub use port::{PortList, PortNo, StpState};
pub use vlan::VlanId;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid port list: {0}")]
    InvalidPortList(String),

    #[error("invalid STP state: {0}")]
    InvalidStpState(String),
}
