//! Tag Control Entries.
//!
//! A TCE matches frames leaving a set of egress ports on one VLAN and pushes
//! or pops the R-tag there. Only used when the ingress classifier cannot do
//! it (see [`FrerHwCapabilities::iflow_pop`](super::FrerHwCapabilities)).

use crate::types::TceId;
use sonic_types::{PortList, VlanId};

/// Where a new entry goes relative to existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TceInsertion {
    /// Before the entry with the given id.
    Before(TceId),
    /// After every existing entry.
    Last,
}

/// R-tag operation performed by a TCE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TceAction {
    /// Push an R-tag (generation, or recovery without termination).
    PushRtag,
    /// Pop the outer R-tag (terminating recovery).
    PopRtag,
}

/// A TCE to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TceConf {
    pub id: TceId,
    pub egress_ports: PortList,
    pub vid: VlanId,
    pub action: TceAction,
}
