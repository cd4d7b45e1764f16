//! Compound/member stream programming.

use super::tce::{TceConf, TceInsertion};
use crate::error::SaiResult;
use crate::types::{CStreamId, FrerCounters, FrerStreamConf, MStreamId, TceId};
use sonic_types::{PortList, PortNo};

/// Chip capabilities relevant to FRER.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrerHwCapabilities {
    /// Number of switch ports.
    pub port_cnt: u32,
    /// Size of the compound-stream table.
    pub cstream_cnt: u32,
    /// Size of the member-stream table.
    pub mstream_cnt: u32,
    /// Egress ports one member-stream run may span.
    pub egress_port_cnt_max: u32,
    /// True if the ingress classifier can pop the R-tag itself.
    pub iflow_pop: bool,
}

/// Hardware backend for FRER.
///
/// Compound streams have no allocator on the chip side: the caller owns the
/// id space `[0, cstream_cnt)` and "frees" an entry by writing the default
/// config. Member streams are allocated by the backend in runs of one id per
/// egress port; only the base id is returned and the member for a port is
/// addressed by `(base, port)`.
///
/// All calls are synchronous. A failure is final for that call.
pub trait FrerApi: Send + Sync {
    fn capabilities(&self) -> FrerHwCapabilities;

    fn cstream_conf_get(&self, id: CStreamId) -> SaiResult<FrerStreamConf>;
    fn cstream_conf_set(&self, id: CStreamId, conf: &FrerStreamConf) -> SaiResult<()>;
    fn cstream_cnt_get(&self, id: CStreamId) -> SaiResult<FrerCounters>;
    fn cstream_cnt_clear(&self, id: CStreamId) -> SaiResult<()>;

    /// Allocates `egress_ports.len()` consecutive member streams.
    ///
    /// Fails with [`SaiError::TableFull`](crate::SaiError::TableFull) if no
    /// such run is free.
    fn mstream_alloc(&self, egress_ports: &PortList) -> SaiResult<MStreamId>;
    fn mstream_free(&self, base: MStreamId) -> SaiResult<()>;
    fn mstream_conf_get(&self, base: MStreamId, port: PortNo) -> SaiResult<FrerStreamConf>;
    fn mstream_conf_set(&self, base: MStreamId, port: PortNo, conf: &FrerStreamConf) -> SaiResult<()>;
    fn mstream_cnt_get(&self, base: MStreamId, port: PortNo) -> SaiResult<FrerCounters>;
    fn mstream_cnt_clear(&self, base: MStreamId, port: PortNo) -> SaiResult<()>;

    fn tce_add(&self, insertion: TceInsertion, conf: &TceConf) -> SaiResult<()>;
    fn tce_del(&self, id: TceId) -> SaiResult<()>;
}
