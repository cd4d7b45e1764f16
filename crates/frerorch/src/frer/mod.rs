//! FrerOrch - IEEE 802.1CB Frame Replication and Elimination for Reliability.
//!
//! Turns per-instance FRER configurations into hardware programming. An
//! instance either generates (sequence numbers added, frames replicated to
//! every egress port) or recovers (duplicates eliminated per egress port).
//!
//! # Architecture
//!
//! ```text
//!  operator ──> FrerOrch::conf_set ──> validate ──> Mutex<FrerTable>
//!                                                        │
//!                    activate / deactivate  <────────────┤
//!                      │                                 │
//!    FrerApi <─────────┤  (TCE, cstreams, mstreams)      │
//!    StreamProvider <──┘  (attach / detach)              │
//!                                                        │
//!  stream change logs ──> process_stream_changes ────────┤
//!  TimerWheel ──────────> process_timers (LED) ──────────┤
//!  link/VLAN/STP events ──> diagnostics ─────────────────┘
//! ```
//!
//! Hardware resources:
//!
//! - one compound stream per egress port (recovery), taken from a software
//!   managed id space
//! - a consecutive run of member streams per ingress stream with individual
//!   recovery, otherwise one run, allocated by the chip
//! - one TCE, only on chips whose classifier cannot pop the R-tag
//!
//! Everything an instance holds in hardware is released when it leaves the
//! Active state.

mod alloc;
mod base;
mod diag;
mod error;
mod hw;
mod led;
mod orch;
mod stream;
mod table;
mod types;

pub use error::{FrerOrchError, FrerResult};
pub use orch::{FrerNotification, FrerOrch, FrerOrchCallbacks, FrerOrchConfig};
pub use stream::{
    IngressCounters, StreamAction, StreamCollectionConf, StreamConf, StreamProvider, StreamStatus,
};
pub use table::FrerOrchStats;
pub use types::{
    parse_recovery_alg, FrerCapabilities, FrerConf, FrerControl, FrerInstId, FrerMode,
    FrerNotificationStatus, FrerOperState, FrerStatistics, FrerStatisticsKey, FrerStatus,
    LatentErrorDetectionConf, OperWarnings, StreamCollectionId, StreamId,
    FRER_EGRESS_PORT_CNT_ABS_MAX, FRER_STREAM_ID_LIST_LEN,
};
