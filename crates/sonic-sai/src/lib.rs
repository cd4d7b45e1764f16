//! Hardware resource contract for the FRER (IEEE 802.1CB) engine.
//!
//! The chip exposes three scarce, globally shared tables that a FRER instance
//! draws from: compound streams (one per egress port in recovery mode), member
//! streams (allocated in consecutive runs, one per egress port) and, on chips
//! whose ingress classifier cannot push/pop the R-tag itself, TCEs.
//!
//! - [`types`]: typed table identifiers and the configs/counters they carry
//! - [`error`]: [`SaiError`] and [`SaiResult`]
//! - [`api`]: the [`FrerApi`] trait a hardware backend implements
//!
//! # Example
//!
//! ```ignore
//! use sonic_sai::{CStreamId, FrerApi, FrerStreamConf, SaiResult};
//!
//! fn quiesce(hw: &dyn FrerApi, id: CStreamId) -> SaiResult<()> {
//!     hw.cstream_conf_set(id, &FrerStreamConf::default())
//! }
//! ```

pub mod api;
pub mod error;
pub mod types;

pub use api::{FrerApi, FrerHwCapabilities, TceAction, TceConf, TceInsertion};
pub use error::{SaiError, SaiResult};
pub use types::{
    CStreamId, CStreamKind, FrerCounters, FrerObjectId, FrerObjectKind, FrerStreamConf,
    MStreamId, MStreamKind, RawFrerObjectId, RecoveryAlg, TceId, TceKind,
};
