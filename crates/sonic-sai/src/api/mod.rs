//! Hardware backend contract.
//!
//! - [`frer`]: compound/member stream programming and capabilities
//! - [`tce`]: R-tag push/pop entries for chips without classifier support

pub mod frer;
pub mod tce;

pub use frer::{FrerApi, FrerHwCapabilities};
pub use tce::{TceAction, TceConf, TceInsertion};
