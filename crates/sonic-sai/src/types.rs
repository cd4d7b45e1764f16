//! Typed FRER table identifiers, stream configs and counters.
//!
//! Compound-stream, member-stream and TCE ids live in separate hardware
//! tables. The phantom kind parameter keeps a member-stream id from being
//! handed to a compound-stream call.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Raw hardware table index.
pub type RawFrerObjectId = u32;

/// Marker trait for FRER table kinds.
pub trait FrerObjectKind: Send + Sync + 'static {
    /// Table name used in logs.
    fn type_name() -> &'static str;
}

/// A table index tagged with the table it belongs to.
///
/// "No entry" is expressed as `Option<FrerObjectId<T>>`, not as a sentinel.
pub struct FrerObjectId<T: FrerObjectKind> {
    raw: RawFrerObjectId,
    _marker: PhantomData<T>,
}

impl<T: FrerObjectKind> FrerObjectId<T> {
    pub const fn from_raw(raw: RawFrerObjectId) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub const fn as_raw(&self) -> RawFrerObjectId {
        self.raw
    }

    /// Returns the id `n` entries further on in the same table.
    pub const fn offset(&self, n: u32) -> Self {
        Self::from_raw(self.raw + n)
    }
}

impl<T: FrerObjectKind> Clone for FrerObjectId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: FrerObjectKind> Copy for FrerObjectId<T> {}

impl<T: FrerObjectKind> fmt::Debug for FrerObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", T::type_name(), self.raw)
    }
}

impl<T: FrerObjectKind> fmt::Display for FrerObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl<T: FrerObjectKind> PartialEq for FrerObjectId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: FrerObjectKind> Eq for FrerObjectId<T> {}

impl<T: FrerObjectKind> PartialOrd for FrerObjectId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: FrerObjectKind> Ord for FrerObjectId<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T: FrerObjectKind> Hash for FrerObjectId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

// ============================================================================
// Table Kind Markers
// ============================================================================

macro_rules! define_object_kind {
    ($name:ident, $type_name:literal, $id_alias:ident) => {
        #[doc = concat!("Marker type for the ", $type_name, " table.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl FrerObjectKind for $name {
            fn type_name() -> &'static str {
                $type_name
            }
        }

        #[doc = concat!("Index into the ", $type_name, " table.")]
        pub type $id_alias = FrerObjectId<$name>;
    };
}

define_object_kind!(CStreamKind, "CStream", CStreamId);
define_object_kind!(MStreamKind, "MStream", MStreamId);
define_object_kind!(TceKind, "Tce", TceId);

// ============================================================================
// Stream Configuration and Counters
// ============================================================================

/// Sequence recovery algorithm (802.1CB clause 7.4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryAlg {
    #[default]
    Vector,
    Match,
}

impl fmt::Display for RecoveryAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAlg::Vector => write!(f, "Vector"),
            RecoveryAlg::Match => write!(f, "Match"),
        }
    }
}

/// Configuration of one compound- or member-stream entry.
///
/// The all-default value disables recovery; it is what a freed compound
/// stream is left holding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrerStreamConf {
    pub recovery: bool,
    pub alg: RecoveryAlg,
    pub history_len: u32,
    pub reset_timeout_ms: u32,
    pub take_no_sequence: bool,
    /// Member streams only: the compound stream this member feeds.
    pub cstream_id: Option<CStreamId>,
}

/// Sequence recovery counters of a compound or member stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrerCounters {
    pub out_of_order_packets: u64,
    pub rogue_packets: u64,
    pub passed_packets: u64,
    pub discarded_packets: u64,
    pub lost_packets: u64,
    pub tagless_packets: u64,
    pub resets: u64,
}
