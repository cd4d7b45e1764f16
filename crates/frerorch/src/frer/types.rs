//! FRER configuration, status and statistics types.

use super::error::FrerOrchError;
use serde::{Deserialize, Serialize};
use sonic_sai::RecoveryAlg;
use sonic_types::{PortList, PortNo};
use std::fmt;
use std::str::FromStr;

/// Ingress stream identifier (owned by the stream provider).
pub type StreamId = u32;

/// Stream collection identifier (owned by the stream provider).
pub type StreamCollectionId = u32;

/// FRER instance identifier, `1..=inst_cnt_max`.
pub type FrerInstId = u32;

/// Absolute upper bound on egress ports per instance, and therefore also on
/// the length of the stream-id list (one member stream per ingress stream,
/// one compound stream per egress port).
pub const FRER_EGRESS_PORT_CNT_ABS_MAX: u32 = 8;

/// Maximum number of stream ids an instance may list.
pub const FRER_STREAM_ID_LIST_LEN: usize = FRER_EGRESS_PORT_CNT_ABS_MAX as usize;

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrerMode {
    /// Sequence generation and replication onto the egress ports.
    #[default]
    Generation,
    /// Duplicate elimination of frames arriving on several ingress paths.
    Recovery,
}

impl fmt::Display for FrerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrerMode::Generation => write!(f, "Generation"),
            FrerMode::Recovery => write!(f, "Recovery"),
        }
    }
}

impl FromStr for FrerMode {
    type Err = FrerOrchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generation" => Ok(FrerMode::Generation),
            "recovery" => Ok(FrerMode::Recovery),
            _ => Err(FrerOrchError::InvalidMode),
        }
    }
}

/// Parses a recovery algorithm name.
pub fn parse_recovery_alg(s: &str) -> Result<RecoveryAlg, FrerOrchError> {
    match s.to_lowercase().as_str() {
        "vector" => Ok(RecoveryAlg::Vector),
        "match" => Ok(RecoveryAlg::Match),
        _ => Err(FrerOrchError::InvalidAlgorithm),
    }
}

/// Latent error detection parameters (802.1CB clause 7.4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatentErrorDetectionConf {
    pub enable: bool,
    /// Threshold on the drift of `passed * (paths - 1) - discarded`.
    pub difference: u32,
    /// Test timer period.
    pub period_ms: u32,
    /// Expected number of redundant ingress paths.
    pub paths: u32,
    /// Reset timer period.
    pub reset_period_ms: u32,
}

impl Default for LatentErrorDetectionConf {
    fn default() -> Self {
        Self {
            enable: false,
            difference: 100,
            period_ms: 2000,
            paths: 2,
            reset_period_ms: 30000,
        }
    }
}

/// Administrative configuration of one FRER instance.
///
/// Recovery parameters are stored and validated in both modes so that a
/// mode switch does not lose them; they only take effect in recovery mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrerConf {
    pub mode: FrerMode,
    pub frer_vlan: u16,

    /// Ingress streams. Kept sorted and free of duplicates once accepted.
    pub stream_ids: Vec<StreamId>,

    /// Mutually exclusive with `stream_ids`.
    pub stream_collection_id: Option<StreamCollectionId>,

    pub egress_ports: PortList,

    /// Generation mode: pop one outer tag before adding the R-tag.
    pub outer_tag_pop: bool,

    pub rcvy_algorithm: RecoveryAlg,
    pub rcvy_history_len: u32,
    pub rcvy_reset_timeout_ms: u32,
    pub rcvy_take_no_sequence: bool,

    /// One member-stream set per ingress stream instead of one shared set.
    pub rcvy_individual: bool,

    /// Pop the R-tag on egress.
    pub rcvy_terminate: bool,

    pub rcvy_latent_error_detection: LatentErrorDetectionConf,

    pub admin_active: bool,
}

impl Default for FrerConf {
    fn default() -> Self {
        Self {
            mode: FrerMode::Generation,
            frer_vlan: 1,
            stream_ids: Vec::new(),
            stream_collection_id: None,
            egress_ports: PortList::new(),
            outer_tag_pop: false,
            rcvy_algorithm: RecoveryAlg::Vector,
            rcvy_history_len: 2,
            rcvy_reset_timeout_ms: 1000,
            rcvy_take_no_sequence: false,
            rcvy_individual: false,
            rcvy_terminate: false,
            rcvy_latent_error_detection: LatentErrorDetectionConf::default(),
            admin_active: false,
        }
    }
}

impl FrerConf {
    pub fn uses_collection(&self) -> bool {
        self.stream_collection_id.is_some()
    }

    /// Number of attachment slots in use: one for a collection, otherwise
    /// one per listed stream.
    pub fn attach_slot_cnt(&self) -> usize {
        if self.uses_collection() {
            1
        } else {
            self.stream_ids.len()
        }
    }
}

/// Operator-triggered actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FrerControl {
    /// Reset the sequence generator (generation) or recovery state (recovery).
    pub reset: bool,
    /// Clear the sticky latent-error flag.
    pub latent_error_clear: bool,
}

/// Operational state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrerOperState {
    #[default]
    AdminDisabled,
    Active,
    InternalError,
}

impl FrerOperState {
    /// Human readable state, taking warnings into account.
    pub fn text(&self, warnings: OperWarnings) -> &'static str {
        match self {
            FrerOperState::AdminDisabled => "Admin disabled",
            FrerOperState::Active if warnings.is_empty() => "Active",
            FrerOperState::Active => "Active (warnings)",
            FrerOperState::InternalError => "Internal error",
        }
    }
}

/// Bitmask of operational warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperWarnings(u32);

impl OperWarnings {
    pub const NONE: OperWarnings = OperWarnings(0);
    pub const STREAM_NOT_FOUND: OperWarnings = OperWarnings(1 << 0);
    pub const STREAM_ATTACH_FAIL: OperWarnings = OperWarnings(1 << 1);
    pub const STREAM_HAS_OPERATIONAL_WARNINGS: OperWarnings = OperWarnings(1 << 2);
    pub const INGRESS_EGRESS_OVERLAP: OperWarnings = OperWarnings(1 << 3);
    pub const EGRESS_PORT_CNT: OperWarnings = OperWarnings(1 << 4);
    pub const INGRESS_NO_LINK: OperWarnings = OperWarnings(1 << 5);
    pub const EGRESS_NO_LINK: OperWarnings = OperWarnings(1 << 6);
    pub const VLAN_MEMBERSHIP: OperWarnings = OperWarnings(1 << 7);
    pub const STP_BLOCKED: OperWarnings = OperWarnings(1 << 8);
    pub const MSTP_BLOCKED: OperWarnings = OperWarnings(1 << 9);
    pub const STREAM_COLLECTION_NOT_FOUND: OperWarnings = OperWarnings(1 << 10);
    pub const STREAM_COLLECTION_ATTACH_FAIL: OperWarnings = OperWarnings(1 << 11);
    pub const STREAM_COLLECTION_HAS_OPERATIONAL_WARNINGS: OperWarnings = OperWarnings(1 << 12);

    /// Every flag with its short name, in display order.
    const NAMED: [(OperWarnings, &'static str); 13] = [
        (Self::STREAM_NOT_FOUND, "STREAM_NOT_FOUND"),
        (Self::STREAM_ATTACH_FAIL, "STREAM_ATTACH_FAIL"),
        (Self::STREAM_HAS_OPERATIONAL_WARNINGS, "STREAM_HAS_OPERATIONAL_WARNINGS"),
        (Self::INGRESS_EGRESS_OVERLAP, "INGRESS_EGRESS_OVERLAP"),
        (Self::EGRESS_PORT_CNT, "EGRESS_PORT_CNT"),
        (Self::INGRESS_NO_LINK, "INGRESS_NO_LINK"),
        (Self::EGRESS_NO_LINK, "EGRESS_NO_LINK"),
        (Self::VLAN_MEMBERSHIP, "VLAN_MEMBERSHIP"),
        (Self::STP_BLOCKED, "STP_BLOCKED"),
        (Self::MSTP_BLOCKED, "MSTP_BLOCKED"),
        (Self::STREAM_COLLECTION_NOT_FOUND, "STREAM_COLLECTION_NOT_FOUND"),
        (Self::STREAM_COLLECTION_ATTACH_FAIL, "STREAM_COLLECTION_ATTACH_FAIL"),
        (
            Self::STREAM_COLLECTION_HAS_OPERATIONAL_WARNINGS,
            "STREAM_COLLECTION_HAS_OPERATIONAL_WARNINGS",
        ),
    ];

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, other: OperWarnings) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn insert(&mut self, other: OperWarnings) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: OperWarnings) {
        self.0 &= !other.0;
    }

    /// Short names of the flags that are set.
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Operator-facing description of a single flag.
    pub fn description(flag: OperWarnings) -> &'static str {
        match flag {
            Self::NONE => "None",
            Self::STREAM_NOT_FOUND => "At least one of the ingress streams doesn't exist",
            Self::STREAM_ATTACH_FAIL => {
                "Unable to attach to at least one of the ingress streams, possibly because it is part of a stream collection"
            }
            Self::STREAM_HAS_OPERATIONAL_WARNINGS => {
                "At least one of the ingress streams has operational warnings"
            }
            Self::INGRESS_EGRESS_OVERLAP => "There is an overlap between ingress and egress ports",
            Self::EGRESS_PORT_CNT => {
                "In generation mode, at least two egress ports should be configured"
            }
            Self::INGRESS_NO_LINK => "At least one of the ingress ports doesn't have link",
            Self::EGRESS_NO_LINK => "At least one of the egress ports doesn't have link",
            Self::VLAN_MEMBERSHIP => {
                "At least one of the egress ports is not member of the FRER VLAN"
            }
            Self::STP_BLOCKED => "At least one of the egress ports is blocked by STP",
            Self::MSTP_BLOCKED => "At least one of the egress ports is blocked by MSTP",
            Self::STREAM_COLLECTION_NOT_FOUND => "The specified stream collection doesn't exist",
            Self::STREAM_COLLECTION_ATTACH_FAIL => {
                "Unable to attach to the specified stream collection"
            }
            Self::STREAM_COLLECTION_HAS_OPERATIONAL_WARNINGS => {
                "The stream collection has operational warnings"
            }
            _ => "Unknown",
        }
    }
}

impl std::ops::BitOr for OperWarnings {
    type Output = OperWarnings;

    fn bitor(self, rhs: OperWarnings) -> OperWarnings {
        OperWarnings(self.0 | rhs.0)
    }
}

impl fmt::Display for OperWarnings {
    /// Renders the set as `<NAME1 NAME2>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.names().join(" "))
    }
}

/// Sticky notification state delivered to management (traps, events).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrerNotificationStatus {
    pub latent_error: bool,
}

/// Run-time status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrerStatus {
    pub oper_state: FrerOperState,
    pub oper_warnings: OperWarnings,
    pub notif_status: FrerNotificationStatus,
}

/// Counters for one (instance, port, stream) statistics key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrerStatistics {
    pub rcvy_out_of_order_packets: u64,
    pub rcvy_rogue_packets: u64,
    pub rcvy_passed_packets: u64,
    pub rcvy_discarded_packets: u64,
    pub rcvy_lost_packets: u64,
    pub rcvy_tagless_packets: u64,
    pub rcvy_resets: u64,
    pub rcvy_latent_error_resets: u64,
    pub gen_matches: u64,
    pub gen_resets: u64,
}

/// Statistics iteration key: `(inst, egress port, stream)`.
pub type FrerStatisticsKey = (FrerInstId, Option<PortNo>, Option<StreamId>);

/// Platform capabilities and parameter ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrerCapabilities {
    /// Zero means FRER is not supported at all.
    pub inst_cnt_max: u32,
    pub egress_port_cnt_max: u32,
    pub rcvy_mstream_cnt_max: u32,
    pub rcvy_cstream_cnt_max: u32,
    pub stream_id_max: StreamId,
    pub stream_collection_id_max: StreamCollectionId,
    pub rcvy_history_len_min: u32,
    pub rcvy_history_len_max: u32,
    pub rcvy_reset_timeout_ms_min: u32,
    pub rcvy_reset_timeout_ms_max: u32,
    pub rcvy_latent_error_difference_min: u32,
    pub rcvy_latent_error_difference_max: u32,
    pub rcvy_latent_error_period_ms_min: u32,
    pub rcvy_latent_error_period_ms_max: u32,
    pub rcvy_latent_error_paths_min: u32,
    pub rcvy_latent_error_paths_max: u32,
    pub rcvy_latent_reset_period_ms_min: u32,
    pub rcvy_latent_reset_period_ms_max: u32,
    /// Number of switch ports.
    pub port_cnt: u32,
    /// True if R-tags are popped/pushed by the ingress classifier, so no
    /// TCEs are needed.
    pub iflow_pop: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_conf() {
        let conf = FrerConf::default();
        assert_eq!(conf.mode, FrerMode::Generation);
        assert_eq!(conf.frer_vlan, 1);
        assert!(conf.stream_ids.is_empty());
        assert_eq!(conf.rcvy_history_len, 2);
        assert_eq!(conf.rcvy_reset_timeout_ms, 1000);
        assert_eq!(conf.rcvy_latent_error_detection.reset_period_ms, 30000);
        assert!(!conf.admin_active);
    }

    #[test]
    fn test_conf_deserializes_with_defaults() {
        let conf: FrerConf = serde_json::from_str(
            r#"{"mode":"recovery","stream_ids":[3],"egress_ports":[0,1],"admin_active":true}"#,
        )
        .unwrap();
        assert_eq!(conf.mode, FrerMode::Recovery);
        assert_eq!(conf.egress_ports, PortList::from([0, 1]));
        assert_eq!(conf.rcvy_latent_error_detection, LatentErrorDetectionConf::default());
        assert_eq!(conf.attach_slot_cnt(), 1);
    }

    #[test]
    fn test_mode_and_alg_parsing() {
        assert_eq!("Recovery".parse::<FrerMode>().unwrap(), FrerMode::Recovery);
        assert!(matches!("x".parse::<FrerMode>(), Err(FrerOrchError::InvalidMode)));
        assert_eq!(parse_recovery_alg("MATCH").unwrap(), RecoveryAlg::Match);
        assert!(matches!(parse_recovery_alg("y"), Err(FrerOrchError::InvalidAlgorithm)));
    }

    #[test]
    fn test_oper_warnings_rendering() {
        let mut w = OperWarnings::NONE;
        assert_eq!(w.to_string(), "<>");
        w.insert(OperWarnings::EGRESS_NO_LINK | OperWarnings::STREAM_NOT_FOUND);
        assert_eq!(w.to_string(), "<STREAM_NOT_FOUND EGRESS_NO_LINK>");
        assert!(w.contains(OperWarnings::EGRESS_NO_LINK));
        w.remove(OperWarnings::EGRESS_NO_LINK);
        assert!(!w.contains(OperWarnings::EGRESS_NO_LINK));
        assert!(!w.contains(OperWarnings::NONE));
    }

    #[test]
    fn test_oper_state_text() {
        assert_eq!(FrerOperState::Active.text(OperWarnings::NONE), "Active");
        assert_eq!(
            FrerOperState::Active.text(OperWarnings::VLAN_MEMBERSHIP),
            "Active (warnings)"
        );
        assert_eq!(
            FrerOperState::AdminDisabled.text(OperWarnings::VLAN_MEMBERSHIP),
            "Admin disabled"
        );
        assert_eq!(
            OperWarnings::description(OperWarnings::EGRESS_PORT_CNT),
            "In generation mode, at least two egress ports should be configured"
        );
    }
}
