//! Per-instance state and the table guarded by the orch's mutex.

use super::alloc::IdCursors;
use super::led::LedTimer;
use super::orch::FrerOrchCallbacks;
use super::stream::StreamProvider;
use super::types::{
    FrerCapabilities, FrerConf, FrerInstId, FrerMode, FrerNotificationStatus, FrerStatus,
    FRER_STREAM_ID_LIST_LEN,
};
use sonic_orch_common::TimerWheel;
use sonic_sai::{CStreamId, FrerApi, MStreamId, TceId};
use sonic_types::PortList;
use std::collections::BTreeMap;
use std::time::Instant;

/// Attachment state of one stream slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct StreamState {
    pub exists: bool,
    pub attach_failed: bool,
    pub ingress_ports: PortList,
}

/// Latent error detection runtime state, one entry per compound stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LedState {
    pub cur_base_difference: Vec<i128>,
    pub latent_error: Vec<bool>,
    pub resets: u64,
}

/// Hardware resources and counters that only exist in one mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ModeState {
    Generation {
        gen_resets: u64,
    },
    Recovery {
        /// One per egress port, in egress port order.
        cstream_ids: Vec<CStreamId>,
        /// One per ingress stream with individual recovery, otherwise one.
        mstream_base_ids: Vec<MStreamId>,
        led: LedState,
    },
}

impl ModeState {
    pub(crate) fn new(mode: FrerMode) -> Self {
        match mode {
            FrerMode::Generation => ModeState::Generation { gen_resets: 0 },
            FrerMode::Recovery => ModeState::Recovery {
                cstream_ids: Vec::new(),
                mstream_base_ids: Vec::new(),
                led: LedState::default(),
            },
        }
    }

    pub(crate) fn cstream_ids(&self) -> &[CStreamId] {
        match self {
            ModeState::Generation { .. } => &[],
            ModeState::Recovery { cstream_ids, .. } => cstream_ids,
        }
    }

    pub(crate) fn mstream_base_ids(&self) -> &[MStreamId] {
        match self {
            ModeState::Generation { .. } => &[],
            ModeState::Recovery {
                mstream_base_ids, ..
            } => mstream_base_ids,
        }
    }
}

/// One FRER instance.
#[derive(Debug, Clone)]
pub(crate) struct FrerInstance {
    pub inst: FrerInstId,
    pub conf: FrerConf,
    pub status: FrerStatus,
    pub tce_id: Option<TceId>,
    pub mode_state: ModeState,
    pub stream_states: Vec<StreamState>,
}

impl FrerInstance {
    pub(crate) fn new(inst: FrerInstId) -> Self {
        let conf = FrerConf::default();
        Self {
            inst,
            mode_state: ModeState::new(conf.mode),
            conf,
            status: FrerStatus::default(),
            tce_id: None,
            stream_states: vec![StreamState::default(); FRER_STREAM_ID_LIST_LEN],
        }
    }

    pub(crate) fn individual_recovery(&self) -> bool {
        self.conf.mode == FrerMode::Recovery && self.conf.rcvy_individual
    }
}

/// Everything an operation on one instance may touch besides the instance.
///
/// The instance being worked on is taken out of the table for the duration,
/// so `others` holds every other instance and can be scanned for ids in use.
pub(crate) struct Base<'a> {
    pub hw: &'a dyn FrerApi,
    pub streams: &'a dyn StreamProvider,
    pub l2: &'a dyn FrerOrchCallbacks,
    pub caps: &'a FrerCapabilities,
    pub cursors: &'a mut IdCursors,
    pub others: &'a BTreeMap<FrerInstId, FrerInstance>,
    pub notif: &'a mut BTreeMap<FrerInstId, FrerNotificationStatus>,
    pub timers: &'a mut TimerWheel<LedTimer>,
    pub link: &'a [bool],
    pub now: Instant,
}

/// Collaborators handed to [`FrerTable::with_instance`].
#[derive(Clone, Copy)]
pub(crate) struct Providers<'a> {
    pub hw: &'a dyn FrerApi,
    pub streams: &'a dyn StreamProvider,
    pub l2: &'a dyn FrerOrchCallbacks,
}

/// Operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrerOrchStats {
    pub conf_sets: u64,
    pub conf_dels: u64,
    pub activations: u64,
    pub activation_failures: u64,
    pub stream_events: u64,
    pub timer_expirations: u64,
}

/// All FRER state. Only ever touched with the orch's mutex held.
pub(crate) struct FrerTable {
    pub caps: FrerCapabilities,
    pub instances: BTreeMap<FrerInstId, FrerInstance>,
    pub notif: BTreeMap<FrerInstId, FrerNotificationStatus>,
    pub cursors: IdCursors,
    pub timers: TimerWheel<LedTimer>,
    /// Link state per port.
    pub link: Vec<bool>,
    pub started: bool,
    pub stats: FrerOrchStats,
}

impl FrerTable {
    pub(crate) fn new(caps: FrerCapabilities, cstream_cnt: u32) -> Self {
        Self {
            caps,
            instances: BTreeMap::new(),
            notif: BTreeMap::new(),
            cursors: IdCursors::new(cstream_cnt),
            timers: TimerWheel::new(),
            link: vec![false; caps.port_cnt as usize],
            started: false,
            stats: FrerOrchStats::default(),
        }
    }

    /// Runs `f` on instance `inst` with a [`Base`] built from the rest of the
    /// table. Returns `None` if the instance does not exist.
    pub(crate) fn with_instance<R>(
        &mut self,
        providers: Providers<'_>,
        now: Instant,
        inst: FrerInstId,
        f: impl FnOnce(&mut Base<'_>, &mut FrerInstance) -> R,
    ) -> Option<R> {
        let mut st = self.instances.remove(&inst)?;

        let result = {
            let mut base = Base {
                hw: providers.hw,
                streams: providers.streams,
                l2: providers.l2,
                caps: &self.caps,
                cursors: &mut self.cursors,
                others: &self.instances,
                notif: &mut self.notif,
                timers: &mut self.timers,
                link: &self.link,
                now,
            };
            f(&mut base, &mut st)
        };

        self.instances.insert(inst, st);
        Some(result)
    }

    /// Ids of the instances currently in `oper_state` Active.
    pub(crate) fn active_ids(&self) -> Vec<FrerInstId> {
        self.instances
            .values()
            .filter(|st| st.status.oper_state == super::types::FrerOperState::Active)
            .map(|st| st.inst)
            .collect()
    }
}
