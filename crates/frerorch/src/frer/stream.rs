//! Stream provider contract and the stream attachment engine.
//!
//! A FRER instance hooks into ingress classification by setting an action on
//! the streams (or the one stream collection) it references. The stream
//! provider owns those streams; this module only asks it to bind or unbind
//! the FRER action and remembers what happened in [`StreamState`].

use super::error::{FrerOrchError, FrerResult};
use super::table::{Base, FrerInstance, ModeState, StreamState};
use super::types::{FrerConf, FrerInstId, StreamCollectionId, StreamId, FRER_STREAM_ID_LIST_LEN};
use log::{debug, error, info};
use sonic_orch_common::Observer;
use sonic_sai::MStreamId;
use sonic_types::{PortList, VlanId};
use std::fmt;

/// Configuration of an ingress stream, as far as FRER cares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConf {
    /// Ports the stream is classified on.
    pub port_list: PortList,
}

/// Configuration of a stream collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamCollectionConf {
    pub stream_ids: Vec<StreamId>,
}

/// Status of a stream or stream collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatus {
    /// The provider's own warning bitmask. Zero means none.
    pub oper_warnings: u32,
    /// FRER instance currently attached, if any.
    pub frer_client: Option<FrerInstId>,
}

/// Ingress counters kept by the stream provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngressCounters {
    pub green_frames: u64,
    pub yellow_frames: u64,
    pub red_frames: u64,
}

impl IngressCounters {
    pub fn total(&self) -> u64 {
        self.green_frames + self.yellow_frames + self.red_frames
    }
}

/// FRER action bound to a stream's classification entry.
///
/// The default value is the disabled action used on detach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamAction {
    pub enable: bool,
    pub client_id: FrerInstId,
    pub vid: VlanId,
    /// Add sequence numbers (generation mode).
    pub generation: bool,
    /// Pop the R-tag in the classifier.
    pub pop: bool,
    /// Member stream base the classified frames are recovered in.
    pub mstream_id: Option<MStreamId>,
    pub cut_through_disable: bool,
    /// Number of outer tags to pop before the R-tag is pushed.
    pub pop_outer_tag_cnt: u8,
    /// Apply the action again even if unchanged. Resets the sequence generator.
    pub reapply: bool,
}

/// Stream and stream collection owner, consumed by the FRER engine.
///
/// Errors are plain strings; the engine only logs them.
pub trait StreamProvider: Send + Sync {
    /// Largest valid stream id. Zero if unknown.
    fn stream_id_max(&self) -> StreamId;

    /// Largest valid stream collection id. Zero if unknown.
    fn stream_collection_id_max(&self) -> StreamCollectionId;

    fn stream_conf_get(&self, id: StreamId) -> Result<StreamConf, String>;
    fn stream_status_get(&self, id: StreamId) -> Result<StreamStatus, String>;
    fn stream_action_set(&self, id: StreamId, action: &StreamAction) -> Result<(), String>;
    fn stream_counters_get(&self, id: StreamId) -> Result<IngressCounters, String>;
    fn stream_counters_clear(&self, id: StreamId) -> Result<(), String>;

    fn collection_conf_get(&self, id: StreamCollectionId) -> Result<StreamCollectionConf, String>;
    fn collection_status_get(&self, id: StreamCollectionId) -> Result<StreamStatus, String>;
    fn collection_action_set(&self, id: StreamCollectionId, action: &StreamAction) -> Result<(), String>;
    fn collection_counters_get(&self, id: StreamCollectionId) -> Result<IngressCounters, String>;
    fn collection_counters_clear(&self, id: StreamCollectionId) -> Result<(), String>;

    /// New subscription to stream change events.
    fn stream_changes(&self) -> Observer<StreamId>;

    /// New subscription to stream collection change events.
    fn collection_changes(&self) -> Observer<StreamCollectionId>;
}

/// What attachment slot `idx` of an instance points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttachTarget {
    Stream(StreamId),
    Collection(StreamCollectionId),
}

impl AttachTarget {
    /// A collection only ever occupies slot 0.
    pub(crate) fn of(conf: &FrerConf, idx: usize) -> Option<Self> {
        match conf.stream_collection_id {
            Some(id) if idx == 0 => Some(AttachTarget::Collection(id)),
            Some(_) => None,
            None => conf.stream_ids.get(idx).copied().map(AttachTarget::Stream),
        }
    }

    /// Ingress ports of the stream, or the union over a collection's streams.
    fn ingress_ports(&self, streams: &dyn StreamProvider) -> Result<PortList, String> {
        match *self {
            AttachTarget::Stream(id) => streams.stream_conf_get(id).map(|c| c.port_list),
            AttachTarget::Collection(id) => {
                let conf = streams.collection_conf_get(id)?;
                let mut ports = PortList::new();
                for stream_id in conf.stream_ids {
                    if let Ok(stream) = streams.stream_conf_get(stream_id) {
                        ports.union_with(&stream.port_list);
                    }
                }
                Ok(ports)
            }
        }
    }

    pub(crate) fn status(&self, streams: &dyn StreamProvider) -> Result<StreamStatus, String> {
        match *self {
            AttachTarget::Stream(id) => streams.stream_status_get(id),
            AttachTarget::Collection(id) => streams.collection_status_get(id),
        }
    }

    pub(crate) fn action_set(
        &self,
        streams: &dyn StreamProvider,
        action: &StreamAction,
    ) -> Result<(), String> {
        match *self {
            AttachTarget::Stream(id) => streams.stream_action_set(id, action),
            AttachTarget::Collection(id) => streams.collection_action_set(id, action),
        }
    }

    pub(crate) fn counters_get(&self, streams: &dyn StreamProvider) -> Result<IngressCounters, String> {
        match *self {
            AttachTarget::Stream(id) => streams.stream_counters_get(id),
            AttachTarget::Collection(id) => streams.collection_counters_get(id),
        }
    }

    pub(crate) fn counters_clear(&self, streams: &dyn StreamProvider) -> Result<(), String> {
        match *self {
            AttachTarget::Stream(id) => streams.stream_counters_clear(id),
            AttachTarget::Collection(id) => streams.collection_counters_clear(id),
        }
    }
}

impl fmt::Display for AttachTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachTarget::Stream(id) => write!(f, "stream {}", id),
            AttachTarget::Collection(id) => write!(f, "stream collection {}", id),
        }
    }
}

/// Builds the classification action for slot `idx`.
pub(crate) fn action_build(base: &Base<'_>, st: &FrerInstance, idx: usize) -> FrerResult<StreamAction> {
    let conf = &st.conf;
    let vid = VlanId::new(conf.frer_vlan)
        .map_err(|e| FrerOrchError::internal(format!("FRER VLAN: {}", e)))?;

    let mut action = StreamAction {
        enable: true,
        client_id: st.inst,
        vid,
        ..StreamAction::default()
    };

    match &st.mode_state {
        ModeState::Generation { .. } => {
            action.generation = true;
            action.pop_outer_tag_cnt = u8::from(conf.outer_tag_pop);
        }
        ModeState::Recovery { mstream_base_ids, .. } => {
            let slot = if conf.rcvy_individual { idx } else { 0 };
            let mstream = mstream_base_ids.get(slot).copied().ok_or_else(|| {
                FrerOrchError::internal(format!("no member stream allocated for index {}", slot))
            })?;

            action.pop = base.caps.iflow_pop && conf.rcvy_terminate;
            action.cut_through_disable = true;
            action.mstream_id = Some(mstream);
        }
    }

    Ok(action)
}

/// Attaches slot `idx` to its stream or collection.
///
/// Never fails: a missing stream is remembered and picked up again when the
/// provider reports it, and a failed attach shows up as a warning.
pub(crate) fn attach(base: &Base<'_>, st: &mut FrerInstance, idx: usize) {
    let inst = st.inst;
    let Some(target) = AttachTarget::of(&st.conf, idx) else {
        return;
    };

    st.stream_states[idx] = StreamState::default();

    let lookup = target
        .ingress_ports(base.streams)
        .and_then(|ports| target.status(base.streams).map(|status| (ports, status)));

    let (ingress_ports, status) = match lookup {
        Ok(found) => found,
        Err(e) => {
            debug!(target: "frer::stream", "{}: {} does not exist: {}", inst, target, e);
            return;
        }
    };

    st.stream_states[idx].exists = true;
    st.stream_states[idx].ingress_ports = ingress_ports;

    if let Some(owner) = status.frer_client {
        if owner != inst {
            error!(
                target: "frer::stream",
                "{}: {} is attached to FRER instance {}", inst, target, owner
            );
        }
        return;
    }

    let action = match action_build(base, st, idx) {
        Ok(action) => action,
        Err(e) => {
            error!(target: "frer::stream", "{}: unable to build action for {}: {}", inst, target, e);
            st.stream_states[idx].attach_failed = true;
            return;
        }
    };

    if let ModeState::Generation { gen_resets } = &mut st.mode_state {
        *gen_resets = 1;
        if let Err(e) = target.counters_clear(base.streams) {
            debug!(target: "frer::stream", "{}: clearing counters of {} failed: {}", inst, target, e);
        }
    }

    match target.action_set(base.streams, &action) {
        Ok(()) => debug!(target: "frer::stream", "{}: attached to {}", inst, target),
        Err(e) => {
            info!(target: "frer::stream", "{}: attach to {} failed: {}", inst, target, e);
            st.stream_states[idx].attach_failed = true;
        }
    }
}

/// Detaches slot `idx`. Local state is cleared whatever the outcome.
pub(crate) fn detach(base: &Base<'_>, st: &mut FrerInstance, idx: usize) -> FrerResult<()> {
    let inst = st.inst;
    let state = std::mem::take(&mut st.stream_states[idx]);

    if !state.exists || state.attach_failed {
        return Ok(());
    }

    let Some(target) = AttachTarget::of(&st.conf, idx) else {
        return Ok(());
    };

    target
        .action_set(base.streams, &StreamAction::default())
        .map_err(|e| {
            info!(target: "frer::stream", "{}: detach from {} failed: {}", inst, target, e);
            FrerOrchError::internal(format!("detach from {}: {}", target, e))
        })
}

/// Attaches every configured slot.
pub(crate) fn attach_all(base: &Base<'_>, st: &mut FrerInstance) {
    for idx in 0..st.conf.attach_slot_cnt() {
        attach(base, st, idx);
    }
}

/// Detaches every slot, continuing through failures.
pub(crate) fn detach_all(base: &Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    let mut first = super::error::FirstError::new();
    for idx in 0..FRER_STREAM_ID_LIST_LEN {
        first.record(detach(base, st, idx));
    }
    first.into_result()
}

/// Re-attaches slot `idx` after the provider reported a change.
pub(crate) fn update(base: &Base<'_>, st: &mut FrerInstance, idx: usize) {
    debug!(target: "frer::stream", "{}: re-attaching slot {}", st.inst, idx);
    attach(base, st, idx);
}
