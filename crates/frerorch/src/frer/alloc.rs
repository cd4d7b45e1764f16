//! Compound-stream, member-stream and TCE id allocation.
//!
//! Compound-stream and TCE ids are handed out by scanning forward from the
//! last id given out, wrapping around once. An id is in use if any instance
//! currently records it. Member streams are allocated by the hardware.

use super::error::{FrerOrchError, FrerResult};
use super::hw;
use super::table::{Base, FrerInstance, ModeState};
use log::{debug, error, info};
use sonic_sai::{CStreamId, FrerStreamConf, MStreamId, TceId};

/// First TCE id reserved for FRER.
pub(crate) const TCE_ID_START: u32 = 0xFFFE_0000;

/// One past the last TCE id reserved for FRER.
pub(crate) const TCE_ID_END: u32 = 0xFFFE_FFFF;

/// Scans `[start, end)` forward from the last id handed out.
#[derive(Debug)]
pub(crate) struct IdCursor {
    start: u32,
    end: u32,
    last: Option<u32>,
}

impl IdCursor {
    pub(crate) fn new(start: u32, end: u32) -> Self {
        Self {
            start,
            end,
            last: None,
        }
    }

    /// Returns the next id for which `in_use` is false, wrapping at most once.
    pub(crate) fn next_free(&mut self, in_use: impl Fn(u32) -> bool) -> Option<u32> {
        if self.start >= self.end {
            return None;
        }

        let mut wrapped = false;
        loop {
            let mut candidate = match self.last {
                Some(last) => last.saturating_add(1),
                None => self.start,
            };

            if candidate >= self.end {
                if wrapped {
                    return None;
                }
                wrapped = true;
                candidate = self.start;
            }

            self.last = Some(candidate);
            if !in_use(candidate) {
                return Some(candidate);
            }
        }
    }
}

/// The process-wide cursors.
#[derive(Debug)]
pub(crate) struct IdCursors {
    pub cstream: IdCursor,
    pub tce: IdCursor,
}

impl IdCursors {
    pub(crate) fn new(cstream_cnt: u32) -> Self {
        Self {
            cstream: IdCursor::new(0, cstream_cnt),
            tce: IdCursor::new(TCE_ID_START, TCE_ID_END),
        }
    }
}

/// Allocates the compound stream for egress port index `idx`.
pub(crate) fn cstream_alloc(base: &mut Base<'_>, st: &mut FrerInstance, idx: usize) -> FrerResult<CStreamId> {
    let inst = st.inst;
    let ModeState::Recovery { cstream_ids, .. } = &mut st.mode_state else {
        return Err(FrerOrchError::internal("compound streams only exist in recovery mode"));
    };

    if cstream_ids.len() != idx {
        error!(target: "frer::base", "{}: cstream slot {} is already in use", inst, idx);
        return Err(FrerOrchError::internal(format!("cstream slot {} already in use", idx)));
    }

    let others = base.others;
    let own = cstream_ids.clone();
    let raw = base.cursors.cstream.next_free(|id| {
        let id = CStreamId::from_raw(id);
        own.contains(&id) || others.values().any(|o| o.mode_state.cstream_ids().contains(&id))
    });

    let Some(raw) = raw else {
        error!(target: "frer::base", "{}: no free compound streams", inst);
        return Err(FrerOrchError::internal("out of compound streams"));
    };

    let id = CStreamId::from_raw(raw);
    cstream_ids.push(id);
    debug!(target: "frer::base", "{}: allocated {} for slot {}", inst, id, idx);
    Ok(id)
}

/// Releases all compound streams of the instance.
///
/// There is no delete primitive, so each entry is written back to the
/// default (disabled) config. Slots are released whatever the outcome.
pub(crate) fn cstreams_free(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    let inst = st.inst;
    let ModeState::Recovery { cstream_ids, .. } = &mut st.mode_state else {
        return Ok(());
    };

    let mut first = super::error::FirstError::new();
    for (idx, id) in cstream_ids.drain(..).enumerate() {
        first.record(hw::cstream_conf_set(base.hw, inst, id, &FrerStreamConf::default(), idx));
    }
    first.into_result()
}

/// Allocates member stream set `idx`, one member per egress port.
pub(crate) fn mstream_alloc(base: &mut Base<'_>, st: &mut FrerInstance, idx: usize) -> FrerResult<MStreamId> {
    let inst = st.inst;
    let egress_ports = st.conf.egress_ports.clone();
    let ModeState::Recovery {
        mstream_base_ids, ..
    } = &mut st.mode_state
    else {
        return Err(FrerOrchError::internal("member streams only exist in recovery mode"));
    };

    if mstream_base_ids.len() != idx {
        error!(target: "frer::base", "{}: mstream slot {} is already in use", inst, idx);
        return Err(FrerOrchError::internal(format!("mstream slot {} already in use", idx)));
    }

    match base.hw.mstream_alloc(&egress_ports) {
        Ok(id) => {
            debug!(target: "frer::base", "{}: allocated {} for ports {}", inst, id, egress_ports);
            mstream_base_ids.push(id);
            Ok(id)
        }
        Err(e) => {
            info!(target: "frer::base", "{}: mstream_alloc({}) failed: {}", inst, egress_ports, e);
            Err(FrerOrchError::HwResources)
        }
    }
}

/// Frees all member stream sets of the instance.
pub(crate) fn mstreams_free(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    let inst = st.inst;
    let ModeState::Recovery {
        mstream_base_ids, ..
    } = &mut st.mode_state
    else {
        return Ok(());
    };

    let mut first = super::error::FirstError::new();
    for id in mstream_base_ids.drain(..) {
        first.record(base.hw.mstream_free(id).map_err(|e| {
            error!(target: "frer::base", "{}: mstream_free({}) failed: {}", inst, id, e);
            FrerOrchError::internal(format!("mstream_free({}): {}", id, e))
        }));
    }
    first.into_result()
}

/// Returns the instance's TCE id, allocating one if it has none.
pub(crate) fn tce_alloc(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<TceId> {
    if let Some(id) = st.tce_id {
        return Ok(id);
    }

    let others = base.others;
    let raw = base.cursors.tce.next_free(|id| {
        let id = TceId::from_raw(id);
        others.values().any(|o| o.tce_id == Some(id))
    });

    let Some(raw) = raw else {
        error!(target: "frer::base", "{}: no free TCE ids", st.inst);
        return Err(FrerOrchError::internal("out of TCE ids"));
    };

    let id = TceId::from_raw(raw);
    st.tce_id = Some(id);
    Ok(id)
}
