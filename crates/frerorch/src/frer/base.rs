//! Activation and deactivation of FRER instances in hardware.
//!
//! Activation order:
//!
//! ```text
//! [TCE, without iflow_pop] -> compound streams -> member streams -> attach -> LED
//!                             (recovery only)     (recovery only)
//! ```
//!
//! Deactivation runs the same steps in reverse and never stops early. A
//! failed activation is rolled back by a full deactivation, so an instance
//! never keeps hardware resources unless it is Active.

use super::alloc;
use super::error::{FirstError, FrerOrchError, FrerResult};
use super::hw;
use super::led;
use super::stream::{self, AttachTarget};
use super::table::{Base, FrerInstance, ModeState};
use super::types::{FrerControl, FrerMode, FrerStatistics, StreamId, FRER_STREAM_ID_LIST_LEN};
use log::{debug, error, info};
use sonic_sai::{FrerCounters, FrerStreamConf, TceAction, TceConf, TceInsertion};
use sonic_types::{PortNo, VlanId};

/// Brings the instance up. On failure everything allocated so far is
/// released again before the error is returned.
pub(crate) fn activate(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    info!(target: "frer::base", "{}: activating ({})", st.inst, st.conf.mode);
    st.mode_state = ModeState::new(st.conf.mode);

    let result = activate_steps(base, st);
    if let Err(e) = &result {
        match e {
            FrerOrchError::HwResources => {
                info!(target: "frer::base", "{}: activation failed: {}", st.inst, e)
            }
            _ => error!(target: "frer::base", "{}: activation failed: {}", st.inst, e),
        }

        if let Err(e) = deactivate(base, st) {
            debug!(target: "frer::base", "{}: rollback: {}", st.inst, e);
        }
    }

    result
}

fn activate_steps(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    if !base.caps.iflow_pop {
        tce_activate(base, st)?;
    }

    match st.conf.mode {
        FrerMode::Generation => {}
        FrerMode::Recovery => {
            cstreams_activate(base, st)?;
            mstreams_activate(base, st)?;
        }
    }

    stream::attach_all(base, st);
    led::activate(base, st)
}

/// Tears the instance down, running every step and returning the first
/// error.
pub(crate) fn deactivate(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    info!(target: "frer::base", "{}: deactivating", st.inst);

    let mut first = FirstError::new();
    first.record(stream::detach_all(base, st));
    first.record(alloc::mstreams_free(base, st));
    first.record(alloc::cstreams_free(base, st));
    if !base.caps.iflow_pop {
        first.record(tce_deactivate(base, st));
    }
    led::deactivate(base, st);

    first.into_result()
}

fn tce_activate(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    let id = alloc::tce_alloc(base, st)?;
    let conf = TceConf {
        id,
        egress_ports: st.conf.egress_ports.clone(),
        vid: VlanId::new(st.conf.frer_vlan)
            .map_err(|e| FrerOrchError::internal(format!("FRER VLAN: {}", e)))?,
        action: if st.conf.mode == FrerMode::Recovery && st.conf.rcvy_terminate {
            TceAction::PopRtag
        } else {
            TceAction::PushRtag
        },
    };

    // Always last. Other TCE users are not ordered relative to FRER.
    match base.hw.tce_add(TceInsertion::Last, &conf) {
        Ok(()) => {
            debug!(target: "frer::base", "{}: tce_add({}) on ports {}", st.inst, id, conf.egress_ports);
            Ok(())
        }
        Err(e) => {
            info!(target: "frer::base", "{}: tce_add({}) failed: {}", st.inst, id, e);
            st.tce_id = None;
            Err(FrerOrchError::HwResources)
        }
    }
}

fn tce_deactivate(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    let Some(id) = st.tce_id.take() else {
        return Ok(());
    };

    base.hw.tce_del(id).map_err(|e| {
        error!(target: "frer::base", "{}: tce_del({}) failed: {}", st.inst, id, e);
        FrerOrchError::internal(format!("tce_del({}): {}", id, e))
    })
}

fn cstreams_activate(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    let conf = FrerStreamConf {
        recovery: true,
        alg: st.conf.rcvy_algorithm,
        history_len: st.conf.rcvy_history_len,
        reset_timeout_ms: st.conf.rcvy_reset_timeout_ms,
        take_no_sequence: st.conf.rcvy_take_no_sequence,
        cstream_id: None,
    };

    for idx in 0..st.conf.egress_ports.len() {
        let id = alloc::cstream_alloc(base, st, idx)?;
        hw::cstream_cnt_clear(base.hw, st.inst, id, idx)?;
        hw::cstream_conf_set(base.hw, st.inst, id, &conf, idx)?;
    }

    Ok(())
}

fn mstreams_activate(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    let mut conf = FrerStreamConf {
        recovery: st.conf.rcvy_individual,
        alg: st.conf.rcvy_algorithm,
        history_len: st.conf.rcvy_history_len,
        reset_timeout_ms: st.conf.rcvy_reset_timeout_ms,
        take_no_sequence: st.conf.rcvy_take_no_sequence,
        cstream_id: None,
    };

    let set_cnt = if st.conf.rcvy_individual {
        st.conf.attach_slot_cnt().min(FRER_STREAM_ID_LIST_LEN)
    } else {
        1
    };

    let egress_ports = st.conf.egress_ports.clone();
    for idx in 0..set_cnt {
        let mstream = alloc::mstream_alloc(base, st, idx)?;

        for (cidx, port) in egress_ports.iter().enumerate() {
            let cstream = st.mode_state.cstream_ids().get(cidx).copied().ok_or_else(|| {
                FrerOrchError::internal(format!("no compound stream for egress index {}", cidx))
            })?;

            conf.cstream_id = Some(cstream);
            hw::mstream_cnt_clear(base.hw, st.inst, mstream, port)?;
            hw::mstream_conf_set(base.hw, st.inst, mstream, port, &conf)?;
        }
    }

    Ok(())
}

/// Runs the operator's control request. Latent error clear goes first.
pub(crate) fn control(base: &mut Base<'_>, st: &mut FrerInstance, ctrl: &FrerControl) -> FrerResult<()> {
    if ctrl.latent_error_clear {
        led::latent_error_clear(base, st);
    }

    if ctrl.reset {
        control_reset(base, st)?;
    }

    Ok(())
}

fn control_reset(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    let inst = st.inst;

    if let ModeState::Generation { .. } = st.mode_state {
        // Re-applying the classifier action restarts the sequence generator.
        if let Some(target) = AttachTarget::of(&st.conf, 0) {
            let reapplied = stream::action_build(base, st, 0).and_then(|mut action| {
                action.reapply = true;
                target
                    .action_set(base.streams, &action)
                    .map_err(FrerOrchError::Internal)
            });

            if let Err(e) = reapplied {
                info!(target: "frer::base", "{}: re-applying action on {} failed: {}", inst, target, e);
            }
        }

        if let ModeState::Generation { gen_resets } = &mut st.mode_state {
            *gen_resets += 1;
        }
        return Ok(());
    }

    if st.conf.rcvy_individual {
        for base_id in st.mode_state.mstream_base_ids() {
            for port in st.conf.egress_ports.iter() {
                hw::mstream_reapply(base.hw, inst, *base_id, port)?;
            }
        }
    }

    for (idx, id) in st.mode_state.cstream_ids().iter().enumerate() {
        hw::cstream_reapply(base.hw, inst, *id, idx)?;
    }

    Ok(())
}

fn copy_counters(statistics: &mut FrerStatistics, cnt: &FrerCounters) {
    statistics.rcvy_out_of_order_packets = cnt.out_of_order_packets;
    statistics.rcvy_rogue_packets = cnt.rogue_packets;
    statistics.rcvy_passed_packets = cnt.passed_packets;
    statistics.rcvy_discarded_packets = cnt.discarded_packets;
    statistics.rcvy_lost_packets = cnt.lost_packets;
    statistics.rcvy_tagless_packets = cnt.tagless_packets;
    statistics.rcvy_resets = cnt.resets;
}

/// Reads counters for an already validated statistics key.
pub(crate) fn statistics_get(
    base: &Base<'_>,
    st: &FrerInstance,
    port: Option<PortNo>,
    stream_id: Option<StreamId>,
) -> FrerResult<FrerStatistics> {
    let mut statistics = FrerStatistics::default();

    match &st.mode_state {
        ModeState::Generation { gen_resets } => {
            statistics.gen_resets = *gen_resets;
            if let Some(target) = AttachTarget::of(&st.conf, 0) {
                match target.counters_get(base.streams) {
                    Ok(cnt) => statistics.gen_matches = cnt.total(),
                    Err(e) => {
                        debug!(target: "frer::base", "{}: counters of {} unavailable: {}", st.inst, target, e)
                    }
                }
            }
        }

        ModeState::Recovery {
            cstream_ids,
            mstream_base_ids,
            ..
        } => {
            statistics.rcvy_latent_error_resets = led::resets(st);

            let port = port.ok_or(FrerOrchError::PortMustNotBeNoneInRecovery)?;
            let cidx = st.conf.egress_ports.position(port).ok_or(FrerOrchError::NotPartOfEgressPorts)?;

            let cnt = match stream_id {
                None => {
                    let id = cstream_ids
                        .get(cidx)
                        .copied()
                        .ok_or_else(|| FrerOrchError::internal(format!("no compound stream for port {}", port)))?;
                    hw::cstream_cnt_get(base.hw, st.inst, id, cidx)?
                }
                Some(stream_id) => {
                    let sidx = st
                        .conf
                        .stream_ids
                        .iter()
                        .position(|&s| s == stream_id)
                        .ok_or(FrerOrchError::StreamIdNotFound)?;
                    let mstream = mstream_base_ids
                        .get(sidx)
                        .copied()
                        .ok_or_else(|| FrerOrchError::internal(format!("no member stream for stream {}", stream_id)))?;
                    hw::mstream_cnt_get(base.hw, st.inst, mstream, port)?
                }
            };

            copy_counters(&mut statistics, &cnt);
        }
    }

    Ok(statistics)
}

/// Clears every counter the instance owns.
pub(crate) fn statistics_clear(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    let inst = st.inst;

    if let ModeState::Generation { gen_resets } = &mut st.mode_state {
        *gen_resets = 0;
        if let Some(target) = AttachTarget::of(&st.conf, 0) {
            if let Err(e) = target.counters_clear(base.streams) {
                debug!(target: "frer::base", "{}: clearing counters of {} failed: {}", inst, target, e);
            }
        }
        return Ok(());
    }

    led::resets_clear(st);

    let mut first = FirstError::new();
    for base_id in st.mode_state.mstream_base_ids() {
        for port in st.conf.egress_ports.iter() {
            first.record(hw::mstream_cnt_clear(base.hw, inst, *base_id, port));
        }
    }

    for (idx, id) in st.mode_state.cstream_ids().iter().enumerate() {
        first.record(hw::cstream_cnt_clear(base.hw, inst, *id, idx));
    }

    first.into_result()
}
