//! Operational warnings.
//!
//! Each check recomputes its own warning bits from the current state of the
//! instance and the switch. Checks only write `status.oper_warnings`.

use super::orch::FrerOrchCallbacks;
use super::stream::{AttachTarget, StreamProvider};
use super::table::{Base, FrerInstance};
use super::types::{FrerMode, FrerOperState, OperWarnings};
use log::{debug, error};
use sonic_types::{StpState, VlanId};

/// What the checks look at besides the instance itself.
#[derive(Clone, Copy)]
pub(crate) struct DiagCtx<'a> {
    pub streams: &'a dyn StreamProvider,
    pub l2: &'a dyn FrerOrchCallbacks,
    pub link: &'a [bool],
}

impl<'a> DiagCtx<'a> {
    pub(crate) fn from_base(base: &Base<'a>) -> Self {
        Self {
            streams: base.streams,
            l2: base.l2,
            link: base.link,
        }
    }

    fn has_link(&self, port: u32) -> bool {
        self.link.get(port as usize).copied().unwrap_or(false)
    }
}

/// Stream existence, attachment and health, and ingress/egress overlap.
pub(crate) fn stream_check(ctx: &DiagCtx<'_>, st: &mut FrerInstance) {
    let collection = st.conf.uses_collection();
    let w = &mut st.status.oper_warnings;

    w.remove(
        OperWarnings::STREAM_NOT_FOUND
            | OperWarnings::STREAM_ATTACH_FAIL
            | OperWarnings::STREAM_HAS_OPERATIONAL_WARNINGS
            | OperWarnings::INGRESS_EGRESS_OVERLAP
            | OperWarnings::STREAM_COLLECTION_NOT_FOUND
            | OperWarnings::STREAM_COLLECTION_ATTACH_FAIL
            | OperWarnings::STREAM_COLLECTION_HAS_OPERATIONAL_WARNINGS,
    );

    let (not_found, attach_fail, has_warnings) = if collection {
        (
            OperWarnings::STREAM_COLLECTION_NOT_FOUND,
            OperWarnings::STREAM_COLLECTION_ATTACH_FAIL,
            OperWarnings::STREAM_COLLECTION_HAS_OPERATIONAL_WARNINGS,
        )
    } else {
        (
            OperWarnings::STREAM_NOT_FOUND,
            OperWarnings::STREAM_ATTACH_FAIL,
            OperWarnings::STREAM_HAS_OPERATIONAL_WARNINGS,
        )
    };

    for idx in 0..st.conf.attach_slot_cnt() {
        let Some(target) = AttachTarget::of(&st.conf, idx) else {
            break;
        };
        let state = &st.stream_states[idx];

        if !state.exists {
            w.insert(not_found);
            continue;
        }

        if state.attach_failed {
            w.insert(attach_fail);
        }

        if target.status(ctx.streams).is_ok_and(|s| s.oper_warnings != 0) {
            w.insert(has_warnings);
        }

        if state.ingress_ports.intersects(&st.conf.egress_ports) {
            w.insert(OperWarnings::INGRESS_EGRESS_OVERLAP);
        }
    }
}

/// Generation mode with fewer than two egress ports gives no redundancy.
pub(crate) fn egress_port_check(st: &mut FrerInstance) {
    let w = &mut st.status.oper_warnings;
    w.remove(OperWarnings::EGRESS_PORT_CNT);

    if st.conf.mode == FrerMode::Generation && st.conf.egress_ports.len() < 2 {
        w.insert(OperWarnings::EGRESS_PORT_CNT);
    }
}

/// Link on attached ingress ports and on the egress ports.
pub(crate) fn link_check(ctx: &DiagCtx<'_>, st: &mut FrerInstance) {
    let w = &mut st.status.oper_warnings;
    w.remove(OperWarnings::INGRESS_NO_LINK | OperWarnings::EGRESS_NO_LINK);

    let ingress_down = st
        .stream_states
        .iter()
        .filter(|s| s.exists && !s.attach_failed)
        .flat_map(|s| s.ingress_ports.iter())
        .any(|port| !ctx.has_link(port));
    if ingress_down {
        w.insert(OperWarnings::INGRESS_NO_LINK);
    }

    if st.conf.egress_ports.iter().any(|port| !ctx.has_link(port)) {
        w.insert(OperWarnings::EGRESS_NO_LINK);
    }
}

/// Every egress port must be a member of the FRER VLAN.
///
/// If membership cannot be read the previous verdict stands.
pub(crate) fn vlan_membership_check(ctx: &DiagCtx<'_>, st: &mut FrerInstance) {
    let Ok(vid) = VlanId::new(st.conf.frer_vlan) else {
        return;
    };

    let members = match ctx.l2.vlan_members_get(vid) {
        Ok(members) => members,
        Err(e) => {
            error!(target: "frer::callback", "{}: vlan_members_get({}) failed: {}", st.inst, vid, e);
            return;
        }
    };

    let w = &mut st.status.oper_warnings;
    if st.conf.egress_ports.is_subset(&members) {
        w.remove(OperWarnings::VLAN_MEMBERSHIP);
    } else {
        w.insert(OperWarnings::VLAN_MEMBERSHIP);
    }
}

/// STP and MSTP forwarding state of the egress ports.
///
/// A port whose state cannot be read counts as not forwarding.
pub(crate) fn stp_check(ctx: &DiagCtx<'_>, st: &mut FrerInstance) {
    let inst = st.inst;
    st.status
        .oper_warnings
        .remove(OperWarnings::STP_BLOCKED | OperWarnings::MSTP_BLOCKED);

    let Ok(vid) = VlanId::new(st.conf.frer_vlan) else {
        return;
    };

    let msti = ctx.l2.vlan_msti_get(vid).unwrap_or_else(|e| {
        error!(target: "frer::callback", "{}: vlan_msti_get({}) failed: {}", inst, vid, e);
        0
    });

    for port in st.conf.egress_ports.iter() {
        let stp = ctx.l2.stp_port_state_get(port).unwrap_or_else(|e| {
            error!(target: "frer::callback", "{}: stp_port_state_get({}) failed: {}", inst, port, e);
            StpState::Discarding
        });
        debug!(target: "frer::callback", "{}: port {} STP state {}", inst, port, stp);
        if !stp.is_forwarding() {
            st.status.oper_warnings.insert(OperWarnings::STP_BLOCKED);
        }

        let mstp = ctx.l2.msti_port_state_get(msti, port).unwrap_or_else(|e| {
            error!(
                target: "frer::callback",
                "{}: msti_port_state_get({}, {}) failed: {}", inst, msti, port, e
            );
            StpState::Discarding
        });
        debug!(target: "frer::callback", "{}: port {} MSTI {} state {}", inst, port, msti, mstp);
        if !mstp.is_forwarding() {
            st.status.oper_warnings.insert(OperWarnings::MSTP_BLOCKED);
        }
    }
}

/// Recomputes every warning. Instances that are not Active have none.
///
/// The VLAN membership verdict is carried over, so it survives a failed
/// membership read.
pub(crate) fn oper_warnings_update(ctx: &DiagCtx<'_>, st: &mut FrerInstance) {
    let vlan_membership = st.status.oper_warnings.contains(OperWarnings::VLAN_MEMBERSHIP);
    st.status.oper_warnings = OperWarnings::NONE;

    if st.status.oper_state != FrerOperState::Active {
        return;
    }

    if vlan_membership {
        st.status.oper_warnings.insert(OperWarnings::VLAN_MEMBERSHIP);
    }

    stream_check(ctx, st);
    egress_port_check(st);
    link_check(ctx, st);
    vlan_membership_check(ctx, st);
    stp_check(ctx, st);
}
