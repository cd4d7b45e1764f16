//! Logging wrappers around the hardware contract.
//!
//! Every call is traced with the instance, the caller's location and the
//! outcome. Failures become [`FrerOrchError::Internal`].

use super::error::{FrerOrchError, FrerResult};
use super::types::FrerInstId;
use log::{debug, error};
use sonic_sai::{CStreamId, FrerApi, FrerCounters, FrerStreamConf, MStreamId, SaiResult};
use sonic_types::PortNo;
use std::fmt;
use std::panic::Location;

#[track_caller]
fn check<T>(inst: FrerInstId, call: fmt::Arguments<'_>, result: SaiResult<T>) -> FrerResult<T> {
    let site = Location::caller();
    match result {
        Ok(value) => {
            debug!(target: "frer::base", "{}: [{}] {}", inst, site, call);
            Ok(value)
        }
        Err(e) => {
            error!(target: "frer::base", "{}: [{}] {} failed: {}", inst, site, call, e);
            Err(FrerOrchError::internal(format!("{} failed: {}", call, e)))
        }
    }
}

#[track_caller]
pub(crate) fn cstream_conf_get(
    hw: &dyn FrerApi,
    inst: FrerInstId,
    id: CStreamId,
    idx: usize,
) -> FrerResult<FrerStreamConf> {
    check(inst, format_args!("cstream_conf_get({}) (idx = {})", id, idx), hw.cstream_conf_get(id))
}

#[track_caller]
pub(crate) fn cstream_conf_set(
    hw: &dyn FrerApi,
    inst: FrerInstId,
    id: CStreamId,
    conf: &FrerStreamConf,
    idx: usize,
) -> FrerResult<()> {
    check(
        inst,
        format_args!("cstream_conf_set({}, {:?}) (idx = {})", id, conf, idx),
        hw.cstream_conf_set(id, conf),
    )
}

#[track_caller]
pub(crate) fn cstream_cnt_get(
    hw: &dyn FrerApi,
    inst: FrerInstId,
    id: CStreamId,
    idx: usize,
) -> FrerResult<FrerCounters> {
    check(inst, format_args!("cstream_cnt_get({}) (idx = {})", id, idx), hw.cstream_cnt_get(id))
}

#[track_caller]
pub(crate) fn cstream_cnt_clear(hw: &dyn FrerApi, inst: FrerInstId, id: CStreamId, idx: usize) -> FrerResult<()> {
    check(inst, format_args!("cstream_cnt_clear({}) (idx = {})", id, idx), hw.cstream_cnt_clear(id))
}

#[track_caller]
pub(crate) fn mstream_conf_get(
    hw: &dyn FrerApi,
    inst: FrerInstId,
    base: MStreamId,
    port: PortNo,
) -> FrerResult<FrerStreamConf> {
    check(
        inst,
        format_args!("mstream_conf_get({}, port {})", base, port),
        hw.mstream_conf_get(base, port),
    )
}

#[track_caller]
pub(crate) fn mstream_conf_set(
    hw: &dyn FrerApi,
    inst: FrerInstId,
    base: MStreamId,
    port: PortNo,
    conf: &FrerStreamConf,
) -> FrerResult<()> {
    check(
        inst,
        format_args!("mstream_conf_set({}, port {}, {:?})", base, port, conf),
        hw.mstream_conf_set(base, port, conf),
    )
}

#[track_caller]
pub(crate) fn mstream_cnt_get(
    hw: &dyn FrerApi,
    inst: FrerInstId,
    base: MStreamId,
    port: PortNo,
) -> FrerResult<FrerCounters> {
    check(
        inst,
        format_args!("mstream_cnt_get({}, port {})", base, port),
        hw.mstream_cnt_get(base, port),
    )
}

#[track_caller]
pub(crate) fn mstream_cnt_clear(hw: &dyn FrerApi, inst: FrerInstId, base: MStreamId, port: PortNo) -> FrerResult<()> {
    check(
        inst,
        format_args!("mstream_cnt_clear({}, port {})", base, port),
        hw.mstream_cnt_clear(base, port),
    )
}

/// Reads a compound stream config and writes it straight back. The chip
/// treats the write as a reset of the recovery state.
#[track_caller]
pub(crate) fn cstream_reapply(hw: &dyn FrerApi, inst: FrerInstId, id: CStreamId, idx: usize) -> FrerResult<()> {
    let conf = cstream_conf_get(hw, inst, id, idx)?;
    cstream_conf_set(hw, inst, id, &conf, idx)
}

/// Member stream counterpart of [`cstream_reapply`].
#[track_caller]
pub(crate) fn mstream_reapply(hw: &dyn FrerApi, inst: FrerInstId, base: MStreamId, port: PortNo) -> FrerResult<()> {
    let conf = mstream_conf_get(hw, inst, base, port)?;
    mstream_conf_set(hw, inst, base, port, &conf)
}
