//! Latent error detection (802.1CB clause 7.4.4).
//!
//! Detection is done in software by sampling compound stream counters. Per
//! compound stream the engine tracks `passed * (paths - 1) - discarded`.
//! The reset timer takes a new baseline of that value; the test timer
//! compares the current value against the baseline and raises the sticky
//! latent error flag when the drift exceeds the configured difference.

use super::error::FrerResult;
use super::hw;
use super::table::{Base, FrerInstance, ModeState};
use super::types::{FrerInstId, FrerMode, FrerNotificationStatus};
use log::{debug, info};
use sonic_sai::FrerCounters;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum LedTimerKind {
    Reset,
    Test,
}

/// Key of an LED timer in the orch's timer wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct LedTimer {
    pub inst: FrerInstId,
    pub kind: LedTimerKind,
}

fn difference(cnt: &FrerCounters, paths: u32) -> i128 {
    i128::from(cnt.passed_packets) * (i128::from(paths) - 1) - i128::from(cnt.discarded_packets)
}

fn enabled(st: &FrerInstance) -> bool {
    st.conf.mode == FrerMode::Recovery && st.conf.rcvy_latent_error_detection.enable
}

/// Publishes the latent error flag of the instance.
fn notif_update(base: &mut Base<'_>, st: &mut FrerInstance, latent_error: bool) {
    let notif = FrerNotificationStatus { latent_error };
    if base.notif.get(&st.inst) != Some(&notif) {
        info!(target: "frer::led", "{}: latent_error = {}", st.inst, latent_error);
    }
    base.notif.insert(st.inst, notif);
    st.status.notif_status = notif;
}

/// BEGIN: registers the notification entry and, in recovery mode with
/// detection enabled, arms both timers and takes the first baseline.
pub(crate) fn activate(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    notif_update(base, st, false);

    if let ModeState::Recovery { led, .. } = &mut st.mode_state {
        led.resets = 0;
    }

    if !enabled(st) {
        return Ok(());
    }

    let conf = st.conf.rcvy_latent_error_detection;
    let inst = st.inst;
    base.timers.start(
        LedTimer {
            inst,
            kind: LedTimerKind::Reset,
        },
        Duration::from_millis(u64::from(conf.reset_period_ms)),
        true,
        base.now,
    );
    base.timers.start(
        LedTimer {
            inst,
            kind: LedTimerKind::Test,
        },
        Duration::from_millis(u64::from(conf.period_ms)),
        true,
        base.now,
    );

    debug!(
        target: "frer::led",
        "{}: armed (reset {} ms, test {} ms)", inst, conf.reset_period_ms, conf.period_ms
    );
    reset(base, st)
}

/// END: stops both timers and drops the notification entry.
pub(crate) fn deactivate(base: &mut Base<'_>, st: &mut FrerInstance) {
    for kind in [LedTimerKind::Reset, LedTimerKind::Test] {
        base.timers.stop(&LedTimer { inst: st.inst, kind });
    }
    base.notif.remove(&st.inst);
    st.status.notif_status = FrerNotificationStatus::default();
}

/// Restarts detection with the instance's current LED configuration.
pub(crate) fn conf_change(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    deactivate(base, st);
    activate(base, st)
}

/// LatentErrorReset: takes a new baseline for every compound stream.
pub(crate) fn reset(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    let inst = st.inst;
    let paths = st.conf.rcvy_latent_error_detection.paths;
    let ModeState::Recovery {
        cstream_ids, led, ..
    } = &mut st.mode_state
    else {
        return Ok(());
    };

    let mut baseline = Vec::with_capacity(cstream_ids.len());
    for (idx, id) in cstream_ids.iter().enumerate() {
        let cnt = hw::cstream_cnt_get(base.hw, inst, *id, idx)?;
        baseline.push(difference(&cnt, paths));
    }

    debug!(target: "frer::led", "{}: new baseline {:?}", inst, baseline);
    led.latent_error = vec![false; baseline.len()];
    led.cur_base_difference = baseline;
    led.resets += 1;
    Ok(())
}

/// LatentErrorTest: raises the sticky flag if any compound stream drifted
/// more than the configured difference from its baseline.
pub(crate) fn test(base: &mut Base<'_>, st: &mut FrerInstance) -> FrerResult<()> {
    let inst = st.inst;
    let conf = st.conf.rcvy_latent_error_detection;
    let ModeState::Recovery {
        cstream_ids, led, ..
    } = &mut st.mode_state
    else {
        return Ok(());
    };

    led.latent_error.resize(cstream_ids.len(), false);

    let mut latent_error = false;
    for (idx, id) in cstream_ids.iter().enumerate() {
        let cnt = hw::cstream_cnt_get(base.hw, inst, *id, idx)?;
        let cur = difference(&cnt, conf.paths);
        let baseline = led.cur_base_difference.get(idx).copied().unwrap_or(cur);
        let drift = (baseline - cur).abs();

        led.latent_error[idx] = drift > i128::from(conf.difference);
        if led.latent_error[idx] {
            debug!(
                target: "frer::led",
                "{}: {} drifted {} (threshold {})", inst, id, drift, conf.difference
            );
            latent_error = true;
        }
    }

    if latent_error {
        notif_update(base, st, true);
    }

    Ok(())
}

/// Clears the sticky flag. Only meaningful with detection enabled.
pub(crate) fn latent_error_clear(base: &mut Base<'_>, st: &mut FrerInstance) {
    if enabled(st) {
        notif_update(base, st, false);
    }
}

/// Number of baselines taken since activation.
pub(crate) fn resets(st: &FrerInstance) -> u64 {
    match &st.mode_state {
        ModeState::Recovery { led, .. } => led.resets,
        ModeState::Generation { .. } => 0,
    }
}

/// Zeroes the baseline counter.
pub(crate) fn resets_clear(st: &mut FrerInstance) {
    if let ModeState::Recovery { led, .. } = &mut st.mode_state {
        led.resets = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_difference() {
        let cnt = FrerCounters {
            passed_packets: 1000,
            discarded_packets: 990,
            ..FrerCounters::default()
        };
        assert_eq!(difference(&cnt, 2), 10);
        assert_eq!(difference(&cnt, 3), 1010);

        let lossy = FrerCounters {
            passed_packets: 0,
            discarded_packets: u64::MAX,
            ..FrerCounters::default()
        };
        assert_eq!(difference(&lossy, 2), -i128::from(u64::MAX));
    }

    #[test]
    fn test_timer_keys_order() {
        let a = LedTimer {
            inst: 1,
            kind: LedTimerKind::Test,
        };
        let b = LedTimer {
            inst: 2,
            kind: LedTimerKind::Reset,
        };
        assert!(a < b);
    }
}
