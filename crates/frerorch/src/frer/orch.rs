//! FrerOrch: configuration engine and operator surface.

use super::base;
use super::diag::{self, DiagCtx};
use super::error::{FrerOrchError, FrerResult};
use super::led::{self, LedTimerKind};
use super::stream::{self, StreamProvider};
use super::table::{FrerInstance, FrerOrchStats, FrerTable, Providers};
use super::types::{
    FrerCapabilities, FrerConf, FrerControl, FrerInstId, FrerMode, FrerNotificationStatus,
    FrerOperState, FrerStatistics, FrerStatisticsKey, FrerStatus, StreamCollectionId, StreamId,
    FRER_EGRESS_PORT_CNT_ABS_MAX, FRER_STREAM_ID_LIST_LEN,
};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sonic_orch_common::{Observer, Orch};
use sonic_sai::FrerApi;
use sonic_types::{PortList, PortNo, StpState, VlanId};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// L2 state FRER diagnoses egress ports against.
pub trait FrerOrchCallbacks: Send + Sync {
    fn vlan_members_get(&self, vid: VlanId) -> Result<PortList, String>;
    fn stp_port_state_get(&self, port: PortNo) -> Result<StpState, String>;
    fn vlan_msti_get(&self, vid: VlanId) -> Result<u8, String>;
    fn msti_port_state_get(&self, msti: u8, port: PortNo) -> Result<StpState, String>;
}

/// FrerOrch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrerOrchConfig {
    /// Used when the stream provider reports no stream id limit.
    pub default_stream_id_max: StreamId,
    /// Used when the stream provider reports no collection id limit.
    pub default_stream_collection_id_max: StreamCollectionId,
    /// Emit audit records for configuration changes.
    pub audit: bool,
}

impl Default for FrerOrchConfig {
    fn default() -> Self {
        Self {
            default_stream_id_max: 127,
            default_stream_collection_id_max: 63,
            audit: true,
        }
    }
}

/// Asynchronous events delivered to [`FrerOrch`] as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrerNotification {
    PortLink { port: PortNo, link: bool },
    VlanMembership { vid: u16 },
    StpState { port: PortNo },
    MstiState { port: PortNo },
}

/// FRER orchestrator.
///
/// Every entry point takes the table lock for its full duration. Nothing
/// below the entry points takes it again.
pub struct FrerOrch {
    config: FrerOrchConfig,
    caps: FrerCapabilities,
    hw: Arc<dyn FrerApi>,
    streams: Arc<dyn StreamProvider>,
    callbacks: Arc<dyn FrerOrchCallbacks>,
    stream_changes: Observer<StreamId>,
    collection_changes: Observer<StreamCollectionId>,
    table: Mutex<FrerTable>,
}

impl FrerOrch {
    pub fn new(
        config: FrerOrchConfig,
        hw: Arc<dyn FrerApi>,
        streams: Arc<dyn StreamProvider>,
        callbacks: Arc<dyn FrerOrchCallbacks>,
    ) -> Self {
        let hw_caps = hw.capabilities();
        let caps = capabilities_compute(&config, &hw_caps, streams.as_ref());

        info!(
            target: "frer",
            "egress_port_cnt_max = {}, mstream count = {}, cstream count = {}, inst_cnt_max = {}",
            caps.egress_port_cnt_max, caps.rcvy_mstream_cnt_max, caps.rcvy_cstream_cnt_max, caps.inst_cnt_max
        );

        Self {
            stream_changes: streams.stream_changes(),
            collection_changes: streams.collection_changes(),
            table: Mutex::new(FrerTable::new(caps, hw_caps.cstream_cnt)),
            config,
            caps,
            hw,
            streams,
            callbacks,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn providers(&self) -> Providers<'_> {
        Providers {
            hw: self.hw.as_ref(),
            streams: self.streams.as_ref(),
            l2: self.callbacks.as_ref(),
        }
    }

    fn audit(&self, record: AuditRecord) {
        if self.config.audit {
            audit_log!(record);
        }
    }

    fn supported(&self) -> FrerResult<()> {
        if self.caps.inst_cnt_max == 0 {
            return Err(FrerOrchError::NotSupported);
        }
        Ok(())
    }

    fn inst_check(&self, inst: FrerInstId) -> FrerResult<()> {
        if inst < 1 || inst > self.caps.inst_cnt_max {
            return Err(FrerOrchError::InvalidParameter);
        }
        Ok(())
    }

    pub fn config(&self) -> &FrerOrchConfig {
        &self.config
    }

    pub fn capabilities(&self) -> FrerCapabilities {
        self.caps
    }

    pub fn default_conf(&self) -> FrerConf {
        FrerConf::default()
    }

    pub fn stats(&self) -> FrerOrchStats {
        self.lock().stats.clone()
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn conf_get(&self, inst: FrerInstId) -> FrerResult<FrerConf> {
        self.supported()?;
        self.inst_check(inst)?;

        let table = self.lock();
        table
            .instances
            .get(&inst)
            .map(|st| st.conf.clone())
            .ok_or(FrerOrchError::NoSuchInstance)
    }

    /// Creates or updates an instance.
    ///
    /// The configuration is validated and normalized before anything is
    /// touched; a rejected configuration leaves the table as it was. An
    /// identical configuration is accepted without any hardware access.
    pub fn conf_set(&self, inst: FrerInstId, conf: &FrerConf) -> FrerResult<()> {
        let mut created = false;
        let result = self.conf_set_locked(inst, conf, &mut created);

        let category = if created {
            AuditCategory::ResourceCreate
        } else {
            AuditCategory::ResourceModify
        };
        let record = AuditRecord::new(category, "FrerOrch", "conf_set")
            .with_object_id(format!("frer_{}", inst))
            .with_object_type("frer_instance")
            .with_details(serde_json::json!({
                "mode": conf.mode.to_string(),
                "frer_vlan": conf.frer_vlan,
                "stream_ids": conf.stream_ids,
                "stream_collection_id": conf.stream_collection_id,
                "egress_ports": conf.egress_ports.to_string(),
                "admin_active": conf.admin_active,
            }));
        self.audit(match &result {
            Ok(()) => record.with_outcome(AuditOutcome::Success),
            Err(e) => record.with_error(e.to_string()),
        });

        result
    }

    fn conf_set_locked(&self, inst: FrerInstId, conf: &FrerConf, created: &mut bool) -> FrerResult<()> {
        self.supported()?;
        self.inst_check(inst)?;

        debug!(target: "frer", "{}: conf_set {:?}", inst, conf);
        let local = conf_validate(&self.caps, conf)?;

        let mut table = self.lock();

        match table.instances.get(&inst) {
            Some(st) if st.conf == local => return Ok(()),
            Some(_) => {}
            None => {
                if table.instances.len() >= self.caps.inst_cnt_max as usize {
                    return Err(FrerOrchError::LimitReached);
                }
            }
        }

        if local.admin_active {
            conflicts_check(&table, inst, &local)?;
        }

        if !table.instances.contains_key(&inst) {
            table.instances.insert(inst, FrerInstance::new(inst));
            *created = true;
        }

        table.stats.conf_sets += 1;
        self.conf_update(&mut table, inst, Some(local))
    }

    /// Applies `new_conf` (or re-applies the current one) to hardware.
    ///
    /// A change confined to latent error detection on an Active instance
    /// only restarts detection. Any other change on an Active instance tears
    /// it down first.
    fn conf_update(&self, table: &mut FrerTable, inst: FrerInstId, new_conf: Option<FrerConf>) -> FrerResult<()> {
        let started = table.started;

        let outcome = table.with_instance(self.providers(), Instant::now(), inst, |b, st| {
            let mut only_led_changed = false;
            let mut deactivate_old = false;

            if let Some(new) = &new_conf {
                if st.status.oper_state == FrerOperState::Active {
                    let mut tmp = st.conf.clone();
                    tmp.rcvy_latent_error_detection = new.rcvy_latent_error_detection;
                    only_led_changed = &tmp == new;
                    deactivate_old = !only_led_changed;
                }
            }

            info!(
                target: "frer",
                "{}: old state = {:?}, deactivate old = {}, only LED changed = {}, started = {}",
                inst, st.status.oper_state, deactivate_old, only_led_changed, started
            );

            if deactivate_old {
                st.status.oper_state = FrerOperState::AdminDisabled;
                if let Err(e) = base::deactivate(b, st) {
                    info!(target: "frer", "{}: unable to deactivate: {}", inst, e);
                }
            }

            if let Some(new) = new_conf {
                st.conf = new;
            }

            let mut result = Ok(());
            let mut activated = None;
            if only_led_changed {
                if let Err(e) = led::conf_change(b, st) {
                    debug!(target: "frer", "{}: LED restart: {}", inst, e);
                }
            } else if started && st.conf.admin_active {
                match base::activate(b, st) {
                    Ok(()) => st.status.oper_state = FrerOperState::Active,
                    Err(e) => {
                        st.status.oper_state = FrerOperState::InternalError;
                        result = Err(e);
                    }
                }
                activated = Some(result.is_ok());
            } else if !st.conf.admin_active {
                st.status.oper_state = FrerOperState::AdminDisabled;
            }

            diag::oper_warnings_update(&DiagCtx::from_base(b), st);
            (result, activated)
        });

        let Some((result, activated)) = outcome else {
            return Err(FrerOrchError::NoSuchInstance);
        };

        match activated {
            Some(true) => table.stats.activations += 1,
            Some(false) => table.stats.activation_failures += 1,
            None => {}
        }

        result
    }

    /// Deletes an instance, tearing it down first if it is enabled. The
    /// instance is removed even if the teardown reports an error.
    pub fn conf_del(&self, inst: FrerInstId) -> FrerResult<()> {
        self.supported()?;
        self.inst_check(inst)?;

        let result = {
            let mut table = self.lock();
            let Some(st) = table.instances.get(&inst) else {
                return Err(FrerOrchError::NoSuchInstance);
            };

            let result = if st.conf.admin_active {
                let mut new_conf = st.conf.clone();
                new_conf.admin_active = false;
                self.conf_update(&mut table, inst, Some(new_conf))
            } else {
                Ok(())
            };

            table.instances.remove(&inst);
            table.notif.remove(&inst);
            table.stats.conf_dels += 1;
            result
        };

        let record = AuditRecord::new(AuditCategory::ResourceDelete, "FrerOrch", "conf_del")
            .with_object_id(format!("frer_{}", inst))
            .with_object_type("frer_instance");
        self.audit(match &result {
            Ok(()) => record.with_outcome(AuditOutcome::Success),
            Err(e) => record.with_error(e.to_string()),
        });

        result
    }

    /// Next instance id after `prev`, or the first one.
    pub fn itr(&self, prev: Option<FrerInstId>) -> Option<FrerInstId> {
        let table = self.lock();
        let lower = match prev {
            Some(prev) => Bound::Excluded(prev),
            None => Bound::Unbounded,
        };
        table.instances.range((lower, Bound::Unbounded)).next().map(|(inst, _)| *inst)
    }

    /// Resets and/or clears the latent error flag. Ignored unless Active.
    pub fn control_set(&self, inst: FrerInstId, ctrl: &FrerControl) -> FrerResult<()> {
        self.inst_check(inst)?;

        let result = {
            let mut table = self.lock();
            let Some(st) = table.instances.get(&inst) else {
                return Err(FrerOrchError::NoSuchInstance);
            };

            info!(target: "frer", "{}: control {:?}", inst, ctrl);
            if st.status.oper_state != FrerOperState::Active {
                return Ok(());
            }

            table
                .with_instance(self.providers(), Instant::now(), inst, |b, st| base::control(b, st, ctrl))
                .unwrap_or(Err(FrerOrchError::NoSuchInstance))
        };

        let record = AuditRecord::new(AuditCategory::AdminAction, "FrerOrch", "control_set")
            .with_object_id(format!("frer_{}", inst))
            .with_object_type("frer_instance")
            .with_details(serde_json::json!({
                "reset": ctrl.reset,
                "latent_error_clear": ctrl.latent_error_clear,
            }));
        self.audit(match &result {
            Ok(()) => record.with_outcome(AuditOutcome::Success),
            Err(e) => record.with_error(e.to_string()),
        });

        result
    }

    pub fn status_get(&self, inst: FrerInstId) -> FrerResult<FrerStatus> {
        self.inst_check(inst)?;
        let table = self.lock();
        table
            .instances
            .get(&inst)
            .map(|st| st.status)
            .ok_or(FrerOrchError::NoSuchInstance)
    }

    /// Sticky latent error state. Only instances that have been activated
    /// have an entry.
    pub fn notification_status_get(&self, inst: FrerInstId) -> FrerResult<FrerNotificationStatus> {
        self.inst_check(inst)?;
        let table = self.lock();
        table.notif.get(&inst).copied().ok_or(FrerOrchError::NoSuchInstance)
    }

    /// Counters for one statistics key.
    ///
    /// In generation mode both `port` and `stream_id` must be `None`. In
    /// recovery mode `port` selects the egress port, and `stream_id` picks a
    /// member stream (individual recovery only) instead of the compound
    /// stream. Inactive instances report zeros.
    pub fn statistics_get(
        &self,
        inst: FrerInstId,
        port: Option<PortNo>,
        stream_id: Option<StreamId>,
    ) -> FrerResult<FrerStatistics> {
        self.inst_check(inst)?;

        let mut table = self.lock();
        let Some(st) = table.instances.get(&inst) else {
            return Err(FrerOrchError::NoSuchInstance);
        };

        self.statistics_key_check(st, port, stream_id)?;

        if st.status.oper_state != FrerOperState::Active {
            return Ok(FrerStatistics::default());
        }

        table
            .with_instance(self.providers(), Instant::now(), inst, |b, st| {
                base::statistics_get(b, st, port, stream_id)
            })
            .unwrap_or(Err(FrerOrchError::NoSuchInstance))
    }

    fn statistics_key_check(
        &self,
        st: &FrerInstance,
        port: Option<PortNo>,
        stream_id: Option<StreamId>,
    ) -> FrerResult<()> {
        if st.conf.mode == FrerMode::Generation {
            if port.is_some() {
                return Err(FrerOrchError::PortMustBeNoneInGeneration);
            }
            if stream_id.is_some() {
                return Err(FrerOrchError::StreamIdMustBeNoneInGeneration);
            }
            return Ok(());
        }

        let port = port.ok_or(FrerOrchError::PortMustNotBeNoneInRecovery)?;
        if port >= self.caps.port_cnt {
            return Err(FrerOrchError::InvalidPort);
        }
        if !st.conf.egress_ports.contains(port) {
            return Err(FrerOrchError::NotPartOfEgressPorts);
        }

        let Some(stream_id) = stream_id else {
            return Ok(());
        };

        if !st.individual_recovery() {
            return Err(FrerOrchError::StreamIdOnlyInIndividualRecovery);
        }
        if stream_id < 1 || stream_id > self.caps.stream_id_max {
            return Err(FrerOrchError::InvalidStreamId);
        }
        if !st.conf.stream_ids.contains(&stream_id) {
            return Err(FrerOrchError::StreamIdNotFound);
        }

        Ok(())
    }

    /// Clears the counters of an Active instance.
    pub fn statistics_clear(&self, inst: FrerInstId) -> FrerResult<()> {
        self.inst_check(inst)?;

        let result = {
            let mut table = self.lock();
            let Some(st) = table.instances.get(&inst) else {
                return Err(FrerOrchError::NoSuchInstance);
            };

            if st.status.oper_state != FrerOperState::Active {
                return Ok(());
            }

            table
                .with_instance(self.providers(), Instant::now(), inst, base::statistics_clear)
                .unwrap_or(Err(FrerOrchError::NoSuchInstance))
        };

        let record = AuditRecord::new(AuditCategory::AdminAction, "FrerOrch", "statistics_clear")
            .with_object_id(format!("frer_{}", inst))
            .with_object_type("frer_instance");
        self.audit(match &result {
            Ok(()) => record.with_outcome(AuditOutcome::Success),
            Err(e) => record.with_error(e.to_string()),
        });

        result
    }

    /// Next statistics key after `prev`, over Active instances only.
    ///
    /// Generation instances have the single key `(inst, None, None)`.
    /// Recovery instances have one `(inst, Some(port), None)` key per egress
    /// port; with individual recovery each is preceded by one
    /// `(inst, Some(port), Some(stream))` key per stream.
    pub fn statistics_itr(&self, prev: Option<FrerStatisticsKey>) -> Option<FrerStatisticsKey> {
        let table = self.lock();

        for st in table.instances.values() {
            if st.status.oper_state != FrerOperState::Active {
                continue;
            }
            if prev.is_some_and(|(prev_inst, _, _)| st.inst < prev_inst) {
                continue;
            }

            for (port, stream_id) in statistics_keys(st) {
                let after_prev = match prev {
                    Some((prev_inst, prev_port, prev_stream)) if prev_inst == st.inst => {
                        key_rank(port, stream_id) > key_rank(prev_port, prev_stream)
                    }
                    _ => true,
                };

                if after_prev {
                    return Some((st.inst, port, stream_id));
                }
            }
        }

        None
    }

    /// Disables every enabled instance, then erases all instances.
    pub fn restore_defaults(&self) {
        let mut table = self.lock();

        let enabled: Vec<(FrerInstId, FrerConf)> = table
            .instances
            .values()
            .filter(|st| st.conf.admin_active)
            .map(|st| (st.inst, st.conf.clone()))
            .collect();

        for (inst, mut conf) in enabled {
            conf.admin_active = false;
            if let Err(e) = self.conf_update(&mut table, inst, Some(conf)) {
                info!(target: "frer", "{}: disabling for defaults: {}", inst, e);
            }
        }

        let cnt = table.instances.len();
        table.instances.clear();
        table.notif.clear();
        drop(table);

        self.audit(
            AuditRecord::new(AuditCategory::ConfigurationChange, "FrerOrch", "restore_defaults")
                .with_outcome(AuditOutcome::Success)
                .with_details(serde_json::json!({ "instances_removed": cnt })),
        );
    }

    /// Raises the start gate. Every enabled instance is activated and change
    /// notifications are processed from now on. Calling it again does
    /// nothing.
    pub fn start(&self) {
        let mut table = self.lock();
        if table.started {
            return;
        }

        table.started = true;
        let ids: Vec<FrerInstId> = table.instances.keys().copied().collect();
        for inst in &ids {
            if let Err(e) = self.conf_update(&mut table, *inst, None) {
                info!(target: "frer", "{}: activation at start failed: {}", inst, e);
            }
        }
        drop(table);

        self.audit(
            AuditRecord::new(AuditCategory::SystemLifecycle, "FrerOrch", "start")
                .with_outcome(AuditOutcome::Success)
                .with_details(serde_json::json!({ "instances": ids.len() })),
        );
    }

    /// Runs `check` on every Active instance that `filter` selects.
    fn diag_active(
        &self,
        table: &mut FrerTable,
        filter: impl Fn(&FrerInstance) -> bool,
        check: impl Fn(&DiagCtx<'_>, &mut FrerInstance),
    ) {
        let FrerTable {
            instances, link, ..
        } = table;
        let ctx = DiagCtx {
            streams: self.streams.as_ref(),
            l2: self.callbacks.as_ref(),
            link: link.as_slice(),
        };

        for st in instances.values_mut() {
            if st.status.oper_state == FrerOperState::Active && filter(st) {
                check(&ctx, st);
            }
        }
    }

    /// Link went up or down on `port`.
    pub fn port_link_change(&self, port: PortNo, link: bool) {
        let mut table = self.lock();
        let Some(state) = table.link.get_mut(port as usize) else {
            debug!(target: "frer::callback", "link change on unknown port {}", port);
            return;
        };

        if *state == link {
            return;
        }
        *state = link;
        debug!(target: "frer::callback", "port {} link {}", port, if link { "up" } else { "down" });

        self.diag_active(&mut table, |_| true, diag::link_check);
    }

    /// Port membership of `vid` changed.
    pub fn vlan_membership_change(&self, vid: VlanId) {
        let mut table = self.lock();
        debug!(target: "frer::callback", "VLAN {} membership changed", vid);
        self.diag_active(
            &mut table,
            |st| st.conf.frer_vlan == vid.as_u16(),
            diag::vlan_membership_check,
        );
    }

    /// STP state of `port` changed.
    pub fn stp_state_change(&self, port: PortNo) {
        let mut table = self.lock();
        debug!(target: "frer::callback", "STP change on port {}", port);
        self.diag_active(&mut table, |st| st.conf.egress_ports.contains(port), diag::stp_check);
    }

    /// MSTI state of `port` changed.
    pub fn msti_state_change(&self, port: PortNo) {
        let mut table = self.lock();
        debug!(target: "frer::callback", "MSTP change on port {}", port);
        self.diag_active(&mut table, |st| st.conf.egress_ports.contains(port), diag::stp_check);
    }

    /// Dispatches a JSON encoded [`FrerNotification`].
    pub fn handle_notification(&self, json: &str) -> Result<(), serde_json::Error> {
        match serde_json::from_str::<FrerNotification>(json)? {
            FrerNotification::PortLink { port, link } => self.port_link_change(port, link),
            FrerNotification::VlanMembership { vid } => match VlanId::new(vid) {
                Ok(vid) => self.vlan_membership_change(vid),
                Err(e) => warn!(target: "frer::callback", "ignoring VLAN notification: {}", e),
            },
            FrerNotification::StpState { port } => self.stp_state_change(port),
            FrerNotification::MstiState { port } => self.msti_state_change(port),
        }
        Ok(())
    }

    pub fn has_pending_stream_changes(&self) -> bool {
        self.stream_changes.has_pending() || self.collection_changes.has_pending()
    }

    /// Drains the stream and collection change logs and re-attaches every
    /// Active instance that references a changed key. Before
    /// [`start`](Self::start) the events are dropped. Returns the number of
    /// events seen.
    pub fn process_stream_changes(&self) -> usize {
        let stream_events = self.stream_changes.drain();
        let collection_events = self.collection_changes.drain();
        let cnt = stream_events.len() + collection_events.len();
        if cnt == 0 {
            return 0;
        }

        for (id, event) in &stream_events {
            debug!(target: "frer::notif", "stream {}: {:?}", id, event);
        }
        for (id, event) in &collection_events {
            debug!(target: "frer::notif", "stream collection {}: {:?}", id, event);
        }

        let mut table = self.lock();
        if !table.started {
            debug!(target: "frer::notif", "not started, dropping {} events", cnt);
            return cnt;
        }
        table.stats.stream_events += cnt as u64;

        let now = Instant::now();
        for inst in table.active_ids() {
            table.with_instance(self.providers(), now, inst, |b, st| {
                let slots: Vec<usize> = match st.conf.stream_collection_id {
                    Some(id) if collection_events.contains_key(&id) => vec![0],
                    Some(_) => Vec::new(),
                    None => st
                        .conf
                        .stream_ids
                        .iter()
                        .enumerate()
                        .filter(|(_, id)| stream_events.contains_key(*id))
                        .map(|(idx, _)| idx)
                        .collect(),
                };

                if slots.is_empty() {
                    return;
                }

                for idx in slots {
                    stream::update(b, st, idx);
                }

                let ctx = DiagCtx::from_base(b);
                diag::stream_check(&ctx, st);
                diag::link_check(&ctx, st);
            });
        }

        cnt
    }

    /// Runs every LED timer due at `now`. Returns the number that fired.
    pub fn process_timers(&self, now: Instant) -> usize {
        let mut table = self.lock();
        let fired = table.timers.expire(now);

        for timer in &fired {
            table.stats.timer_expirations += 1;
            table.with_instance(self.providers(), now, timer.inst, |b, st| {
                let result = match timer.kind {
                    LedTimerKind::Reset => led::reset(b, st),
                    LedTimerKind::Test => led::test(b, st),
                };
                if let Err(e) = result {
                    debug!(target: "frer::led", "{}: {:?} timer: {}", st.inst, timer.kind, e);
                }
            });
        }

        fired.len()
    }

    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.lock().timers.next_deadline()
    }
}

#[async_trait]
impl Orch for FrerOrch {
    fn name(&self) -> &str {
        "FrerOrch"
    }

    async fn do_task(&mut self) {
        self.process_stream_changes();
    }

    fn has_pending_tasks(&self) -> bool {
        self.has_pending_stream_changes()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        let mut pending = Vec::new();
        if self.stream_changes.has_pending() {
            pending.push(format!("stream changes: {}", self.stream_changes.pending_count()));
        }
        if self.collection_changes.has_pending() {
            pending.push(format!(
                "stream collection changes: {}",
                self.collection_changes.pending_count()
            ));
        }
        pending
    }

    fn on_timer(&mut self) {
        self.process_timers(Instant::now());
    }

    fn next_timer_deadline(&self) -> Option<Instant> {
        FrerOrch::next_timer_deadline(self)
    }

    fn on_notification(&mut self, notification: &str) {
        if let Err(e) = self.handle_notification(notification) {
            warn!(target: "frer::callback", "bad notification {:?}: {}", notification, e);
        }
    }
}

/// Derives FRER capabilities from the chip and the stream provider.
fn capabilities_compute(
    config: &FrerOrchConfig,
    hw: &sonic_sai::FrerHwCapabilities,
    streams: &dyn StreamProvider,
) -> FrerCapabilities {
    let stream_id_max = match streams.stream_id_max() {
        0 => config.default_stream_id_max,
        max => max,
    };
    let stream_collection_id_max = match streams.stream_collection_id_max() {
        0 => config.default_stream_collection_id_max,
        max => max,
    };

    let egress_port_cnt_max = hw.egress_port_cnt_max.min(FRER_EGRESS_PORT_CNT_ABS_MAX);

    // Recovery needs at least two member streams per compound stream, and
    // every instance needs at least one stream.
    let inst_cnt_max = (hw.mstream_cnt / 2).min(hw.cstream_cnt).min(stream_id_max);

    FrerCapabilities {
        inst_cnt_max,
        egress_port_cnt_max,
        rcvy_mstream_cnt_max: hw.mstream_cnt,
        rcvy_cstream_cnt_max: hw.cstream_cnt,
        stream_id_max,
        stream_collection_id_max,
        rcvy_history_len_min: 2,
        rcvy_history_len_max: 32,
        rcvy_reset_timeout_ms_min: 1,
        rcvy_reset_timeout_ms_max: 4095,
        rcvy_latent_error_difference_min: 0,
        rcvy_latent_error_difference_max: 10_000_000,
        rcvy_latent_error_period_ms_min: 1000,
        rcvy_latent_error_period_ms_max: 86_400_000,
        rcvy_latent_error_paths_min: 2,
        rcvy_latent_error_paths_max: egress_port_cnt_max,
        rcvy_latent_reset_period_ms_min: 1000,
        rcvy_latent_reset_period_ms_max: 86_400_000,
        port_cnt: hw.port_cnt,
        iflow_pop: hw.iflow_pop,
    }
}

fn range_check(value: u32, min: u32, max: u32, err: FrerOrchError) -> FrerResult<()> {
    if value < min || value > max {
        return Err(err);
    }
    Ok(())
}

/// Validates `conf` and returns its normalized form: stream ids sorted
/// without duplicates and egress ports limited to existing ports.
fn conf_validate(caps: &FrerCapabilities, conf: &FrerConf) -> FrerResult<FrerConf> {
    let mut local = conf.clone();

    local.stream_ids.sort_unstable();
    local.stream_ids.dedup();
    if local.stream_ids.len() > FRER_STREAM_ID_LIST_LEN
        || local.stream_ids.iter().any(|&id| id < 1 || id > caps.stream_id_max)
    {
        return Err(FrerOrchError::InvalidStreamIdList);
    }

    let stream_cnt = local.stream_ids.len() as u32;

    if stream_cnt > 0 && local.stream_collection_id.is_some() {
        return Err(FrerOrchError::StreamIdAndCollectionSimultaneously);
    }

    if let Some(id) = local.stream_collection_id {
        range_check(id, 1, caps.stream_collection_id_max, FrerOrchError::InvalidStreamCollectionId)?;
    }

    if VlanId::new(local.frer_vlan).is_err() {
        return Err(FrerOrchError::InvalidVlan);
    }

    local.egress_ports = conf.egress_ports.masked(caps.port_cnt);
    let port_cnt = local.egress_ports.len() as u32;
    if port_cnt > caps.egress_port_cnt_max {
        return Err(FrerOrchError::EgressPortCntExceeded);
    }

    range_check(
        local.rcvy_history_len,
        caps.rcvy_history_len_min,
        caps.rcvy_history_len_max,
        FrerOrchError::InvalidHistoryLen,
    )?;
    range_check(
        local.rcvy_reset_timeout_ms,
        caps.rcvy_reset_timeout_ms_min,
        caps.rcvy_reset_timeout_ms_max,
        FrerOrchError::InvalidResetTimeout,
    )?;

    let led = &local.rcvy_latent_error_detection;
    range_check(
        led.difference,
        caps.rcvy_latent_error_difference_min,
        caps.rcvy_latent_error_difference_max,
        FrerOrchError::InvalidLatentErrorDiff,
    )?;
    range_check(
        led.period_ms,
        caps.rcvy_latent_error_period_ms_min,
        caps.rcvy_latent_error_period_ms_max,
        FrerOrchError::InvalidLatentErrorPeriod,
    )?;
    range_check(
        led.paths,
        caps.rcvy_latent_error_paths_min,
        caps.rcvy_latent_error_paths_max,
        FrerOrchError::InvalidLatentErrorPaths,
    )?;
    range_check(
        led.reset_period_ms,
        caps.rcvy_latent_reset_period_ms_min,
        caps.rcvy_latent_reset_period_ms_max,
        FrerOrchError::InvalidLatentResetPeriod,
    )?;

    // Deferred until enabled, so that a default instance can be created.
    if local.admin_active {
        if stream_cnt == 0 && !local.uses_collection() {
            return Err(FrerOrchError::NoStreamsWhenEnabled);
        }

        if local.mode == FrerMode::Generation && !local.uses_collection() && stream_cnt != 1 {
            return Err(FrerOrchError::GenerationStreamCountMustBeOne);
        }

        if local.uses_collection() && local.mode == FrerMode::Recovery && local.rcvy_individual {
            return Err(FrerOrchError::IndividualRecoveryWithCollection);
        }

        if stream_cnt > caps.egress_port_cnt_max {
            return Err(FrerOrchError::StreamCntExceeded);
        }

        if port_cnt == 0 {
            return Err(FrerOrchError::EgressPortCntZero);
        }
    }

    Ok(local)
}

/// Two enabled instances may not share a stream or a stream collection.
fn conflicts_check(table: &FrerTable, inst: FrerInstId, conf: &FrerConf) -> FrerResult<()> {
    for other in table.instances.values() {
        if other.inst == inst || !other.conf.admin_active {
            continue;
        }

        if conf.stream_ids.iter().any(|id| other.conf.stream_ids.contains(id)) {
            return Err(FrerOrchError::AnotherInstanceUsingSameStreamId);
        }

        if conf.stream_collection_id.is_some()
            && conf.stream_collection_id == other.conf.stream_collection_id
        {
            return Err(FrerOrchError::AnotherInstanceUsingSameCollection);
        }
    }

    Ok(())
}

/// Statistics keys of one instance, in iteration order.
fn statistics_keys(st: &FrerInstance) -> Vec<(Option<PortNo>, Option<StreamId>)> {
    if st.conf.mode == FrerMode::Generation {
        return vec![(None, None)];
    }

    let mut keys = Vec::new();
    for port in st.conf.egress_ports.iter() {
        if st.individual_recovery() {
            keys.extend(st.conf.stream_ids.iter().map(|&id| (Some(port), Some(id))));
        }
        keys.push((Some(port), None));
    }
    keys
}

/// Orders keys within an instance: no port first, then by port; within a
/// port, streams ascending with the compound (`None`) entry last.
fn key_rank(port: Option<PortNo>, stream_id: Option<StreamId>) -> (u64, u64) {
    (
        port.map_or(0, |p| u64::from(p) + 1),
        stream_id.map_or(u64::MAX, u64::from),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCapabilities, SimSwitch};
    use pretty_assertions::assert_eq;

    fn caps() -> FrerCapabilities {
        let sim = SimSwitch::new(SimCapabilities::default());
        capabilities_compute(&FrerOrchConfig::default(), &sim.capabilities(), &sim)
    }

    fn orch(sim: &Arc<SimSwitch>) -> FrerOrch {
        FrerOrch::new(FrerOrchConfig::default(), sim.clone(), sim.clone(), sim.clone())
    }

    fn recovery_conf(stream_ids: Vec<StreamId>, ports: &[PortNo]) -> FrerConf {
        FrerConf {
            mode: FrerMode::Recovery,
            stream_ids,
            egress_ports: ports.iter().copied().collect(),
            admin_active: true,
            ..FrerConf::default()
        }
    }

    // ========================================================================
    // Capabilities and validation
    // ========================================================================

    #[test]
    fn test_capabilities_compute() {
        let sim = SimSwitch::new(SimCapabilities {
            egress_port_cnt_max: 4,
            mstream_cnt: 16,
            cstream_cnt: 8,
            stream_id_max: 8,
            ..SimCapabilities::default()
        });
        let caps = capabilities_compute(&FrerOrchConfig::default(), &sim.capabilities(), &sim);
        assert_eq!(caps.inst_cnt_max, 8);
        assert_eq!(caps.egress_port_cnt_max, 4);
        assert_eq!(caps.rcvy_latent_error_paths_max, 4);

        let sim = SimSwitch::new(SimCapabilities {
            stream_id_max: 0,
            stream_collection_id_max: 0,
            egress_port_cnt_max: 16,
            ..SimCapabilities::default()
        });
        let caps = capabilities_compute(&FrerOrchConfig::default(), &sim.capabilities(), &sim);
        assert_eq!(caps.stream_id_max, 127);
        assert_eq!(caps.stream_collection_id_max, 63);
        assert_eq!(caps.egress_port_cnt_max, FRER_EGRESS_PORT_CNT_ABS_MAX);
    }

    #[test]
    fn test_validate_normalizes() {
        let caps = caps();
        let conf = FrerConf {
            stream_ids: vec![7, 3, 7, 5],
            egress_ports: PortList::from([1, 2, 500]),
            ..FrerConf::default()
        };
        let local = conf_validate(&caps, &conf).unwrap();
        assert_eq!(local.stream_ids, vec![3, 5, 7]);
        assert_eq!(local.egress_ports, PortList::from([1, 2]));
    }

    #[test]
    fn test_validate_structural_errors() {
        let caps = caps();

        let bad = |f: &dyn Fn(&mut FrerConf)| {
            let mut conf = FrerConf::default();
            f(&mut conf);
            conf_validate(&caps, &conf).unwrap_err()
        };

        assert_eq!(bad(&|c| c.stream_ids = vec![0]), FrerOrchError::InvalidStreamIdList);
        assert_eq!(
            bad(&|c| c.stream_ids = (1..=9).collect()),
            FrerOrchError::InvalidStreamIdList
        );
        assert_eq!(
            bad(&|c| {
                c.stream_ids = vec![1];
                c.stream_collection_id = Some(1);
            }),
            FrerOrchError::StreamIdAndCollectionSimultaneously
        );
        assert_eq!(bad(&|c| c.stream_collection_id = Some(0)), FrerOrchError::InvalidStreamCollectionId);
        assert_eq!(bad(&|c| c.frer_vlan = 4095), FrerOrchError::InvalidVlan);
        assert_eq!(
            bad(&|c| c.egress_ports = (0..9).collect()),
            FrerOrchError::EgressPortCntExceeded
        );
        assert_eq!(bad(&|c| c.rcvy_history_len = 1), FrerOrchError::InvalidHistoryLen);
        assert_eq!(bad(&|c| c.rcvy_reset_timeout_ms = 4096), FrerOrchError::InvalidResetTimeout);
        assert_eq!(
            bad(&|c| c.rcvy_latent_error_detection.period_ms = 999),
            FrerOrchError::InvalidLatentErrorPeriod
        );
        assert_eq!(
            bad(&|c| c.rcvy_latent_error_detection.paths = 1),
            FrerOrchError::InvalidLatentErrorPaths
        );
    }

    #[test]
    fn test_validate_activation_errors() {
        let caps = caps();

        let mut conf = FrerConf {
            admin_active: true,
            egress_ports: PortList::from([0, 1]),
            ..FrerConf::default()
        };
        assert_eq!(conf_validate(&caps, &conf).unwrap_err(), FrerOrchError::NoStreamsWhenEnabled);

        conf.stream_ids = vec![5, 6];
        assert_eq!(
            conf_validate(&caps, &conf).unwrap_err(),
            FrerOrchError::GenerationStreamCountMustBeOne
        );

        conf.stream_ids.clear();
        conf.stream_collection_id = Some(2);
        conf.mode = FrerMode::Recovery;
        conf.rcvy_individual = true;
        assert_eq!(
            conf_validate(&caps, &conf).unwrap_err(),
            FrerOrchError::IndividualRecoveryWithCollection
        );

        conf.rcvy_individual = false;
        conf.egress_ports = PortList::new();
        assert_eq!(conf_validate(&caps, &conf).unwrap_err(), FrerOrchError::EgressPortCntZero);

        // The same configuration is fine while disabled.
        conf.admin_active = false;
        assert!(conf_validate(&caps, &conf).is_ok());
    }

    // ========================================================================
    // Statistics iteration order
    // ========================================================================

    #[test]
    fn test_statistics_keys_order() {
        let mut st = FrerInstance::new(1);
        st.conf = recovery_conf(vec![4, 9], &[2, 5]);
        assert_eq!(
            statistics_keys(&st),
            vec![(Some(2), None), (Some(5), None)]
        );

        st.conf.rcvy_individual = true;
        let keys = statistics_keys(&st);
        assert_eq!(
            keys,
            vec![
                (Some(2), Some(4)),
                (Some(2), Some(9)),
                (Some(2), None),
                (Some(5), Some(4)),
                (Some(5), Some(9)),
                (Some(5), None),
            ]
        );

        let ranks: Vec<_> = keys.iter().map(|(p, s)| key_rank(*p, *s)).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
    }

    // ========================================================================
    // Engine
    // ========================================================================

    #[test]
    fn test_conf_set_before_start_does_not_activate() {
        let sim = Arc::new(SimSwitch::new(SimCapabilities::default()));
        sim.stream_add(3, PortList::from([4]));
        let orch = orch(&sim);

        orch.conf_set(1, &recovery_conf(vec![3], &[0, 1])).unwrap();
        assert_eq!(orch.status_get(1).unwrap().oper_state, FrerOperState::AdminDisabled);
        assert_eq!(sim.hw_op_count(), 0);

        orch.start();
        assert_eq!(orch.status_get(1).unwrap().oper_state, FrerOperState::Active);
        assert_eq!(sim.cstreams_in_use().len(), 2);
        assert_eq!(orch.stats().activations, 1);
    }

    #[test]
    fn test_deactivate_runs_every_step() {
        let sim = Arc::new(SimSwitch::new(SimCapabilities::default()));
        sim.stream_add(3, PortList::from([4]));
        let orch = orch(&sim);
        orch.start();
        orch.conf_set(1, &recovery_conf(vec![3], &[0, 1])).unwrap();
        assert_eq!(sim.tces().len(), 1);

        sim.fail("mstream_free");
        sim.fail("tce_del");

        let result = orch
            .lock()
            .with_instance(orch.providers(), Instant::now(), 1, base::deactivate)
            .unwrap();

        // The member stream failure comes first and is the one reported.
        assert!(
            matches!(&result, Err(FrerOrchError::Internal(msg)) if msg.starts_with("mstream_free")),
            "{:?}",
            result
        );

        // Steps after the failures still ran.
        assert!(sim.cstreams_in_use().is_empty());
        assert!(!sim.stream_action(3).unwrap().enable);

        let table = orch.lock();
        let st = &table.instances[&1];
        assert!(st.mode_state.cstream_ids().is_empty());
        assert_eq!(st.tce_id, None);
    }

    #[test]
    fn test_unknown_instance() {
        let sim = Arc::new(SimSwitch::new(SimCapabilities::default()));
        let orch = orch(&sim);

        assert_eq!(orch.conf_get(1), Err(FrerOrchError::NoSuchInstance));
        assert_eq!(orch.conf_del(1), Err(FrerOrchError::NoSuchInstance));
        assert_eq!(orch.conf_get(0), Err(FrerOrchError::InvalidParameter));
        assert_eq!(
            orch.control_set(2, &FrerControl::default()),
            Err(FrerOrchError::NoSuchInstance)
        );
        assert_eq!(orch.itr(None), None);
    }

    #[test]
    fn test_not_supported() {
        let sim = Arc::new(SimSwitch::new(SimCapabilities {
            mstream_cnt: 0,
            ..SimCapabilities::default()
        }));
        let orch = orch(&sim);
        assert_eq!(orch.capabilities().inst_cnt_max, 0);
        assert_eq!(
            orch.conf_set(1, &FrerConf::default()),
            Err(FrerOrchError::NotSupported)
        );
    }

    #[test]
    fn test_notification_dispatch() {
        let sim = Arc::new(SimSwitch::new(SimCapabilities::default()));
        let orch = orch(&sim);

        assert!(orch
            .handle_notification(r#"{"type":"port_link","port":1,"link":true}"#)
            .is_ok());
        assert!(orch.handle_notification(r#"{"type":"vlan_membership","vid":10}"#).is_ok());
        assert!(orch.handle_notification(r#"{"type":"stp_state","port":1}"#).is_ok());
        assert!(orch.handle_notification(r#"{"type":"bogus"}"#).is_err());
    }

    #[tokio::test]
    async fn test_orch_trait() {
        let sim = Arc::new(SimSwitch::new(SimCapabilities::default()));
        let mut orch = orch(&sim);
        orch.start();

        assert_eq!(orch.name(), "FrerOrch");
        assert!(!orch.has_pending_tasks());

        sim.stream_add(8, PortList::from([3]));
        assert!(orch.has_pending_tasks());
        assert_eq!(orch.dump_pending_tasks().len(), 1);

        orch.do_task().await;
        assert!(!orch.has_pending_tasks());
        assert_eq!(orch.stats().stream_events, 1);
        assert!(Orch::next_timer_deadline(&orch).is_none());
    }
}
