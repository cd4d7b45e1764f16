//! In-memory switch.
//!
//! [`SimSwitch`] implements the hardware, stream provider and L2 contracts
//! the FRER engine consumes, keeping all state in one mutex. It backs the
//! standalone daemon and the tests. Every call can be made to fail by name
//! with [`SimSwitch::fail`], and calls into the hardware contract are counted
//! so tests can check that an operation left the chip alone.

use crate::frer::{
    FrerOrchCallbacks, IngressCounters, StreamAction, StreamCollectionConf, StreamCollectionId,
    StreamConf, StreamId, StreamProvider, StreamStatus,
};
use serde::{Deserialize, Serialize};
use sonic_orch_common::{ChangeLog, EventType, Observer};
use sonic_sai::{
    CStreamId, FrerApi, FrerCounters, FrerHwCapabilities, FrerStreamConf, MStreamId, SaiError,
    SaiResult, TceConf, TceId, TceInsertion,
};
use sonic_types::{PortList, PortNo, StpState, VlanId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Table sizes and limits of the simulated switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimCapabilities {
    pub port_cnt: u32,
    pub cstream_cnt: u32,
    pub mstream_cnt: u32,
    pub egress_port_cnt_max: u32,
    pub iflow_pop: bool,
    pub stream_id_max: StreamId,
    pub stream_collection_id_max: StreamCollectionId,
}

impl Default for SimCapabilities {
    fn default() -> Self {
        Self {
            port_cnt: 16,
            cstream_cnt: 64,
            mstream_cnt: 256,
            egress_port_cnt_max: 8,
            iflow_pop: false,
            stream_id_max: 127,
            stream_collection_id_max: 63,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SimStream {
    conf: StreamConf,
    oper_warnings: u32,
    action: StreamAction,
    counters: IngressCounters,
}

#[derive(Debug, Clone, Default)]
struct SimCollection {
    conf: StreamCollectionConf,
    oper_warnings: u32,
    action: StreamAction,
    counters: IngressCounters,
}

#[derive(Debug, Default)]
struct SimState {
    cstreams: BTreeMap<CStreamId, FrerStreamConf>,
    cstream_cnt: BTreeMap<CStreamId, FrerCounters>,
    /// Member stream runs by base id.
    mstream_runs: BTreeMap<MStreamId, PortList>,
    mstreams: BTreeMap<(MStreamId, PortNo), FrerStreamConf>,
    mstream_cnt: BTreeMap<(MStreamId, PortNo), FrerCounters>,
    tces: Vec<TceConf>,

    streams: BTreeMap<StreamId, SimStream>,
    collections: BTreeMap<StreamCollectionId, SimCollection>,

    vlan_members: BTreeMap<VlanId, PortList>,
    stp: BTreeMap<PortNo, StpState>,
    vlan_msti: BTreeMap<VlanId, u8>,
    msti: BTreeMap<(u8, PortNo), StpState>,

    failing: BTreeSet<String>,
    hw_ops: u64,
}

impl SimState {
    fn injected(&self, op: &str) -> bool {
        self.failing.contains(op)
    }

    /// Counts a hardware call and applies failure injection.
    fn hw_call(&mut self, op: &str) -> SaiResult<()> {
        self.hw_ops += 1;
        if self.injected(op) {
            return Err(SaiError::internal(format!("{} failed (injected)", op)));
        }
        Ok(())
    }

    fn provider_call(&self, op: &str) -> Result<(), String> {
        if self.injected(op) {
            return Err(format!("{} failed (injected)", op));
        }
        Ok(())
    }

    fn mstream_run(&self, base: MStreamId, port: PortNo) -> SaiResult<()> {
        match self.mstream_runs.get(&base) {
            Some(ports) if ports.contains(port) => Ok(()),
            Some(_) => Err(SaiError::invalid_parameter(format!("port {} not in {}", port, base))),
            None => Err(SaiError::not_found(base.to_string())),
        }
    }
}

/// Simulated switch. See the module documentation.
pub struct SimSwitch {
    caps: SimCapabilities,
    state: Mutex<SimState>,
    stream_log: ChangeLog<StreamId>,
    collection_log: ChangeLog<StreamCollectionId>,
}

impl SimSwitch {
    pub fn new(caps: SimCapabilities) -> Self {
        Self {
            caps,
            state: Mutex::new(SimState::default()),
            stream_log: ChangeLog::new(),
            collection_log: ChangeLog::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sim_capabilities(&self) -> SimCapabilities {
        self.caps
    }

    // ------------------------------------------------------------------
    // Failure injection and accounting
    // ------------------------------------------------------------------

    /// Makes every later call named `op` fail until [`heal`](Self::heal)ed.
    pub fn fail(&self, op: &str) {
        self.lock().failing.insert(op.to_string());
    }

    pub fn heal(&self, op: &str) {
        self.lock().failing.remove(op);
    }

    /// Number of [`FrerApi`] calls so far, capability queries excluded.
    pub fn hw_op_count(&self) -> u64 {
        self.lock().hw_ops
    }

    /// Compound streams holding a non-default configuration.
    pub fn cstreams_in_use(&self) -> Vec<CStreamId> {
        let state = self.lock();
        state
            .cstreams
            .iter()
            .filter(|(_, conf)| **conf != FrerStreamConf::default())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn cstream_conf(&self, id: CStreamId) -> FrerStreamConf {
        self.lock().cstreams.get(&id).cloned().unwrap_or_default()
    }

    pub fn cstream_counters_set(&self, id: CStreamId, cnt: FrerCounters) {
        self.lock().cstream_cnt.insert(id, cnt);
    }

    /// Base ids of the allocated member stream runs.
    pub fn mstreams_in_use(&self) -> Vec<MStreamId> {
        self.lock().mstream_runs.keys().copied().collect()
    }

    pub fn mstream_conf(&self, base: MStreamId, port: PortNo) -> Option<FrerStreamConf> {
        self.lock().mstreams.get(&(base, port)).cloned()
    }

    pub fn mstream_counters_set(&self, base: MStreamId, port: PortNo, cnt: FrerCounters) {
        self.lock().mstream_cnt.insert((base, port), cnt);
    }

    /// Installed TCEs in lookup order.
    pub fn tces(&self) -> Vec<TceConf> {
        self.lock().tces.clone()
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    /// Creates or changes a stream. Any FRER action stays bound.
    pub fn stream_add(&self, id: StreamId, port_list: PortList) {
        let event = {
            let mut state = self.lock();
            match state.streams.get_mut(&id) {
                Some(stream) => {
                    stream.conf.port_list = port_list;
                    EventType::Modify
                }
                None => {
                    state.streams.insert(
                        id,
                        SimStream {
                            conf: StreamConf { port_list },
                            ..SimStream::default()
                        },
                    );
                    EventType::Add
                }
            }
        };
        self.stream_log.publish(id, event);
    }

    /// Deletes a stream together with its FRER action.
    pub fn stream_del(&self, id: StreamId) {
        if self.lock().streams.remove(&id).is_some() {
            self.stream_log.publish(id, EventType::Delete);
        }
    }

    pub fn stream_warnings_set(&self, id: StreamId, oper_warnings: u32) {
        let changed = match self.lock().streams.get_mut(&id) {
            Some(stream) => {
                stream.oper_warnings = oper_warnings;
                true
            }
            None => false,
        };
        if changed {
            self.stream_log.publish(id, EventType::Modify);
        }
    }

    /// FRER action currently bound to a stream.
    pub fn stream_action(&self, id: StreamId) -> Option<StreamAction> {
        self.lock().streams.get(&id).map(|s| s.action)
    }

    pub fn stream_counters_set(&self, id: StreamId, counters: IngressCounters) {
        if let Some(stream) = self.lock().streams.get_mut(&id) {
            stream.counters = counters;
        }
    }

    pub fn collection_add(&self, id: StreamCollectionId, stream_ids: Vec<StreamId>) {
        let event = {
            let mut state = self.lock();
            match state.collections.get_mut(&id) {
                Some(collection) => {
                    collection.conf.stream_ids = stream_ids;
                    EventType::Modify
                }
                None => {
                    state.collections.insert(
                        id,
                        SimCollection {
                            conf: StreamCollectionConf { stream_ids },
                            ..SimCollection::default()
                        },
                    );
                    EventType::Add
                }
            }
        };
        self.collection_log.publish(id, event);
    }

    pub fn collection_del(&self, id: StreamCollectionId) {
        if self.lock().collections.remove(&id).is_some() {
            self.collection_log.publish(id, EventType::Delete);
        }
    }

    pub fn collection_action(&self, id: StreamCollectionId) -> Option<StreamAction> {
        self.lock().collections.get(&id).map(|c| c.action)
    }

    // ------------------------------------------------------------------
    // L2
    // ------------------------------------------------------------------

    pub fn vlan_members_set(&self, vid: VlanId, members: PortList) {
        self.lock().vlan_members.insert(vid, members);
    }

    pub fn stp_state_set(&self, port: PortNo, state: StpState) {
        self.lock().stp.insert(port, state);
    }

    pub fn vlan_msti_set(&self, vid: VlanId, msti: u8) {
        self.lock().vlan_msti.insert(vid, msti);
    }

    pub fn msti_state_set(&self, msti: u8, port: PortNo, state: StpState) {
        self.lock().msti.insert((msti, port), state);
    }
}

impl FrerApi for SimSwitch {
    fn capabilities(&self) -> FrerHwCapabilities {
        FrerHwCapabilities {
            port_cnt: self.caps.port_cnt,
            cstream_cnt: self.caps.cstream_cnt,
            mstream_cnt: self.caps.mstream_cnt,
            egress_port_cnt_max: self.caps.egress_port_cnt_max,
            iflow_pop: self.caps.iflow_pop,
        }
    }

    fn cstream_conf_get(&self, id: CStreamId) -> SaiResult<FrerStreamConf> {
        let mut state = self.lock();
        state.hw_call("cstream_conf_get")?;
        Ok(state.cstreams.get(&id).cloned().unwrap_or_default())
    }

    fn cstream_conf_set(&self, id: CStreamId, conf: &FrerStreamConf) -> SaiResult<()> {
        let mut state = self.lock();
        state.hw_call("cstream_conf_set")?;
        if id.as_raw() >= self.caps.cstream_cnt {
            return Err(SaiError::invalid_parameter(format!("{} out of range", id)));
        }
        state.cstreams.insert(id, conf.clone());
        Ok(())
    }

    fn cstream_cnt_get(&self, id: CStreamId) -> SaiResult<FrerCounters> {
        let mut state = self.lock();
        state.hw_call("cstream_cnt_get")?;
        Ok(state.cstream_cnt.get(&id).copied().unwrap_or_default())
    }

    fn cstream_cnt_clear(&self, id: CStreamId) -> SaiResult<()> {
        let mut state = self.lock();
        state.hw_call("cstream_cnt_clear")?;
        state.cstream_cnt.remove(&id);
        Ok(())
    }

    /// First fit over the member stream table.
    fn mstream_alloc(&self, egress_ports: &PortList) -> SaiResult<MStreamId> {
        let mut state = self.lock();
        state.hw_call("mstream_alloc")?;

        let need = egress_ports.len() as u32;
        if need == 0 {
            return Err(SaiError::invalid_parameter("empty egress port list"));
        }

        let mut start = 0u32;
        for (base, ports) in &state.mstream_runs {
            if base.as_raw() - start >= need {
                break;
            }
            start = base.as_raw() + ports.len() as u32;
        }

        if start + need > self.caps.mstream_cnt {
            return Err(SaiError::table_full("mstream"));
        }

        let base = MStreamId::from_raw(start);
        state.mstream_runs.insert(base, egress_ports.clone());
        Ok(base)
    }

    fn mstream_free(&self, base: MStreamId) -> SaiResult<()> {
        let mut state = self.lock();
        state.hw_call("mstream_free")?;
        if state.mstream_runs.remove(&base).is_none() {
            return Err(SaiError::not_found(base.to_string()));
        }
        state.mstreams.retain(|(b, _), _| *b != base);
        state.mstream_cnt.retain(|(b, _), _| *b != base);
        Ok(())
    }

    fn mstream_conf_get(&self, base: MStreamId, port: PortNo) -> SaiResult<FrerStreamConf> {
        let mut state = self.lock();
        state.hw_call("mstream_conf_get")?;
        state.mstream_run(base, port)?;
        Ok(state.mstreams.get(&(base, port)).cloned().unwrap_or_default())
    }

    fn mstream_conf_set(&self, base: MStreamId, port: PortNo, conf: &FrerStreamConf) -> SaiResult<()> {
        let mut state = self.lock();
        state.hw_call("mstream_conf_set")?;
        state.mstream_run(base, port)?;
        state.mstreams.insert((base, port), conf.clone());
        Ok(())
    }

    fn mstream_cnt_get(&self, base: MStreamId, port: PortNo) -> SaiResult<FrerCounters> {
        let mut state = self.lock();
        state.hw_call("mstream_cnt_get")?;
        state.mstream_run(base, port)?;
        Ok(state.mstream_cnt.get(&(base, port)).copied().unwrap_or_default())
    }

    fn mstream_cnt_clear(&self, base: MStreamId, port: PortNo) -> SaiResult<()> {
        let mut state = self.lock();
        state.hw_call("mstream_cnt_clear")?;
        state.mstream_run(base, port)?;
        state.mstream_cnt.remove(&(base, port));
        Ok(())
    }

    fn tce_add(&self, insertion: TceInsertion, conf: &TceConf) -> SaiResult<()> {
        let mut state = self.lock();
        state.hw_call("tce_add")?;

        if state.tces.iter().any(|t| t.id == conf.id) {
            return Err(SaiError::invalid_parameter(format!("{} already exists", conf.id)));
        }

        let pos = match insertion {
            TceInsertion::Last => state.tces.len(),
            TceInsertion::Before(next) => state
                .tces
                .iter()
                .position(|t| t.id == next)
                .ok_or_else(|| SaiError::not_found(next.to_string()))?,
        };
        state.tces.insert(pos, conf.clone());
        Ok(())
    }

    fn tce_del(&self, id: TceId) -> SaiResult<()> {
        let mut state = self.lock();
        state.hw_call("tce_del")?;
        let pos = state
            .tces
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| SaiError::not_found(id.to_string()))?;
        state.tces.remove(pos);
        Ok(())
    }
}

fn client(action: &StreamAction) -> Option<u32> {
    action.enable.then_some(action.client_id)
}

impl StreamProvider for SimSwitch {
    fn stream_id_max(&self) -> StreamId {
        self.caps.stream_id_max
    }

    fn stream_collection_id_max(&self) -> StreamCollectionId {
        self.caps.stream_collection_id_max
    }

    fn stream_conf_get(&self, id: StreamId) -> Result<StreamConf, String> {
        let state = self.lock();
        state.provider_call("stream_conf_get")?;
        state
            .streams
            .get(&id)
            .map(|s| s.conf.clone())
            .ok_or_else(|| format!("no stream {}", id))
    }

    fn stream_status_get(&self, id: StreamId) -> Result<StreamStatus, String> {
        let state = self.lock();
        state.provider_call("stream_status_get")?;
        state
            .streams
            .get(&id)
            .map(|s| StreamStatus {
                oper_warnings: s.oper_warnings,
                frer_client: client(&s.action),
            })
            .ok_or_else(|| format!("no stream {}", id))
    }

    fn stream_action_set(&self, id: StreamId, action: &StreamAction) -> Result<(), String> {
        let mut state = self.lock();
        state.provider_call("stream_action_set")?;
        let stream = state.streams.get_mut(&id).ok_or_else(|| format!("no stream {}", id))?;
        stream.action = *action;
        Ok(())
    }

    fn stream_counters_get(&self, id: StreamId) -> Result<IngressCounters, String> {
        let state = self.lock();
        state.provider_call("stream_counters_get")?;
        state
            .streams
            .get(&id)
            .map(|s| s.counters)
            .ok_or_else(|| format!("no stream {}", id))
    }

    fn stream_counters_clear(&self, id: StreamId) -> Result<(), String> {
        let mut state = self.lock();
        state.provider_call("stream_counters_clear")?;
        let stream = state.streams.get_mut(&id).ok_or_else(|| format!("no stream {}", id))?;
        stream.counters = IngressCounters::default();
        Ok(())
    }

    fn collection_conf_get(&self, id: StreamCollectionId) -> Result<StreamCollectionConf, String> {
        let state = self.lock();
        state.provider_call("collection_conf_get")?;
        state
            .collections
            .get(&id)
            .map(|c| c.conf.clone())
            .ok_or_else(|| format!("no stream collection {}", id))
    }

    fn collection_status_get(&self, id: StreamCollectionId) -> Result<StreamStatus, String> {
        let state = self.lock();
        state.provider_call("collection_status_get")?;
        state
            .collections
            .get(&id)
            .map(|c| StreamStatus {
                oper_warnings: c.oper_warnings,
                frer_client: client(&c.action),
            })
            .ok_or_else(|| format!("no stream collection {}", id))
    }

    fn collection_action_set(&self, id: StreamCollectionId, action: &StreamAction) -> Result<(), String> {
        let mut state = self.lock();
        state.provider_call("collection_action_set")?;
        let collection = state
            .collections
            .get_mut(&id)
            .ok_or_else(|| format!("no stream collection {}", id))?;
        collection.action = *action;
        Ok(())
    }

    fn collection_counters_get(&self, id: StreamCollectionId) -> Result<IngressCounters, String> {
        let state = self.lock();
        state.provider_call("collection_counters_get")?;
        state
            .collections
            .get(&id)
            .map(|c| c.counters)
            .ok_or_else(|| format!("no stream collection {}", id))
    }

    fn collection_counters_clear(&self, id: StreamCollectionId) -> Result<(), String> {
        let mut state = self.lock();
        state.provider_call("collection_counters_clear")?;
        let collection = state
            .collections
            .get_mut(&id)
            .ok_or_else(|| format!("no stream collection {}", id))?;
        collection.counters = IngressCounters::default();
        Ok(())
    }

    fn stream_changes(&self) -> Observer<StreamId> {
        self.stream_log.subscribe()
    }

    fn collection_changes(&self) -> Observer<StreamCollectionId> {
        self.collection_log.subscribe()
    }
}

/// Unset VLAN membership is empty; unset STP state is forwarding.
impl FrerOrchCallbacks for SimSwitch {
    fn vlan_members_get(&self, vid: VlanId) -> Result<PortList, String> {
        let state = self.lock();
        state.provider_call("vlan_members_get")?;
        Ok(state.vlan_members.get(&vid).cloned().unwrap_or_default())
    }

    fn stp_port_state_get(&self, port: PortNo) -> Result<StpState, String> {
        let state = self.lock();
        state.provider_call("stp_port_state_get")?;
        Ok(state.stp.get(&port).copied().unwrap_or(StpState::Forwarding))
    }

    fn vlan_msti_get(&self, vid: VlanId) -> Result<u8, String> {
        let state = self.lock();
        state.provider_call("vlan_msti_get")?;
        Ok(state.vlan_msti.get(&vid).copied().unwrap_or(0))
    }

    fn msti_port_state_get(&self, msti: u8, port: PortNo) -> Result<StpState, String> {
        let state = self.lock();
        state.provider_call("msti_port_state_get")?;
        Ok(state.msti.get(&(msti, port)).copied().unwrap_or(StpState::Forwarding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sonic_sai::TceAction;

    fn sim() -> SimSwitch {
        SimSwitch::new(SimCapabilities {
            mstream_cnt: 8,
            ..SimCapabilities::default()
        })
    }

    #[test]
    fn test_mstream_first_fit() {
        let sim = sim();
        let a = sim.mstream_alloc(&PortList::from([0, 1, 2])).unwrap();
        let b = sim.mstream_alloc(&PortList::from([0, 1])).unwrap();
        assert_eq!(a.as_raw(), 0);
        assert_eq!(b.as_raw(), 3);

        sim.mstream_free(a).unwrap();
        let c = sim.mstream_alloc(&PortList::from([4, 5])).unwrap();
        assert_eq!(c.as_raw(), 0);

        // 0-1 and 3-4 are taken, only 5-7 is left for a run of three.
        let d = sim.mstream_alloc(&PortList::from([1, 2, 3])).unwrap();
        assert_eq!(d.as_raw(), 5);

        let err = sim.mstream_alloc(&PortList::from([1, 2])).unwrap_err();
        assert!(matches!(err, SaiError::TableFull { .. }));
    }

    #[test]
    fn test_mstream_addressed_by_port() {
        let sim = sim();
        let base = sim.mstream_alloc(&PortList::from([2, 6])).unwrap();
        let conf = FrerStreamConf {
            recovery: true,
            ..FrerStreamConf::default()
        };

        sim.mstream_conf_set(base, 6, &conf).unwrap();
        assert_eq!(sim.mstream_conf(base, 6), Some(conf));
        assert!(sim.mstream_conf_set(base, 3, &FrerStreamConf::default()).is_err());
    }

    #[test]
    fn test_tce_insertion() {
        let sim = sim();
        let tce = |raw| TceConf {
            id: TceId::from_raw(raw),
            egress_ports: PortList::from([1]),
            vid: VlanId::DEFAULT,
            action: TceAction::PushRtag,
        };

        sim.tce_add(TceInsertion::Last, &tce(1)).unwrap();
        sim.tce_add(TceInsertion::Last, &tce(3)).unwrap();
        sim.tce_add(TceInsertion::Before(TceId::from_raw(3)), &tce(2)).unwrap();
        assert!(sim.tce_add(TceInsertion::Last, &tce(2)).is_err());

        let ids: Vec<u32> = sim.tces().iter().map(|t| t.id.as_raw()).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        sim.tce_del(TceId::from_raw(2)).unwrap();
        assert!(sim.tce_del(TceId::from_raw(2)).is_err());
    }

    #[test]
    fn test_failure_injection_and_op_count() {
        let sim = sim();
        let id = CStreamId::from_raw(1);

        sim.fail("cstream_conf_set");
        assert!(sim.cstream_conf_set(id, &FrerStreamConf::default()).is_err());
        sim.heal("cstream_conf_set");
        assert!(sim.cstream_conf_set(id, &FrerStreamConf::default()).is_ok());

        let _ = sim.capabilities();
        assert_eq!(sim.hw_op_count(), 2);
    }

    #[test]
    fn test_stream_changes_and_client() {
        let sim = sim();
        let observer = sim.stream_changes();

        sim.stream_add(4, PortList::from([1]));
        sim.stream_add(4, PortList::from([1, 2]));
        let action = StreamAction {
            enable: true,
            client_id: 9,
            ..StreamAction::default()
        };
        sim.stream_action_set(4, &action).unwrap();

        assert_eq!(sim.stream_status_get(4).unwrap().frer_client, Some(9));
        assert_eq!(observer.drain().get(&4), Some(&EventType::Add));

        sim.stream_del(4);
        assert_eq!(observer.drain().get(&4), Some(&EventType::Delete));
        assert!(sim.stream_conf_get(4).is_err());
    }
}
