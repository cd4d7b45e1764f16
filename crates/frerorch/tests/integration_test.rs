//! Integration tests for FrerOrch against the simulated switch
//!
//! These tests drive the public engine API end to end and check what ends up
//! in the (simulated) hardware and stream provider.

use pretty_assertions::assert_eq;
use sonic_frerorch::frer::{
    FrerConf, FrerControl, FrerMode, FrerOperState, FrerOrch, FrerOrchConfig, FrerOrchError,
    IngressCounters, LatentErrorDetectionConf, OperWarnings, StreamId,
};
use sonic_frerorch::sim::{SimCapabilities, SimSwitch};
use sonic_sai::{FrerCounters, TceAction};
use sonic_types::{PortList, PortNo, StpState, VlanId};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn setup(caps: SimCapabilities) -> (Arc<SimSwitch>, FrerOrch) {
    let sim = Arc::new(SimSwitch::new(caps));
    let orch = FrerOrch::new(
        FrerOrchConfig {
            audit: false,
            ..FrerOrchConfig::default()
        },
        sim.clone(),
        sim.clone(),
        sim.clone(),
    );
    orch.start();
    (sim, orch)
}

fn recovery(stream_ids: &[StreamId], ports: &[PortNo]) -> FrerConf {
    FrerConf {
        mode: FrerMode::Recovery,
        stream_ids: stream_ids.to_vec(),
        egress_ports: ports.iter().copied().collect(),
        admin_active: true,
        ..FrerConf::default()
    }
}

fn generation(stream_id: StreamId, ports: &[PortNo]) -> FrerConf {
    FrerConf {
        mode: FrerMode::Generation,
        stream_ids: vec![stream_id],
        egress_ports: ports.iter().copied().collect(),
        admin_active: true,
        ..FrerConf::default()
    }
}

fn oper_state(orch: &FrerOrch, inst: u32) -> FrerOperState {
    orch.status_get(inst).unwrap().oper_state
}

fn assert_no_resources(sim: &SimSwitch) {
    assert!(sim.cstreams_in_use().is_empty());
    assert!(sim.mstreams_in_use().is_empty());
    assert!(sim.tces().is_empty());
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // Instance lifecycle
    mod lifecycle_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_recovery_activation_programs_hardware() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));

            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();
            assert_eq!(oper_state(&orch, 1), FrerOperState::Active);

            let cstreams = sim.cstreams_in_use();
            assert_eq!(cstreams.len(), 2);
            assert!(sim.cstream_conf(cstreams[0]).recovery);

            let mstreams = sim.mstreams_in_use();
            assert_eq!(mstreams.len(), 1);
            for (idx, port) in [0, 1].into_iter().enumerate() {
                let conf = sim.mstream_conf(mstreams[0], port).unwrap();
                assert!(!conf.recovery);
                assert_eq!(conf.cstream_id, Some(cstreams[idx]));
            }

            let tces = sim.tces();
            assert_eq!(tces.len(), 1);
            assert_eq!(tces[0].id.as_raw(), 0xFFFE_0000);
            assert_eq!(tces[0].action, TceAction::PushRtag);
            assert_eq!(tces[0].egress_ports, PortList::from([0, 1]));

            let action = sim.stream_action(3).unwrap();
            assert!(action.enable);
            assert_eq!(action.client_id, 1);
            assert!(!action.generation);
            assert!(action.cut_through_disable);
            assert_eq!(action.mstream_id, Some(mstreams[0]));
        }

        #[test]
        fn test_generation_activation() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(5, PortList::from([7]));

            let conf = FrerConf {
                outer_tag_pop: true,
                ..generation(5, &[0, 1])
            };
            orch.conf_set(2, &conf).unwrap();
            assert_eq!(oper_state(&orch, 2), FrerOperState::Active);

            // Generation needs neither compound nor member streams.
            assert!(sim.cstreams_in_use().is_empty());
            assert!(sim.mstreams_in_use().is_empty());
            assert_eq!(sim.tces().len(), 1);

            let action = sim.stream_action(5).unwrap();
            assert!(action.enable);
            assert!(action.generation);
            assert_eq!(action.pop_outer_tag_cnt, 1);
            assert_eq!(action.mstream_id, None);
            assert!(!action.reapply);
        }

        #[test]
        fn test_terminate_without_iflow_pop_uses_tce() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));

            let conf = FrerConf {
                rcvy_terminate: true,
                ..recovery(&[3], &[0, 1])
            };
            orch.conf_set(1, &conf).unwrap();

            assert_eq!(sim.tces()[0].action, TceAction::PopRtag);
            assert!(!sim.stream_action(3).unwrap().pop);
        }

        #[test]
        fn test_terminate_with_iflow_pop_uses_classifier() {
            let (sim, orch) = setup(SimCapabilities {
                iflow_pop: true,
                ..SimCapabilities::default()
            });
            sim.stream_add(3, PortList::from([5]));

            let conf = FrerConf {
                rcvy_terminate: true,
                ..recovery(&[3], &[0, 1])
            };
            orch.conf_set(1, &conf).unwrap();

            assert!(sim.tces().is_empty());
            assert!(sim.stream_action(3).unwrap().pop);
        }

        #[test]
        fn test_conf_set_is_idempotent() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));

            // Unsorted with a duplicate: normalizes to the same configuration.
            orch.conf_set(1, &recovery(&[4, 3, 4], &[0, 1])).unwrap();
            let ops = sim.hw_op_count();
            let stats = orch.stats();

            orch.conf_set(1, &recovery(&[3, 4], &[0, 1])).unwrap();
            assert_eq!(sim.hw_op_count(), ops);
            assert_eq!(orch.stats(), stats);
            assert_eq!(orch.conf_get(1).unwrap().stream_ids, vec![3, 4]);
        }

        #[test]
        fn test_conf_change_reactivates() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));

            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();
            orch.conf_set(1, &recovery(&[3], &[0, 1, 2])).unwrap();

            assert_eq!(oper_state(&orch, 1), FrerOperState::Active);
            assert_eq!(sim.cstreams_in_use().len(), 3);
            assert_eq!(sim.mstreams_in_use().len(), 1);
            assert_eq!(sim.tces().len(), 1);
            assert_eq!(orch.stats().activations, 2);
        }

        #[test]
        fn test_led_only_change_keeps_resources() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));

            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();
            let cstreams = sim.cstreams_in_use();
            let mstreams = sim.mstreams_in_use();

            let conf = FrerConf {
                rcvy_latent_error_detection: LatentErrorDetectionConf {
                    enable: true,
                    ..LatentErrorDetectionConf::default()
                },
                ..recovery(&[3], &[0, 1])
            };
            orch.conf_set(1, &conf).unwrap();

            assert_eq!(sim.cstreams_in_use(), cstreams);
            assert_eq!(sim.mstreams_in_use(), mstreams);
            assert_eq!(orch.stats().activations, 1);
            assert!(orch.next_timer_deadline().is_some());
        }

        #[test]
        fn test_disable_and_delete_release_everything() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));

            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();

            let mut disabled = recovery(&[3], &[0, 1]);
            disabled.admin_active = false;
            orch.conf_set(1, &disabled).unwrap();
            assert_eq!(oper_state(&orch, 1), FrerOperState::AdminDisabled);
            assert_no_resources(&sim);
            assert!(!sim.stream_action(3).unwrap().enable);
            assert_eq!(
                orch.notification_status_get(1),
                Err(FrerOrchError::NoSuchInstance)
            );

            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();
            orch.conf_del(1).unwrap();
            assert_no_resources(&sim);
            assert_eq!(orch.conf_get(1), Err(FrerOrchError::NoSuchInstance));
            assert_eq!(orch.itr(None), None);
        }

        #[test]
        fn test_itr_and_restore_defaults() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));
            sim.stream_add(4, PortList::from([6]));

            orch.conf_set(7, &recovery(&[3], &[0, 1])).unwrap();
            orch.conf_set(2, &FrerConf::default()).unwrap();
            orch.conf_set(4, &generation(4, &[2, 3])).unwrap();

            assert_eq!(orch.itr(None), Some(2));
            assert_eq!(orch.itr(Some(2)), Some(4));
            assert_eq!(orch.itr(Some(4)), Some(7));
            assert_eq!(orch.itr(Some(7)), None);

            orch.restore_defaults();
            assert_eq!(orch.itr(None), None);
            assert_no_resources(&sim);
            assert!(!sim.stream_action(3).unwrap().enable);
            assert!(!sim.stream_action(4).unwrap().enable);
        }
    }

    // Validation across instances and capacity
    mod validation_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_generation_needs_exactly_one_stream() {
            let (sim, orch) = setup(SimCapabilities::default());

            let mut conf = generation(5, &[0, 1]);
            conf.stream_ids = vec![5, 6];
            assert_eq!(
                orch.conf_set(1, &conf),
                Err(FrerOrchError::GenerationStreamCountMustBeOne)
            );
            assert_eq!(orch.conf_get(1), Err(FrerOrchError::NoSuchInstance));
            assert_eq!(sim.hw_op_count(), 0);
        }

        #[test]
        fn test_same_stream_in_two_enabled_instances() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));

            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();
            let ops = sim.hw_op_count();

            assert_eq!(
                orch.conf_set(2, &recovery(&[2, 3], &[2, 3])),
                Err(FrerOrchError::AnotherInstanceUsingSameStreamId)
            );
            assert_eq!(sim.hw_op_count(), ops);
            assert_eq!(orch.conf_get(2), Err(FrerOrchError::NoSuchInstance));
            assert_eq!(oper_state(&orch, 1), FrerOperState::Active);
            assert_eq!(sim.stream_action(3).unwrap().client_id, 1);

            // Sharing is fine as long as only one of them is enabled.
            let mut disabled = recovery(&[3], &[2, 3]);
            disabled.admin_active = false;
            orch.conf_set(2, &disabled).unwrap();
        }

        #[test]
        fn test_same_collection_in_two_enabled_instances() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.collection_add(2, vec![10]);

            let conf = FrerConf {
                stream_ids: Vec::new(),
                stream_collection_id: Some(2),
                ..recovery(&[], &[0, 1])
            };
            orch.conf_set(1, &conf).unwrap();
            assert_eq!(
                orch.conf_set(2, &conf),
                Err(FrerOrchError::AnotherInstanceUsingSameCollection)
            );
        }

        #[test]
        fn test_instance_range_is_capacity() {
            let (sim, orch) = setup(SimCapabilities {
                cstream_cnt: 8,
                mstream_cnt: 6,
                ..SimCapabilities::default()
            });
            let max = orch.capabilities().inst_cnt_max;
            assert_eq!(max, 3);

            for (inst, stream_id) in (1..=max).zip(1..) {
                sim.stream_add(stream_id, PortList::from([9]));
                orch.conf_set(inst, &recovery(&[stream_id], &[0, 1])).unwrap();
                assert_eq!(oper_state(&orch, inst), FrerOperState::Active);
            }

            assert_eq!(
                orch.conf_set(max + 1, &FrerConf::default()),
                Err(FrerOrchError::InvalidParameter)
            );
            assert_eq!(orch.conf_get(0), Err(FrerOrchError::InvalidParameter));
        }
    }

    // Hardware id allocation
    mod allocation_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_concrete_capability_scenario() {
            let (sim, orch) = setup(SimCapabilities {
                egress_port_cnt_max: 4,
                mstream_cnt: 16,
                cstream_cnt: 8,
                stream_id_max: 8,
                ..SimCapabilities::default()
            });
            assert_eq!(orch.capabilities().inst_cnt_max, 8);
            sim.stream_add(3, PortList::from([5]));

            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();
            assert_eq!(sim.cstreams_in_use().len(), 2);
            assert_eq!(sim.mstreams_in_use().len(), 1);

            orch.conf_del(1).unwrap();
            assert_no_resources(&sim);

            orch.conf_set(2, &recovery(&[3], &[0, 1])).unwrap();
            assert_eq!(oper_state(&orch, 2), FrerOperState::Active);
            assert_eq!(sim.cstreams_in_use().len(), 2);
            assert_eq!(sim.mstreams_in_use().len(), 1);
        }

        #[test]
        fn test_freed_ids_are_reused() {
            // Exactly one instance's worth of compound and member streams.
            let (sim, orch) = setup(SimCapabilities {
                cstream_cnt: 2,
                mstream_cnt: 2,
                ..SimCapabilities::default()
            });
            assert_eq!(orch.capabilities().inst_cnt_max, 1);
            sim.stream_add(3, PortList::from([5]));
            sim.stream_add(4, PortList::from([6]));

            for _ in 0..3 {
                orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();
                orch.conf_del(1).unwrap();
            }

            orch.conf_set(1, &recovery(&[4], &[2, 3])).unwrap();
            assert_eq!(oper_state(&orch, 1), FrerOperState::Active);
            assert_eq!(sim.cstreams_in_use().len(), 2);
        }

        #[test]
        fn test_ids_disjoint_between_instances() {
            let (sim, orch) = setup(SimCapabilities::default());
            for id in 1..=4 {
                sim.stream_add(id, PortList::from([10]));
            }

            orch.conf_set(1, &recovery(&[1], &[0, 1])).unwrap();
            orch.conf_set(2, &recovery(&[2], &[0, 1, 2])).unwrap();
            orch.conf_set(3, &recovery(&[3], &[1, 2])).unwrap();

            // Free the middle instance and let a new one take its place.
            orch.conf_del(2).unwrap();
            orch.conf_set(4, &recovery(&[4], &[3, 4])).unwrap();

            assert_eq!(sim.cstreams_in_use().len(), 6);

            let bases: BTreeSet<_> = [1, 3, 4]
                .into_iter()
                .map(|id| sim.stream_action(id).unwrap().mstream_id.unwrap())
                .collect();
            assert_eq!(bases.len(), 3);
            assert_eq!(sim.mstreams_in_use().len(), 3);

            let tces: BTreeSet<u32> = sim.tces().iter().map(|t| t.id.as_raw()).collect();
            assert_eq!(tces.len(), 3);
        }

        #[test]
        fn test_individual_recovery_member_streams() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));
            sim.stream_add(4, PortList::from([6]));

            let conf = FrerConf {
                rcvy_individual: true,
                ..recovery(&[3, 4], &[0, 1])
            };
            orch.conf_set(1, &conf).unwrap();

            let base3 = sim.stream_action(3).unwrap().mstream_id.unwrap();
            let base4 = sim.stream_action(4).unwrap().mstream_id.unwrap();
            assert!(base3 != base4);
            assert_eq!(sim.mstreams_in_use().len(), 2);
            assert!(sim.mstream_conf(base4, 1).unwrap().recovery);
        }
    }

    // Activation failures and rollback
    mod failure_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_hw_failure_rolls_back() {
            for op in ["cstream_conf_set", "mstream_conf_set", "mstream_cnt_clear"] {
                let (sim, orch) = setup(SimCapabilities::default());
                sim.stream_add(3, PortList::from([5]));
                sim.fail(op);

                let result = orch.conf_set(1, &recovery(&[3], &[0, 1]));
                assert!(matches!(result, Err(FrerOrchError::Internal(_))), "{}: {:?}", op, result);
                assert_eq!(oper_state(&orch, 1), FrerOperState::InternalError);
                assert_eq!(orch.status_get(1).unwrap().oper_warnings, OperWarnings::NONE);
                assert!(sim.mstreams_in_use().is_empty());
                assert!(sim.tces().is_empty());
                assert!(!sim.stream_action(3).unwrap().enable);
                assert_eq!(orch.stats().activation_failures, 1);
            }
        }

        #[test]
        fn test_cstreams_released_after_failure() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));
            sim.fail("mstream_conf_set");

            assert!(orch.conf_set(1, &recovery(&[3], &[0, 1])).is_err());
            assert!(sim.cstreams_in_use().is_empty());

            sim.heal("mstream_conf_set");
            orch.conf_set(1, &recovery(&[3], &[0, 1, 2])).unwrap();
            assert_eq!(oper_state(&orch, 1), FrerOperState::Active);
            assert_eq!(sim.cstreams_in_use().len(), 3);
        }

        #[test]
        fn test_tce_failure_is_resource_error() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));
            sim.fail("tce_add");

            assert_eq!(
                orch.conf_set(1, &recovery(&[3], &[0, 1])),
                Err(FrerOrchError::HwResources)
            );
            assert_eq!(oper_state(&orch, 1), FrerOperState::InternalError);
            assert_no_resources(&sim);
        }

        #[test]
        fn test_mstream_exhaustion() {
            let (sim, orch) = setup(SimCapabilities {
                mstream_cnt: 4,
                ..SimCapabilities::default()
            });
            sim.stream_add(3, PortList::from([8]));
            sim.stream_add(4, PortList::from([9]));

            orch.conf_set(1, &recovery(&[3], &[0, 1, 2, 3])).unwrap();
            assert_eq!(
                orch.conf_set(2, &recovery(&[4], &[4, 5])),
                Err(FrerOrchError::HwResources)
            );
            assert_eq!(oper_state(&orch, 2), FrerOperState::InternalError);

            // Only instance 1's resources remain.
            assert_eq!(sim.cstreams_in_use().len(), 4);
            assert_eq!(sim.mstreams_in_use().len(), 1);
            assert_eq!(sim.tces().len(), 1);

            // An identical configuration is not retried, a changed one is.
            orch.conf_del(1).unwrap();
            orch.conf_set(2, &recovery(&[4], &[4, 5])).unwrap();
            assert_eq!(oper_state(&orch, 2), FrerOperState::InternalError);
            orch.conf_set(2, &recovery(&[4], &[4, 5, 6])).unwrap();
            assert_eq!(oper_state(&orch, 2), FrerOperState::Active);
        }

        #[test]
        fn test_attach_failure_is_a_warning() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));
            sim.fail("stream_action_set");

            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();
            let status = orch.status_get(1).unwrap();
            assert_eq!(status.oper_state, FrerOperState::Active);
            assert!(status.oper_warnings.contains(OperWarnings::STREAM_ATTACH_FAIL));
        }

        #[test]
        fn test_delete_survives_tce_del_failure() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));
            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();
            sim.fail("tce_del");

            // Deletion never fails; the teardown error is only logged.
            orch.conf_del(1).unwrap();
            assert_eq!(orch.conf_get(1), Err(FrerOrchError::NoSuchInstance));

            assert!(sim.cstreams_in_use().is_empty());
            assert!(sim.mstreams_in_use().is_empty());
            assert!(!sim.stream_action(3).unwrap().enable);
            // Left behind by the chip.
            assert_eq!(sim.tces().len(), 1);
        }

        #[test]
        fn test_delete_survives_mstream_free_failure() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));
            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();
            sim.fail("mstream_free");

            orch.conf_del(1).unwrap();
            assert_eq!(orch.conf_get(1), Err(FrerOrchError::NoSuchInstance));

            // Compound streams and the TCE come after member streams and are
            // still released.
            assert!(sim.cstreams_in_use().is_empty());
            assert!(sim.tces().is_empty());
            assert!(!sim.stream_action(3).unwrap().enable);
            assert_eq!(sim.mstreams_in_use().len(), 1);

            // The engine no longer tracks the run, so a new instance still
            // gets member streams of its own.
            sim.heal("mstream_free");
            orch.conf_set(2, &recovery(&[3], &[0, 1])).unwrap();
            assert_eq!(oper_state(&orch, 2), FrerOperState::Active);
            assert_eq!(sim.mstreams_in_use().len(), 2);
        }

        #[test]
        fn test_delete_survives_detach_failure() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));
            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();
            assert!(sim.stream_action(3).unwrap().enable);
            sim.fail("stream_action_set");

            orch.conf_del(1).unwrap();
            assert_eq!(orch.conf_get(1), Err(FrerOrchError::NoSuchInstance));
            assert_no_resources(&sim);
        }
    }

    // Stream provider notifications
    mod stream_notification_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_missing_stream_attached_when_created() {
            let (sim, orch) = setup(SimCapabilities::default());

            orch.conf_set(1, &recovery(&[7], &[0, 1])).unwrap();
            let status = orch.status_get(1).unwrap();
            assert_eq!(status.oper_state, FrerOperState::Active);
            assert!(status.oper_warnings.contains(OperWarnings::STREAM_NOT_FOUND));

            sim.stream_add(7, PortList::from([1]));
            assert!(orch.has_pending_stream_changes());
            assert_eq!(orch.process_stream_changes(), 1);

            let warnings = orch.status_get(1).unwrap().oper_warnings;
            assert!(!warnings.contains(OperWarnings::STREAM_NOT_FOUND));
            assert!(warnings.contains(OperWarnings::INGRESS_EGRESS_OVERLAP));

            let action = sim.stream_action(7).unwrap();
            assert!(action.enable);
            assert_eq!(action.mstream_id, Some(sim.mstreams_in_use()[0]));

            sim.stream_del(7);
            orch.process_stream_changes();
            let warnings = orch.status_get(1).unwrap().oper_warnings;
            assert!(warnings.contains(OperWarnings::STREAM_NOT_FOUND));
            assert!(!warnings.contains(OperWarnings::INGRESS_EGRESS_OVERLAP));
        }

        #[test]
        fn test_stream_warnings_reported() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));
            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();

            sim.stream_warnings_set(3, 0x4);
            orch.process_stream_changes();
            assert!(orch
                .status_get(1)
                .unwrap()
                .oper_warnings
                .contains(OperWarnings::STREAM_HAS_OPERATIONAL_WARNINGS));

            // The re-attach found the action already bound to this instance.
            assert_eq!(sim.stream_action(3).unwrap().client_id, 1);
        }

        #[test]
        fn test_changes_before_start_are_dropped() {
            let sim = Arc::new(SimSwitch::new(SimCapabilities::default()));
            let orch = FrerOrch::new(FrerOrchConfig::default(), sim.clone(), sim.clone(), sim.clone());

            orch.conf_set(1, &recovery(&[7], &[0, 1])).unwrap();
            sim.stream_add(7, PortList::from([5]));
            assert_eq!(orch.process_stream_changes(), 1);
            assert_eq!(orch.stats().stream_events, 0);
            assert!(!sim.stream_action(7).unwrap().enable);

            orch.start();
            assert!(orch.is_started());
            assert!(sim.stream_action(7).unwrap().enable);
        }

        #[test]
        fn test_collection_attach_and_removal() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(10, PortList::from([5]));
            sim.stream_add(11, PortList::from([6]));
            sim.collection_add(2, vec![10, 11]);

            let conf = FrerConf {
                mode: FrerMode::Generation,
                stream_collection_id: Some(2),
                egress_ports: PortList::from([0, 1]),
                admin_active: true,
                ..FrerConf::default()
            };
            orch.conf_set(1, &conf).unwrap();

            let action = sim.collection_action(2).unwrap();
            assert!(action.enable);
            assert!(action.generation);
            assert!(!sim.stream_action(10).unwrap().enable);

            sim.stream_warnings_set(10, 0x1);
            orch.process_stream_changes();
            assert!(!orch
                .status_get(1)
                .unwrap()
                .oper_warnings
                .contains(OperWarnings::STREAM_HAS_OPERATIONAL_WARNINGS));

            sim.collection_del(2);
            orch.process_stream_changes();
            let warnings = orch.status_get(1).unwrap().oper_warnings;
            assert!(warnings.contains(OperWarnings::STREAM_COLLECTION_NOT_FOUND));
            assert!(!warnings.contains(OperWarnings::STREAM_NOT_FOUND));
        }
    }

    // Operational warnings from link and L2 state
    mod diagnostics_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_link_vlan_and_stp_warnings() {
            let (sim, orch) = setup(SimCapabilities::default());
            let vid = VlanId::new(10).unwrap();
            sim.stream_add(5, PortList::from([4]));

            let conf = FrerConf {
                frer_vlan: 10,
                ..generation(5, &[0, 1])
            };
            orch.conf_set(1, &conf).unwrap();

            let warnings = orch.status_get(1).unwrap().oper_warnings;
            assert!(warnings.contains(OperWarnings::EGRESS_NO_LINK));
            assert!(warnings.contains(OperWarnings::INGRESS_NO_LINK));
            assert!(warnings.contains(OperWarnings::VLAN_MEMBERSHIP));
            assert!(!warnings.contains(OperWarnings::STP_BLOCKED));

            for port in [0, 1, 4] {
                orch.port_link_change(port, true);
            }
            sim.vlan_members_set(vid, PortList::from([0, 1, 2]));
            orch.vlan_membership_change(vid);
            assert_eq!(orch.status_get(1).unwrap().oper_warnings, OperWarnings::NONE);
            assert_eq!(
                FrerOperState::Active.text(orch.status_get(1).unwrap().oper_warnings),
                "Active"
            );

            sim.stp_state_set(1, StpState::Discarding);
            orch.stp_state_change(1);
            assert_eq!(orch.status_get(1).unwrap().oper_warnings, OperWarnings::STP_BLOCKED);

            sim.stp_state_set(1, StpState::Forwarding);
            sim.vlan_msti_set(vid, 3);
            sim.msti_state_set(3, 0, StpState::Learning);
            orch.msti_state_change(0);
            assert_eq!(orch.status_get(1).unwrap().oper_warnings, OperWarnings::MSTP_BLOCKED);

            orch.port_link_change(1, false);
            let warnings = orch.status_get(1).unwrap().oper_warnings;
            assert!(warnings.contains(OperWarnings::EGRESS_NO_LINK));
            assert!(!warnings.contains(OperWarnings::INGRESS_NO_LINK));
        }

        #[test]
        fn test_single_egress_port_in_generation() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(5, PortList::from([4]));

            orch.conf_set(1, &generation(5, &[0])).unwrap();
            assert!(orch
                .status_get(1)
                .unwrap()
                .oper_warnings
                .contains(OperWarnings::EGRESS_PORT_CNT));
        }

        #[test]
        fn test_failed_stp_read_counts_as_blocked() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(5, PortList::from([4]));
            orch.conf_set(1, &generation(5, &[0, 1])).unwrap();

            sim.fail("stp_port_state_get");
            orch.stp_state_change(0);
            assert!(orch
                .status_get(1)
                .unwrap()
                .oper_warnings
                .contains(OperWarnings::STP_BLOCKED));
        }

        #[test]
        fn test_failed_vlan_read_keeps_membership_verdict() {
            let (sim, orch) = setup(SimCapabilities::default());
            let vid = VlanId::new(10).unwrap();
            sim.stream_add(3, PortList::from([5]));

            let mut conf = FrerConf {
                frer_vlan: 10,
                ..recovery(&[3], &[0, 1])
            };
            orch.conf_set(1, &conf).unwrap();
            let has_vlan_warning =
                |orch: &FrerOrch| orch.status_get(1).unwrap().oper_warnings.contains(OperWarnings::VLAN_MEMBERSHIP);
            assert!(has_vlan_warning(&orch));

            sim.fail("vlan_members_get");
            orch.vlan_membership_change(vid);
            assert!(has_vlan_warning(&orch));

            // A latent error detection change recomputes every warning.
            conf.rcvy_latent_error_detection.enable = true;
            orch.conf_set(1, &conf).unwrap();
            assert_eq!(oper_state(&orch, 1), FrerOperState::Active);
            assert!(has_vlan_warning(&orch));

            sim.heal("vlan_members_get");
            sim.vlan_members_set(vid, PortList::from([0, 1]));
            conf.rcvy_latent_error_detection.enable = false;
            orch.conf_set(1, &conf).unwrap();
            assert!(!has_vlan_warning(&orch));
        }

        #[test]
        fn test_notifications_as_json() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(5, PortList::from([4]));
            orch.conf_set(1, &generation(5, &[0, 1])).unwrap();

            for port in [0, 1, 4] {
                let json = format!(r#"{{"type":"port_link","port":{},"link":true}}"#, port);
                orch.handle_notification(&json).unwrap();
            }
            let warnings = orch.status_get(1).unwrap().oper_warnings;
            assert!(!warnings.contains(OperWarnings::EGRESS_NO_LINK));
            assert!(!warnings.contains(OperWarnings::INGRESS_NO_LINK));

            sim.vlan_members_set(VlanId::DEFAULT, PortList::from([0, 1]));
            orch.handle_notification(r#"{"type":"vlan_membership","vid":1}"#).unwrap();
            assert_eq!(orch.status_get(1).unwrap().oper_warnings, OperWarnings::NONE);
        }
    }

    // Statistics and control
    mod statistics_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_generation_statistics_and_reset() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(5, PortList::from([4]));
            orch.conf_set(1, &generation(5, &[0, 1])).unwrap();

            sim.stream_counters_set(
                5,
                IngressCounters {
                    green_frames: 10,
                    yellow_frames: 2,
                    red_frames: 0,
                },
            );
            let stats = orch.statistics_get(1, None, None).unwrap();
            assert_eq!(stats.gen_matches, 12);
            assert_eq!(stats.gen_resets, 1);

            orch.control_set(
                1,
                &FrerControl {
                    reset: true,
                    latent_error_clear: false,
                },
            )
            .unwrap();
            assert!(sim.stream_action(5).unwrap().reapply);
            assert_eq!(orch.statistics_get(1, None, None).unwrap().gen_resets, 2);

            orch.statistics_clear(1).unwrap();
            let stats = orch.statistics_get(1, None, None).unwrap();
            assert_eq!(stats.gen_matches, 0);
            assert_eq!(stats.gen_resets, 0);

            assert_eq!(
                orch.statistics_get(1, Some(0), None),
                Err(FrerOrchError::PortMustBeNoneInGeneration)
            );
            assert_eq!(
                orch.statistics_get(1, None, Some(5)),
                Err(FrerOrchError::StreamIdMustBeNoneInGeneration)
            );
        }

        #[test]
        fn test_recovery_statistics() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));
            sim.stream_add(4, PortList::from([6]));

            let conf = FrerConf {
                rcvy_individual: true,
                ..recovery(&[3, 4], &[0, 2])
            };
            orch.conf_set(1, &conf).unwrap();

            let cstreams = sim.cstreams_in_use();
            sim.cstream_counters_set(
                cstreams[1],
                FrerCounters {
                    passed_packets: 100,
                    discarded_packets: 98,
                    ..FrerCounters::default()
                },
            );
            let base4 = sim.stream_action(4).unwrap().mstream_id.unwrap();
            sim.mstream_counters_set(
                base4,
                2,
                FrerCounters {
                    passed_packets: 7,
                    ..FrerCounters::default()
                },
            );

            let stats = orch.statistics_get(1, Some(2), None).unwrap();
            assert_eq!(stats.rcvy_passed_packets, 100);
            assert_eq!(stats.rcvy_discarded_packets, 98);
            assert_eq!(orch.statistics_get(1, Some(0), None).unwrap().rcvy_passed_packets, 0);
            assert_eq!(orch.statistics_get(1, Some(2), Some(4)).unwrap().rcvy_passed_packets, 7);

            assert_eq!(
                orch.statistics_get(1, None, None),
                Err(FrerOrchError::PortMustNotBeNoneInRecovery)
            );
            assert_eq!(orch.statistics_get(1, Some(99), None), Err(FrerOrchError::InvalidPort));
            assert_eq!(
                orch.statistics_get(1, Some(1), None),
                Err(FrerOrchError::NotPartOfEgressPorts)
            );
            assert_eq!(
                orch.statistics_get(1, Some(0), Some(9)),
                Err(FrerOrchError::StreamIdNotFound)
            );
            assert_eq!(
                orch.statistics_get(1, Some(0), Some(1000)),
                Err(FrerOrchError::InvalidStreamId)
            );

            orch.statistics_clear(1).unwrap();
            assert_eq!(orch.statistics_get(1, Some(2), None).unwrap().rcvy_passed_packets, 0);
            assert_eq!(orch.statistics_get(1, Some(2), Some(4)).unwrap().rcvy_passed_packets, 0);
        }

        #[test]
        fn test_stream_id_needs_individual_recovery() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));
            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();

            assert_eq!(
                orch.statistics_get(1, Some(0), Some(3)),
                Err(FrerOrchError::StreamIdOnlyInIndividualRecovery)
            );
        }

        #[test]
        fn test_inactive_instance_reports_zeros() {
            let (_sim, orch) = setup(SimCapabilities::default());
            let mut conf = recovery(&[3], &[0, 1]);
            conf.admin_active = false;
            orch.conf_set(1, &conf).unwrap();

            assert_eq!(orch.statistics_get(1, Some(0), None), Ok(Default::default()));
            assert_eq!(orch.statistics_itr(None), None);
            orch.statistics_clear(1).unwrap();
        }

        #[test]
        fn test_recovery_reset_rewrites_streams() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));
            sim.stream_add(4, PortList::from([6]));

            let conf = FrerConf {
                rcvy_individual: true,
                ..recovery(&[3, 4], &[0, 1])
            };
            orch.conf_set(1, &conf).unwrap();
            let cstreams = sim.cstreams_in_use();
            let before = sim.cstream_conf(cstreams[0]);
            let ops = sim.hw_op_count();

            orch.control_set(
                1,
                &FrerControl {
                    reset: true,
                    latent_error_clear: false,
                },
            )
            .unwrap();

            // Get and set per member stream (2 sets x 2 ports) and per compound stream.
            assert_eq!(sim.hw_op_count() - ops, 2 * (2 * 2 + 2));
            assert_eq!(sim.cstream_conf(cstreams[0]), before);
        }

        #[test]
        fn test_statistics_itr_order() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([8]));
            sim.stream_add(4, PortList::from([9]));
            sim.stream_add(5, PortList::from([10]));

            let individual = FrerConf {
                rcvy_individual: true,
                ..recovery(&[3, 4], &[1, 2])
            };
            orch.conf_set(2, &individual).unwrap();
            orch.conf_set(1, &generation(5, &[0, 1])).unwrap();

            let mut disabled = recovery(&[6], &[0, 1]);
            disabled.admin_active = false;
            orch.conf_set(3, &disabled).unwrap();

            let mut keys = Vec::new();
            let mut prev = None;
            while let Some(key) = orch.statistics_itr(prev) {
                keys.push(key);
                prev = Some(key);
            }

            assert_eq!(
                keys,
                vec![
                    (1, None, None),
                    (2, Some(1), Some(3)),
                    (2, Some(1), Some(4)),
                    (2, Some(1), None),
                    (2, Some(2), Some(3)),
                    (2, Some(2), Some(4)),
                    (2, Some(2), None),
                ]
            );
        }
    }

    // Latent error detection
    mod led_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        fn led_conf() -> FrerConf {
            FrerConf {
                rcvy_latent_error_detection: LatentErrorDetectionConf {
                    enable: true,
                    difference: 100,
                    period_ms: 2000,
                    paths: 2,
                    reset_period_ms: 30000,
                },
                ..recovery(&[3], &[0, 1])
            }
        }

        fn counters(passed: u64, discarded: u64) -> FrerCounters {
            FrerCounters {
                passed_packets: passed,
                discarded_packets: discarded,
                ..FrerCounters::default()
            }
        }

        #[test]
        fn test_latent_error_is_sticky_until_cleared() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));

            let start = Instant::now();
            orch.conf_set(1, &led_conf()).unwrap();
            assert!(!orch.notification_status_get(1).unwrap().latent_error);
            let cstream = sim.cstreams_in_use()[0];

            // Within the threshold of the zero baseline.
            sim.cstream_counters_set(cstream, counters(50, 0));
            assert_eq!(orch.process_timers(start + Duration::from_millis(2500)), 1);
            assert!(!orch.notification_status_get(1).unwrap().latent_error);

            sim.cstream_counters_set(cstream, counters(1000, 0));
            assert_eq!(orch.process_timers(start + Duration::from_millis(4500)), 1);
            assert!(orch.notification_status_get(1).unwrap().latent_error);
            assert!(orch.status_get(1).unwrap().notif_status.latent_error);

            // Back under the threshold: the flag stays.
            sim.cstream_counters_set(cstream, counters(30, 0));
            orch.process_timers(start + Duration::from_millis(6500));
            orch.process_timers(start + Duration::from_millis(8500));
            assert!(orch.notification_status_get(1).unwrap().latent_error);

            orch.control_set(
                1,
                &FrerControl {
                    reset: false,
                    latent_error_clear: true,
                },
            )
            .unwrap();
            assert!(!orch.notification_status_get(1).unwrap().latent_error);
            assert_eq!(orch.statistics_get(1, Some(0), None).unwrap().rcvy_passed_packets, 30);
        }

        #[test]
        fn test_reset_timer_takes_new_baseline() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));

            let start = Instant::now();
            orch.conf_set(1, &led_conf()).unwrap();
            assert_eq!(
                orch.statistics_get(1, Some(0), None).unwrap().rcvy_latent_error_resets,
                1
            );

            let cstream = sim.cstreams_in_use()[0];
            sim.cstream_counters_set(cstream, counters(5000, 0));

            // Test and reset are both due. The test sees the drift first.
            orch.process_timers(start + Duration::from_millis(30_500));
            assert!(orch.notification_status_get(1).unwrap().latent_error);
            assert_eq!(
                orch.statistics_get(1, Some(0), None).unwrap().rcvy_latent_error_resets,
                2
            );

            // New baseline at 5000: no drift once cleared.
            orch.control_set(
                1,
                &FrerControl {
                    reset: false,
                    latent_error_clear: true,
                },
            )
            .unwrap();
            orch.process_timers(start + Duration::from_millis(34_000));
            assert!(!orch.notification_status_get(1).unwrap().latent_error);
        }

        #[test]
        fn test_timers_stop_on_deactivation() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));

            orch.conf_set(1, &led_conf()).unwrap();
            assert!(orch.next_timer_deadline().is_some());

            orch.conf_del(1).unwrap();
            assert!(orch.next_timer_deadline().is_none());
            assert_eq!(orch.process_timers(Instant::now() + Duration::from_secs(60)), 0);
        }

        #[test]
        fn test_disabled_detection_arms_nothing() {
            let (sim, orch) = setup(SimCapabilities::default());
            sim.stream_add(3, PortList::from([5]));

            orch.conf_set(1, &recovery(&[3], &[0, 1])).unwrap();
            assert!(orch.next_timer_deadline().is_none());
            assert_eq!(orch.notification_status_get(1), Ok(Default::default()));
        }
    }
}
