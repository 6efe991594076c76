//! Tests for the procedure runtime

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::{Duration, Instant};

    use once_cell::sync::Lazy;

    use crate::config::{InterpConfig, ProcConfig, RuntimeConfig};
    use crate::interp::{ExecStatus, MemoryParams, ParamTable};
    use crate::proc::{ComparisonOp, Condition, Instruction, Procedure};
    use crate::rt::*;
    use crate::slot::SlotLayout;
    use crate::store::{BackendKind, CompiledProc, ProcStore, ReservedTable};

    static RUNTIME_TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const IDLE: Duration = Duration::from_secs(5);

    fn serial() -> MutexGuard<'static, ()> {
        RUNTIME_TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    struct Fixture {
        store: Arc<ProcStore>,
        params: Arc<MemoryParams>,
        runtime: ProcRuntime,
    }

    fn fixture_with(runtime: RuntimeConfig, reserved: ReservedTable) -> Fixture {
        let store = Arc::new(ProcStore::new(SlotLayout::new(4, 255).unwrap(), BackendKind::Dynamic, reserved).unwrap());
        let params = Arc::new(MemoryParams::new().with(0, "gate", 0).with(0, "open", 1));
        let config = ProcConfig {
            runtime,
            interp: InterpConfig {
                block_period_ms: 2,
                ..InterpConfig::default()
            },
            ..ProcConfig::default()
        };
        let runtime = ProcRuntime::with_local(&config, Arc::clone(&store), params.clone()).unwrap();
        Fixture { store, params, runtime }
    }

    fn fixture(runtime: RuntimeConfig) -> Fixture {
        fixture_with(runtime, ReservedTable::new(4))
    }

    fn set(param: &str, value: &str) -> Instruction {
        Instruction::Set {
            node: 0,
            param: param.into(),
            value: value.into(),
        }
    }

    /// Waits for `gate == open`, then writes `param = value`.
    fn gated(param: &str, value: &str) -> Procedure {
        Procedure::from_instructions(vec![
            Instruction::Block {
                node: 0,
                cond: Condition::new("gate", ComparisonOp::Eq, "open"),
            },
            set(param, value),
        ])
        .unwrap()
    }

    fn single(instruction: Instruction) -> Procedure {
        Procedure::from_instructions(vec![instruction]).unwrap()
    }

    fn open_gate(params: &MemoryParams) {
        params.set(0, "gate", 1).unwrap();
    }

    fn outcome_of(runtime: &ProcRuntime, id: ExecId) -> Option<ExecOutcome> {
        runtime
            .history()
            .into_iter()
            .find(|record| record.id == id)
            .map(|record| record.outcome)
    }

    /// Polls `check` from the calling thread without driving the scheduler.
    fn eventually(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + IDLE;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        check()
    }

    /// Native body that spins until `released` is set, failing after five seconds.
    fn held_until(released: &Arc<AtomicBool>) -> CompiledProc {
        let released = Arc::clone(released);
        CompiledProc::new("held", move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !released.load(Ordering::SeqCst) {
                if Instant::now() >= deadline {
                    return 1;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            0
        })
    }

    fn with_max(max_concurrent: usize) -> RuntimeConfig {
        RuntimeConfig {
            max_concurrent,
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn test_admission_rejects_past_capacity() {
        let _guard = serial();
        let fx = fixture(with_max(4));
        fx.store.set(gated("a", "1"), 10, true).unwrap();

        for _ in 0..4 {
            fx.runtime.run(10).unwrap();
        }
        assert_eq!(fx.runtime.run(10), Err(RuntimeError::AtCapacity { max: 4 }));

        let stats = fx.runtime.stats().unwrap();
        assert_eq!(stats.running, 4);
        assert_eq!(stats.launched, 4);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.live_detached, 4);

        assert_eq!(fx.runtime.stop_all(), Ok(4));
        let stats = fx.runtime.stats().unwrap();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.cancelled, 4);
        assert_eq!(stats.live_detached, 0);
        assert!(
            fx.runtime
                .history()
                .iter()
                .all(|record| record.outcome == ExecOutcome::Cancelled)
        );
        assert!(fx.params.get(0, "a").is_err());
    }

    #[test]
    fn test_running_execution_ignores_store_replacement() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig::default());
        fx.store.set(gated("out", "1"), 10, true).unwrap();

        let first = fx.runtime.run(10).unwrap();
        fx.store.set(single(set("out", "2")), 10, true).unwrap();
        open_gate(&fx.params);
        assert_eq!(fx.runtime.wait_idle(IDLE), Ok(true));
        assert_eq!(fx.params.get(0, "out"), Ok(1));

        let second = fx.runtime.run(10).unwrap();
        assert_eq!(fx.runtime.wait_idle(IDLE), Ok(true));
        assert_eq!(fx.params.get(0, "out"), Ok(2));

        assert_eq!(outcome_of(&fx.runtime, first), Some(ExecOutcome::Completed(ExecStatus::OK)));
        assert_eq!(outcome_of(&fx.runtime, second), Some(ExecOutcome::Completed(ExecStatus::OK)));
    }

    #[test]
    fn test_deleting_slot_does_not_affect_running_execution() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig::default());
        fx.store.set(gated("out", "7"), 10, true).unwrap();

        fx.runtime.run(10).unwrap();
        fx.store.delete(10).unwrap();
        open_gate(&fx.params);
        assert_eq!(fx.runtime.wait_idle(IDLE), Ok(true));
        assert_eq!(fx.params.get(0, "out"), Ok(7));
        assert_eq!(fx.runtime.run(10), Err(RuntimeError::SlotEmpty { slot: 10 }));
    }

    #[test]
    fn test_completion_deregisters_and_releases_copy() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig::default());
        fx.store.set(single(set("x", "1")), 10, true).unwrap();

        let id = fx.runtime.run(10).unwrap();
        assert_eq!(fx.runtime.wait_idle(IDLE), Ok(true));

        let stats = fx.runtime.stats().unwrap();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.live_detached, 0);
        assert_eq!(
            fx.runtime.history(),
            vec![ExecRecord {
                id,
                slot: 10,
                outcome: ExecOutcome::Completed(ExecStatus::OK),
            }]
        );
        assert_eq!(fx.runtime.stop(id), Ok(false), "finished executions cannot be stopped");
    }

    #[test]
    fn test_interpreter_failure_is_recorded_not_fatal() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig::default());
        fx.store.set(single(set("x", "nope")), 10, true).unwrap();
        fx.store.set(single(set("y", "1")), 11, true).unwrap();

        let failed = fx.runtime.run(10).unwrap();
        assert_eq!(fx.runtime.wait_idle(IDLE), Ok(true));
        match outcome_of(&fx.runtime, failed) {
            Some(ExecOutcome::Completed(status)) => {
                assert!(!status.is_ok());
                assert_eq!(status.code(), 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        fx.runtime.run(11).unwrap();
        assert_eq!(fx.runtime.wait_idle(IDLE), Ok(true));
        assert_eq!(fx.params.get(0, "y"), Ok(1));
    }

    #[test]
    fn test_analysis_failure_is_recorded() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig::default());
        fx.store
            .set(
                Procedure::from_instructions(vec![Instruction::Call { node: 0, slot: 40 }, set("x", "1")]).unwrap(),
                10,
                true,
            )
            .unwrap();

        let id = fx.runtime.run(10).unwrap();
        assert_eq!(fx.runtime.wait_idle(IDLE), Ok(true));
        match outcome_of(&fx.runtime, id) {
            Some(ExecOutcome::AnalysisFailed(reason)) => assert!(reason.contains("40"), "{reason}"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(fx.params.get(0, "x").is_err(), "nothing ran");
        assert_eq!(fx.runtime.stats().unwrap().live_detached, 0);
    }

    #[test]
    fn test_compiled_procedure_runs_without_detach() {
        let _guard = serial();
        let calls = Arc::new(AtomicUsize::new(0));
        let reserved = {
            let calls = Arc::clone(&calls);
            ReservedTable::new(4)
                .with(
                    1,
                    CompiledProc::new("tick", move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        0
                    }),
                )
                .unwrap()
        };
        let fx = fixture_with(RuntimeConfig::default(), reserved);

        let id = fx.runtime.run(1).unwrap();
        assert_eq!(fx.runtime.stats().unwrap().live_detached, 0);
        assert_eq!(fx.runtime.wait_idle(IDLE), Ok(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome_of(&fx.runtime, id), Some(ExecOutcome::Completed(ExecStatus::OK)));
    }

    #[test]
    fn test_empty_slots_are_rejected() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig::default());
        assert_eq!(fx.runtime.run(50), Err(RuntimeError::SlotEmpty { slot: 50 }));
        assert_eq!(fx.runtime.run(2), Err(RuntimeError::SlotEmpty { slot: 2 }));
        assert_eq!(fx.runtime.stats().unwrap().launched, 0);
    }

    #[test]
    fn test_stop_all_on_empty_set() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig::default());
        assert_eq!(fx.runtime.stop_all(), Ok(0));
        assert!(fx.runtime.history().is_empty());
    }

    #[test]
    fn test_stop_one_leaves_others_in_any_order() {
        let _guard = serial();
        let fx = fixture(with_max(8));
        fx.store.set(gated("done", "1"), 10, true).unwrap();

        let ids: Vec<ExecId> = (0..3).map(|_| fx.runtime.run(10).unwrap()).collect();
        assert_eq!(fx.runtime.stop(ids[0]), Ok(true));
        assert_eq!(fx.runtime.stop(ids[0]), Ok(false));

        // Removal swaps entries around; only membership is meaningful.
        let mut remaining: Vec<ExecId> = fx.runtime.running().unwrap().iter().map(|e| e.id).collect();
        remaining.sort();
        assert_eq!(remaining, vec![ids[1], ids[2]]);
        assert!(
            fx.runtime
                .running()
                .unwrap()
                .iter()
                .all(|e| e.slot == 10 && e.kind == ProcKind::Dsl)
        );
        assert_eq!(fx.runtime.stats().unwrap().live_detached, 2);

        open_gate(&fx.params);
        assert_eq!(fx.runtime.wait_idle(IDLE), Ok(true));
        assert_eq!(outcome_of(&fx.runtime, ids[0]), Some(ExecOutcome::Cancelled));
        assert_eq!(outcome_of(&fx.runtime, ids[2]), Some(ExecOutcome::Completed(ExecStatus::OK)));
        assert_eq!(fx.runtime.stats().unwrap().live_detached, 0);
    }

    #[test]
    fn test_stop_all_races_with_self_completion() {
        let _guard = serial();
        let fx = fixture(with_max(16));
        fx.store.set(single(set("x", "1")), 10, true).unwrap();

        for _ in 0..16 {
            fx.runtime.run(10).unwrap();
        }
        fx.runtime.stop_all().unwrap();

        let stats = fx.runtime.stats().unwrap();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.live_detached, 0);
        assert_eq!(stats.launched, 16);
        assert_eq!(stats.completed + stats.cancelled, 16);

        let mut ids: Vec<ExecId> = fx.runtime.history().iter().map(|r| r.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16, "every execution is recorded exactly once");
    }

    #[test]
    fn test_stop_all_reports_teardown_ceiling() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig {
            stop_all_retry_limit: 1,
            ..RuntimeConfig::default()
        });
        fx.store.set(gated("a", "1"), 10, true).unwrap();
        fx.runtime.run(10).unwrap();
        fx.runtime.run(10).unwrap();

        assert_eq!(fx.runtime.stop_all(), Err(RuntimeError::TeardownCeiling { attempts: 1 }));
        assert_eq!(fx.runtime.stats().unwrap().running, 1);

        open_gate(&fx.params);
        assert_eq!(fx.runtime.wait_idle(IDLE), Ok(true));
    }

    #[test]
    fn test_history_is_bounded() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig {
            history_len: 2,
            ..RuntimeConfig::default()
        });
        fx.store.set(single(set("x", "1")), 10, true).unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(fx.runtime.run(10).unwrap());
            assert_eq!(fx.runtime.wait_idle(IDLE), Ok(true));
        }
        let kept: Vec<ExecId> = fx.runtime.history().iter().map(|r| r.id).collect();
        assert_eq!(kept, ids[1..].to_vec());
    }

    #[test]
    fn test_slow_compiled_procedure_does_not_starve_others() {
        let _guard = serial();
        let released = Arc::new(AtomicBool::new(false));
        let reserved = ReservedTable::new(4).with(1, held_until(&released)).unwrap();
        let fx = fixture_with(
            RuntimeConfig {
                single_thread: true,
                ..RuntimeConfig::default()
            },
            reserved,
        );
        fx.store.set(single(set("x", "1")), 10, true).unwrap();

        let native = fx.runtime.run(1).unwrap();
        let dsl = fx.runtime.run(10).unwrap();
        assert!(eventually(|| fx.params.get(0, "x") == Ok(1)));
        assert!(eventually(|| outcome_of(&fx.runtime, dsl).is_some()));

        let running: Vec<ExecId> = fx.runtime.running().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(running, vec![native]);

        let started = Instant::now();
        assert_eq!(fx.runtime.stop(native), Ok(true));
        assert!(started.elapsed() < Duration::from_secs(2), "stop waited for the native body");
        assert_eq!(outcome_of(&fx.runtime, native), Some(ExecOutcome::Cancelled));

        released.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_single_thread_scheduler_runs_without_caller() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig {
            single_thread: true,
            ..RuntimeConfig::default()
        });
        fx.store.set(single(set("x", "1")), 10, true).unwrap();

        let id = fx.runtime.run(10).unwrap();
        assert!(eventually(|| fx.params.get(0, "x") == Ok(1)));
        assert!(eventually(|| fx.runtime.running().unwrap().is_empty()));
        assert_eq!(outcome_of(&fx.runtime, id), Some(ExecOutcome::Completed(ExecStatus::OK)));
    }

    #[test]
    fn test_single_thread_scheduler() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig {
            single_thread: true,
            ..RuntimeConfig::default()
        });
        assert!(!fx.runtime.stats().unwrap().is_multi_threaded);

        fx.store.set(gated("x", "3"), 10, true).unwrap();
        fx.runtime.run(10).unwrap();
        assert_eq!(fx.runtime.wait_idle(Duration::from_millis(20)), Ok(false));
        open_gate(&fx.params);
        assert_eq!(fx.runtime.wait_idle(IDLE), Ok(true));
        assert_eq!(fx.params.get(0, "x"), Ok(3));
    }

    #[test]
    fn test_drop_stops_running_executions() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig::default());
        fx.store.set(gated("late", "1"), 10, true).unwrap();
        fx.runtime.run(10).unwrap();
        drop(fx.runtime);

        open_gate(&fx.params);
        std::thread::sleep(Duration::from_millis(20));
        assert!(fx.params.get(0, "late").is_err());
    }

    #[test]
    fn test_drop_inside_async_context() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig::default());
        fx.store.set(gated("late", "1"), 10, true).unwrap();
        fx.runtime.run(10).unwrap();

        let outer = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let runtime = fx.runtime;
        outer.block_on(async move {
            drop(runtime);
        });
    }

    #[test]
    fn test_shutdown_inside_async_context_records_cancellations() {
        let _guard = serial();
        let fx = fixture(RuntimeConfig::default());
        fx.store.set(gated("late", "1"), 10, true).unwrap();
        let mut runtime = fx.runtime;
        let ids = [runtime.run(10).unwrap(), runtime.run(10).unwrap()];

        let outer = tokio::runtime::Builder::new_current_thread().build().unwrap();
        outer.block_on(async {
            runtime.shutdown();
        });

        for id in ids {
            assert_eq!(outcome_of(&runtime, id), Some(ExecOutcome::Cancelled));
        }
        let stats = runtime.stats().unwrap();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.cancelled, 2);
        assert_eq!(runtime.run(10), Err(RuntimeError::ShutDown));
    }
}
