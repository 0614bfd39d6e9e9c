//! Multi-threaded episode tests for txnmgr-concurrency
//!
//! These tests drive real participants on the scheduler's worker threads:
//!
//! 1. **Outcome Scenarios** - business vs participant failure reporting
//! 2. **Barrier Ordering** - setup before business, outcome before finish
//! 3. **Serialization** - episodes on one manager never interleave
//! 4. **Teardown** - nothing from an episode outlives `run`
//! 5. **Abort Paths** - panics in the business function or a participant
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test episode_tests
//! ```

use parking_lot::Mutex;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use txnmgr_concurrency::{
    txn_fn, BoxedTxnFn, ErrorSender, Outcome, RunError, TransactionManager, TxnContext, TxnFn,
};
use txnmgr_core::ManagerConfig;

// ============================================================================
// Test Helpers
// ============================================================================

/// What one participant saw during an episode
#[derive(Debug, Clone, PartialEq)]
struct Observation {
    index: usize,
    outcome: Option<Outcome<String>>,
    started_when_received: usize,
}

#[derive(Default)]
struct Probe {
    started: AtomicUsize,
    finished: AtomicUsize,
    observations: Mutex<Vec<Observation>>,
}

impl Probe {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn sorted_observations(&self) -> Vec<Observation> {
        let mut obs = self.observations.lock().clone();
        obs.sort_by_key(|o| o.index);
        obs
    }
}

/// Participant that records what it observes and optionally reports `report`
fn observing(probe: &Arc<Probe>, setup: Duration, report: Option<&str>) -> BoxedTxnFn<String> {
    let probe = Arc::clone(probe);
    let report = report.map(str::to_string);
    txn_fn(move |ctx: TxnContext<String>| {
        thread::sleep(setup);
        probe.started.fetch_add(1, Ordering::SeqCst);
        ctx.start.started();

        let outcome = ctx.inbound.recv();
        probe.observations.lock().push(Observation {
            index: ctx.index,
            outcome,
            started_when_received: probe.started.load(Ordering::SeqCst),
        });

        if let Some(err) = report {
            ctx.outbound.report(err);
        }
        probe.finished.fetch_add(1, Ordering::SeqCst);
    })
}

fn quiet(report: Option<&str>) -> BoxedTxnFn<String> {
    observing(&Probe::new(), Duration::ZERO, report)
}

// ============================================================================
// SECTION 1: Outcome Scenarios
// ============================================================================

mod outcome_scenarios {
    use super::*;

    #[test]
    fn three_participants_all_commit() {
        let manager = TransactionManager::new();
        let result = manager.run(|| Ok(()), vec![quiet(None), quiet(None), quiet(None)]);
        assert!(result.is_ok());
    }

    #[test]
    fn one_participant_reports_disk_full() {
        let manager = TransactionManager::new();
        let err = manager
            .run(
                || Ok(()),
                vec![quiet(None), quiet(Some("disk-full")), quiet(None)],
            )
            .unwrap_err();

        assert!(matches!(err, RunError::Participants(_)));
        assert!(err.to_string().contains("disk-full"));
        assert_eq!(err.participant_errors(), &["disk-full".to_string()]);
    }

    #[test]
    fn every_reported_error_is_combined() {
        let manager = TransactionManager::new();
        let err = manager
            .run(
                || Ok(()),
                vec![quiet(Some("a")), quiet(None), quiet(Some("b")), quiet(Some("c"))],
            )
            .unwrap_err();

        let mut reported = err.participant_errors().to_vec();
        reported.sort();
        assert_eq!(reported, vec!["a", "b", "c"]);

        let msg = err.to_string();
        assert!(msg.starts_with("3 errors occurred"));
        for e in ["a", "b", "c"] {
            assert!(msg.contains(e));
        }
    }

    #[test]
    fn business_failure_hides_participant_errors() {
        let manager = TransactionManager::new();
        let err = manager
            .run(
                || Err("validation-failed".to_string()),
                vec![quiet(Some("x")), quiet(Some("y")), quiet(Some("z"))],
            )
            .unwrap_err();

        assert_eq!(err.into_business().as_deref(), Some("validation-failed"));
    }

    #[test]
    fn business_error_reaches_every_participant() {
        let manager = TransactionManager::new();
        let probe = Probe::new();
        let participants = (0..5)
            .map(|_| observing(&probe, Duration::ZERO, None))
            .collect::<Vec<_>>();

        let err = manager
            .run(|| Err("validation-failed".to_string()), participants)
            .unwrap_err();
        assert!(err.is_business());

        let obs = probe.sorted_observations();
        assert_eq!(obs.len(), 5);
        for (i, o) in obs.iter().enumerate() {
            assert_eq!(o.index, i);
            assert_eq!(o.outcome, Some(Err("validation-failed".to_string())));
        }
    }

    #[test]
    fn zero_participants_is_plain_call() {
        let manager = TransactionManager::new();
        let calls = AtomicUsize::new(0);

        let ok: Result<(), RunError<String>> = manager.run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Vec::new(),
        );
        assert!(ok.is_ok());

        let err = manager
            .run(|| Err::<(), String>("boom".to_string()), Vec::new())
            .unwrap_err();
        assert_eq!(err.into_business().as_deref(), Some("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Participant with its own state, implementing `TxnFn` directly
    struct Ledger {
        applied: Arc<AtomicBool>,
        rolled_back: Arc<AtomicBool>,
    }

    impl TxnFn<String> for Ledger {
        fn call(self: Box<Self>, ctx: TxnContext<String>) {
            ctx.start.started();
            match ctx.inbound.recv() {
                Some(Ok(())) => self.applied.store(true, Ordering::SeqCst),
                _ => self.rolled_back.store(true, Ordering::SeqCst),
            }
        }
    }

    #[test]
    fn struct_participants_commit_and_roll_back() {
        let manager = TransactionManager::new();
        let applied = Arc::new(AtomicBool::new(false));
        let rolled_back = Arc::new(AtomicBool::new(false));

        let ledger = || -> BoxedTxnFn<String> {
            Box::new(Ledger {
                applied: Arc::clone(&applied),
                rolled_back: Arc::clone(&rolled_back),
            })
        };

        manager.run(|| Ok(()), vec![ledger()]).unwrap();
        assert!(applied.load(Ordering::SeqCst));
        assert!(!rolled_back.load(Ordering::SeqCst));

        applied.store(false, Ordering::SeqCst);
        let _ = manager.run(|| Err("no".to_string()), vec![ledger()]);
        assert!(!applied.load(Ordering::SeqCst));
        assert!(rolled_back.load(Ordering::SeqCst));
    }
}

// ============================================================================
// SECTION 2: Barrier Ordering
// ============================================================================

mod barrier_ordering {
    use super::*;

    #[test]
    fn business_runs_after_every_participant_started() {
        let manager = TransactionManager::new();
        let probe = Probe::new();
        let participants = (0..6)
            .map(|i| observing(&probe, Duration::from_millis(5 * i), None))
            .collect::<Vec<_>>();

        let seen = AtomicUsize::new(usize::MAX);
        manager
            .run(
                || {
                    seen.store(probe.started.load(Ordering::SeqCst), Ordering::SeqCst);
                    Ok(())
                },
                participants,
            )
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn outcome_delivered_only_after_all_started() {
        let manager = TransactionManager::new();
        let probe = Probe::new();
        let participants = (0..4)
            .map(|i| observing(&probe, Duration::from_millis(10 * (4 - i)), None))
            .collect::<Vec<_>>();

        manager.run(|| Ok(()), participants).unwrap();

        for o in probe.sorted_observations() {
            assert_eq!(o.started_when_received, 4);
            assert_eq!(o.outcome, Some(Ok(())));
        }
    }

    #[test]
    fn run_returns_after_every_participant_finished() {
        let manager = TransactionManager::new();
        let probe = Probe::new();
        let slow = {
            let probe = Arc::clone(&probe);
            txn_fn(move |ctx: TxnContext<String>| {
                ctx.start.started();
                let _ = ctx.inbound.recv();
                thread::sleep(Duration::from_millis(50));
                probe.finished.fetch_add(1, Ordering::SeqCst);
            })
        };

        manager
            .run(|| Ok(()), vec![slow, observing(&probe, Duration::ZERO, None)])
            .unwrap();

        assert_eq!(probe.finished.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn participants_run_concurrently() {
        // Each participant waits for all the others during setup. This only
        // completes if every participant has its own worker.
        let n = 16;
        let manager = TransactionManager::new();
        let rendezvous = Arc::new(Barrier::new(n));
        let names = Arc::new(Mutex::new(HashSet::new()));

        let participants = (0..n)
            .map(|_| {
                let rendezvous = Arc::clone(&rendezvous);
                let names = Arc::clone(&names);
                txn_fn(move |ctx: TxnContext<String>| {
                    rendezvous.wait();
                    if let Some(name) = thread::current().name() {
                        names.lock().insert(name.to_string());
                    }
                    ctx.start.started();
                    let _ = ctx.inbound.recv();
                })
            })
            .collect::<Vec<_>>();

        manager.run(|| Ok(()), participants).unwrap();

        let names = names.lock();
        assert_eq!(names.len(), n);
        assert!(names.iter().all(|name| name.starts_with("txnmgr-worker-")));
    }

    #[test]
    fn configured_worker_prefix_is_used() {
        let config = ManagerConfig {
            worker_name_prefix: "billing".to_string(),
            ..ManagerConfig::default()
        };
        let manager = TransactionManager::with_config(config).unwrap();
        let name = Arc::new(Mutex::new(None));
        let n = Arc::clone(&name);

        manager
            .run(
                || Ok(()),
                vec![txn_fn(move |ctx: TxnContext<String>| {
                    *n.lock() = thread::current().name().map(str::to_string);
                    ctx.start.started();
                    let _ = ctx.inbound.recv();
                })],
            )
            .unwrap();

        assert_eq!(name.lock().as_deref(), Some("billing-0"));
    }

    #[test]
    fn business_runs_on_caller_thread() {
        let manager = TransactionManager::new();
        let caller = thread::current().id();
        manager
            .run(
                || {
                    assert_eq!(thread::current().id(), caller);
                    Ok(())
                },
                vec![quiet(None), quiet(None)],
            )
            .unwrap();
    }
}

// ============================================================================
// SECTION 3: Serialization
// ============================================================================

mod serialization {
    use super::*;

    #[test]
    fn sequential_runs_reuse_manager() {
        let manager = TransactionManager::new();
        for round in 0..5 {
            let probe = Probe::new();
            let participants = (0..3)
                .map(|_| observing(&probe, Duration::ZERO, None))
                .collect::<Vec<_>>();
            manager.run(|| Ok(()), participants).unwrap();
            assert_eq!(probe.finished.load(Ordering::SeqCst), 3, "round {}", round);
        }
        assert_eq!(manager.metrics().episodes_completed, 5);
    }

    #[test]
    fn concurrent_runs_never_interleave() {
        let manager = Arc::new(TransactionManager::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let go = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|caller| {
                let manager = Arc::clone(&manager);
                let events = Arc::clone(&events);
                let go = Arc::clone(&go);
                thread::spawn(move || {
                    go.wait();
                    let participant = {
                        let events = Arc::clone(&events);
                        txn_fn(move |ctx: TxnContext<String>| {
                            events.lock().push(("setup", caller));
                            ctx.start.started();
                            let _ = ctx.inbound.recv();
                            events.lock().push(("finish", caller));
                        })
                    };
                    manager
                        .run(
                            || {
                                events.lock().push(("business", caller));
                                thread::sleep(Duration::from_millis(10));
                                Ok(())
                            },
                            vec![participant],
                        )
                        .unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Events come in contiguous (setup, business, finish) triples per caller
        let events = events.lock();
        assert_eq!(events.len(), 12);
        let mut callers = HashSet::new();
        for chunk in events.chunks(3) {
            let caller = chunk[0].1;
            assert_eq!(
                chunk,
                &[("setup", caller), ("business", caller), ("finish", caller)]
            );
            assert!(callers.insert(caller));
        }
    }
}

// ============================================================================
// SECTION 4: Teardown
// ============================================================================

mod teardown {
    use super::*;

    #[test]
    fn leaked_error_sender_is_closed_after_run() {
        let manager = TransactionManager::new();
        let leaked: Arc<Mutex<Option<ErrorSender<String>>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&leaked);

        manager
            .run(
                || Ok(()),
                vec![txn_fn(move |ctx: TxnContext<String>| {
                    ctx.start.started();
                    let _ = ctx.inbound.recv();
                    *slot.lock() = Some(ctx.outbound);
                })],
            )
            .unwrap();

        let sender = leaked.lock().take().unwrap();
        assert_eq!(sender.try_report("late".to_string()), Err("late".to_string()));
    }

    #[test]
    fn many_participants_fully_torn_down() {
        let manager = TransactionManager::new();
        let probe = Probe::new();
        let participants = (0..64)
            .map(|i| observing(&probe, Duration::ZERO, (i % 8 == 0).then_some("odd")))
            .collect::<Vec<_>>();

        let err = manager.run(|| Ok(()), participants).unwrap_err();
        assert_eq!(err.participant_errors().len(), 8);
        assert_eq!(probe.finished.load(Ordering::SeqCst), 64);
        assert_eq!(
            Arc::strong_count(&probe),
            1,
            "participant closures must be dropped before run returns"
        );
    }

    /// Counts up when the worker thread that owns it exits
    struct ExitCounter(std::cell::RefCell<Option<Arc<AtomicUsize>>>);

    impl Drop for ExitCounter {
        fn drop(&mut self) {
            if let Some(exited) = self.0.borrow_mut().take() {
                exited.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    thread_local! {
        static ON_EXIT: ExitCounter = ExitCounter(std::cell::RefCell::new(None));
    }

    #[test]
    fn worker_threads_exit_before_run_returns() {
        let manager = TransactionManager::new();
        let exited = Arc::new(AtomicUsize::new(0));

        for round in 1..=3 {
            let participants = (0..8)
                .map(|_| {
                    let exited = Arc::clone(&exited);
                    txn_fn(move |ctx: TxnContext<String>| {
                        ON_EXIT.with(|counter| *counter.0.borrow_mut() = Some(exited));
                        ctx.start.started();
                        let _ = ctx.inbound.recv();
                    })
                })
                .collect::<Vec<_>>();

            manager.run(|| Ok(()), participants).unwrap();
            assert_eq!(
                exited.load(Ordering::SeqCst),
                8 * round,
                "every worker thread must have exited when run returns"
            );
        }
    }
}

// ============================================================================
// SECTION 5: Abort Paths
// ============================================================================

mod abort_paths {
    use super::*;

    #[test]
    fn business_panic_closes_inbound_without_outcome() {
        let manager = TransactionManager::new();
        let probe = Probe::new();
        let participants = (0..3)
            .map(|_| observing(&probe, Duration::ZERO, None))
            .collect::<Vec<_>>();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            manager.run(|| -> Outcome<String> { panic!("business exploded") }, participants)
        }));
        assert!(result.is_err());

        let obs = probe.sorted_observations();
        assert_eq!(obs.len(), 3);
        assert!(obs.iter().all(|o| o.outcome.is_none()));
        assert_eq!(probe.finished.load(Ordering::SeqCst), 3);

        // Lock was released during unwinding
        manager.run(|| Ok(()), vec![quiet(None)]).unwrap();
    }

    #[test]
    fn participant_panic_after_start_does_not_hang() {
        let manager = TransactionManager::new();
        let panicking = txn_fn(|ctx: TxnContext<String>| {
            ctx.start.started();
            panic!("participant exploded");
        });

        let result = manager.run(|| Ok(()), vec![quiet(None), panicking, quiet(Some("e"))]);
        assert_eq!(result.unwrap_err().participant_errors(), &["e".to_string()]);
    }
}
