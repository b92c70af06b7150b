//! Integration tests for the public scheduling contract.
//!
//! Assertions on values produced inside coroutines are made after `start`
//! returns, from the host: a failed assertion inside a context would unwind
//! through the switch trampolines.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use strand::{Engine, Status};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

type Log = Rc<RefCell<Vec<String>>>;

fn log(log: &Log, entry: impl Into<String>) {
    log.borrow_mut().push(entry.into());
}

#[test]
fn round_trip_state_preservation() {
    init_tracing();
    let engine = Engine::new();
    let out = Rc::new(RefCell::new(Vec::new()));

    let sink = out.clone();
    engine
        .start(move |engine| {
            let a_sink = sink.clone();
            engine.create(move |engine| {
                let mut v: u64 = 0xDEAD_BEEF;
                let mut buf = [0u8; 64];
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = u8::try_from(i).unwrap();
                }
                for i in 0..16u64 {
                    engine.yield_now();
                    v = v.wrapping_mul(31).wrapping_add(i);
                }
                engine.yield_now();
                a_sink.borrow_mut().push(("a", v, u64::from(buf[63])));
            });
            let b_sink = sink.clone();
            engine.create(move |engine| {
                let mut v: u64 = 0x1234_5678;
                for i in 0..16u64 {
                    engine.yield_now();
                    v = v.wrapping_mul(17).wrapping_add(i);
                }
                b_sink.borrow_mut().push(("b", v, 0));
            });
            for _ in 0..40 {
                engine.yield_now();
            }
        })
        .unwrap();

    // Recompute the expected values without any switching in between.
    let mut ea: u64 = 0xDEAD_BEEF;
    let mut eb: u64 = 0x1234_5678;
    for i in 0..16u64 {
        ea = ea.wrapping_mul(31).wrapping_add(i);
        eb = eb.wrapping_mul(17).wrapping_add(i);
    }
    let results = out.borrow();
    assert!(results.contains(&("a", ea, 63)));
    assert!(results.contains(&("b", eb, 0)));
}

#[test]
fn round_robin_covers_all_before_repeating() {
    init_tracing();
    let engine = Engine::new();
    let activations: Log = Rc::new(RefCell::new(Vec::new()));

    let outer = activations.clone();
    engine
        .start(move |engine| {
            for name in ["a", "b", "c"] {
                let sink = outer.clone();
                engine.create(move |engine| {
                    for _ in 0..3 {
                        log(&sink, name);
                        engine.yield_now();
                    }
                });
            }
        })
        .unwrap();

    let seen = activations.borrow();
    assert_eq!(seen.len(), 9);
    // Every cycle of three activations touches all three contexts before any
    // repeats; we get three full cycles.
    for cycle in seen.chunks(3) {
        let mut sorted: Vec<&str> = cycle.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        assert_eq!(sorted, ["a", "b", "c"], "unfair cycle: {cycle:?}");
    }
}

#[test]
fn blocked_contexts_are_not_scheduled() {
    init_tracing();
    let engine = Engine::new();
    let activations: Log = Rc::new(RefCell::new(Vec::new()));
    let stop = Rc::new(Cell::new(false));

    let outer = activations.clone();
    let outer_stop = stop.clone();
    let w3_probe = Rc::new(Cell::new(None));
    let w3_out = w3_probe.clone();
    engine
        .start(move |engine| {
            let mut workers = Vec::new();
            for name in ["w1", "w2", "w3", "w4"] {
                let sink = outer.clone();
                let stop = outer_stop.clone();
                workers.push(engine.create(move |engine| {
                    while !stop.get() {
                        log(&sink, name);
                        engine.yield_now();
                    }
                }));
            }
            engine.block(Some(workers[1]));
            engine.block(Some(workers[2]));
            log(&outer, "--blocked--");
            for _ in 0..8 {
                engine.yield_now();
            }
            engine.unblock(workers[1]);
            log(&outer, "--unblocked-w2--");
            for _ in 0..8 {
                engine.yield_now();
            }
            outer_stop.set(true);
            engine.yield_now();
            w3_out.set(Some(workers[2]));
        })
        .unwrap();

    let seen = activations.borrow();
    let blocked_at = seen.iter().position(|e| e == "--blocked--").unwrap();
    let unblocked_at = seen.iter().position(|e| e == "--unblocked-w2--").unwrap();

    // While w2 and w3 were blocked, only w1 and w4 ran.
    let during = &seen[blocked_at + 1..unblocked_at];
    assert!(during.iter().all(|e| e == "w1" || e == "w4"), "{during:?}");
    assert!(during.iter().any(|e| e == "w1"));
    assert!(during.iter().any(|e| e == "w4"));

    // After the unblock, w2 runs again; w3 never does.
    let after = &seen[unblocked_at + 1..];
    assert!(after.iter().any(|e| e == "w2"), "{after:?}");
    assert!(!seen.iter().any(|e| e == "w3"));

    // w3 stays blocked past the end of the run; no automatic cleanup.
    let w3 = w3_probe.get().unwrap();
    assert_eq!(engine.status(w3), Status::Blocked);
    assert_eq!(engine.blocked_count(), 1);
    assert_eq!(engine.alive_count(), 0);
}

#[test]
fn start_returns_when_everything_finished() {
    init_tracing();
    let engine = Engine::new();
    let done = Rc::new(Cell::new(0));

    let handles = Rc::new(RefCell::new(Vec::new()));
    let inner = handles.clone();
    let counter = done.clone();
    engine
        .start(move |engine| {
            for _ in 0..3 {
                let counter = counter.clone();
                let h = engine.create(move |_| {
                    counter.set(counter.get() + 1);
                });
                inner.borrow_mut().push(h);
            }
        })
        .unwrap();

    assert_eq!(done.get(), 3);
    assert_eq!(engine.alive_count(), 0);
    for h in handles.borrow().iter() {
        assert_eq!(engine.status(*h), Status::Finished);
    }
    assert_eq!(engine.current(), engine.idle());
}

#[test]
fn stack_isolation_between_contexts() {
    init_tracing();
    let engine = Engine::new();
    let corrupt = Rc::new(Cell::new(false));

    let flag_a = corrupt.clone();
    let flag_b = corrupt.clone();
    engine
        .start(move |engine| {
            engine.create(move |engine| {
                let mut pattern = [0xAAu8; 512];
                for _ in 0..32 {
                    engine.yield_now();
                    if pattern.iter().any(|&b| b != 0xAA) {
                        flag_a.set(true);
                    }
                    pattern[0] = 0xAA;
                }
            });
            engine.create(move |engine| {
                let mut pattern = [0x55u8; 512];
                for _ in 0..32 {
                    engine.yield_now();
                    if pattern.iter().any(|&b| b != 0x55) {
                        flag_b.set(true);
                    }
                    pattern[0] = 0x55;
                }
            });
        })
        .unwrap();

    assert!(!corrupt.get(), "a context observed another context's bytes");
}

#[test]
fn targeted_sched_overrides_round_robin() {
    init_tracing();
    let engine = Engine::new();
    let order: Log = Rc::new(RefCell::new(Vec::new()));

    let outer = order.clone();
    engine
        .start(move |engine| {
            let sink_a = outer.clone();
            let a = engine.create(move |_| log(&sink_a, "a"));
            let sink_b = outer.clone();
            let _b = engine.create(move |_| log(&sink_b, "b"));
            // Round robin would pick b (created last, at the list head);
            // sched forces a.
            engine.sched(a);
            log(&outer, "main-back");
        })
        .unwrap();

    let seen = order.borrow();
    assert_eq!(seen[0], "a");
    assert!(seen.contains(&"b".to_string()));
}

#[test]
fn block_self_resumes_after_peer_unblocks() {
    init_tracing();
    let engine = Engine::new();
    let order: Log = Rc::new(RefCell::new(Vec::new()));

    let outer = order.clone();
    engine
        .start(move |engine| {
            let sink_a = outer.clone();
            let a = engine.create(move |engine| {
                log(&sink_a, "a:pre-block");
                engine.block(None);
                log(&sink_a, "a:resumed");
            });
            let sink_b = outer.clone();
            engine.create(move |engine| {
                let mut kicked = false;
                for _ in 0..8 {
                    if !kicked && engine.status(a) == Status::Blocked {
                        log(&sink_b, "b:unblocking");
                        engine.unblock(a);
                        kicked = true;
                    }
                    engine.yield_now();
                }
            });
        })
        .unwrap();

    let seen = order.borrow();
    let pre = seen.iter().position(|e| e == "a:pre-block").unwrap();
    let kick = seen.iter().position(|e| e == "b:unblocking").unwrap();
    let resumed = seen.iter().position(|e| e == "a:resumed").unwrap();
    assert!(pre < kick && kick < resumed, "{seen:?}");
}

#[test]
fn noop_edges() {
    init_tracing();
    let engine = Engine::new();
    let checks = Rc::new(RefCell::new(Vec::new()));

    let sink = checks.clone();
    engine
        .start(move |engine| {
            // Yield with no other alive context: control stays here.
            engine.yield_now();
            sink.borrow_mut().push("yield-alone-returned");

            // Switching to ourselves is a no-op.
            engine.sched(engine.current());
            sink.borrow_mut().push("sched-self-returned");

            // A context that finished leaves a stale handle behind.
            let ephemeral = engine.create(|_| {});
            engine.yield_now();
            if engine.status(ephemeral) == Status::Finished {
                sink.borrow_mut().push("ephemeral-finished");
            }
            engine.sched(ephemeral);
            engine.block(Some(ephemeral));
            engine.unblock(ephemeral);
            sink.borrow_mut().push("stale-ops-returned");

            // Unblocking something that is not blocked changes nothing.
            engine.unblock(engine.current());

            // Re-entrant start is rejected.
            if engine.start(|_| {}) == Err(strand::Error::AlreadyRunning) {
                sink.borrow_mut().push("nested-start-rejected");
            }
        })
        .unwrap();

    assert_eq!(
        *checks.borrow(),
        [
            "yield-alone-returned",
            "sched-self-returned",
            "ephemeral-finished",
            "stale-ops-returned",
            "nested-start-rejected",
        ]
    );
}

#[test]
fn engines_run_sequentially_and_restart() {
    init_tracing();
    let first = Engine::new();
    let count = Rc::new(Cell::new(0));

    let c1 = count.clone();
    first
        .start(move |engine| {
            let c = c1.clone();
            engine.create(move |_| c.set(c.get() + 1));
            engine.yield_now();
        })
        .unwrap();
    assert_eq!(count.get(), 1);

    // The same engine can be started again once drained.
    let c2 = count.clone();
    first.start(move |_| c2.set(c2.get() + 10)).unwrap();
    assert_eq!(count.get(), 11);

    // Independent engines do not share any state.
    let second = Engine::new();
    let c3 = count.clone();
    second.start(move |_| c3.set(c3.get() + 100)).unwrap();
    assert_eq!(count.get(), 111);
    assert_eq!(second.alive_count(), 0);
}

#[test]
fn many_contexts_deep_switch_sequences() {
    init_tracing();
    let engine = Engine::new();
    let total = Rc::new(Cell::new(0u64));

    let outer = total.clone();
    engine
        .start(move |engine| {
            for i in 0..32u64 {
                let acc = outer.clone();
                engine.create(move |engine| {
                    let mut local = i;
                    for _ in 0..16 {
                        engine.yield_now();
                        local = local.wrapping_add(i);
                    }
                    acc.set(acc.get() + local);
                });
            }
        })
        .unwrap();

    let expected: u64 = (0..32u64).map(|i| i + 16 * i).sum();
    assert_eq!(total.get(), expected);
}
