//! Concurrent sessions must never see each other's diagnostics.

mod common;

use common::{ScriptedEngine, ScriptedEvent};
use rule_session::{Session, SessionConfig, Severity, Source};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const ROUNDS: usize = 25;

#[test]
#[cfg(feature = "builtin-engine")]
fn test_builtin_sessions_do_not_cross_talk() {
    let barrier = Arc::new(Barrier::new(2));

    let failing = {
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..ROUNDS {
                let mut session = Session::new().unwrap();
                let text = "rule a {\n  condition:\n    missing_a\n}";
                assert_eq!(session.add_source(Source::named(text, "a.rule"), "").unwrap(), 1);

                let diagnostics = session.diagnostics();
                assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
                assert_eq!(diagnostics[0].severity, Severity::Error);
                assert_eq!(diagnostics[0].source_name, "a.rule");
                assert_eq!(diagnostics[0].line, Some(3));
                assert!(session.materialize().is_err());
            }
        })
    };

    let warning = {
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..ROUNDS {
                let mut session = Session::new().unwrap();
                let text = "rule b {\n\n\n  strings:\n\n\n    $s = \"q\"\n  condition:\n    $s\n}";
                assert_eq!(session.add_source(Source::named(text, "b.rule"), "").unwrap(), 0);

                let diagnostics = session.diagnostics();
                assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
                assert_eq!(diagnostics[0].severity, Severity::Warning);
                assert_eq!(diagnostics[0].source_name, "b.rule");
                assert_eq!(diagnostics[0].line, Some(7));
                assert_eq!(session.materialize().unwrap().rule_count(), 1);
            }
        })
    };

    failing.join().unwrap();
    warning.join().unwrap();
}

#[test]
fn test_slow_engines_do_not_cross_talk() {
    // Events are spaced out so an unguarded relay would interleave them.
    let spawn = |name: &'static str, event: fn(&str, u32, &str) -> ScriptedEvent| {
        thread::spawn(move || {
            let engine = Arc::new(ScriptedEngine::new());
            engine.repeat(vec![event(name, 1, "one"), event(name, 2, "two")]);
            engine.delay_events(Duration::from_millis(2));

            let mut session = Session::with_engine(engine, SessionConfig::default()).unwrap();
            for _ in 0..ROUNDS {
                session.add_source("...", "").unwrap();
            }
            session.diagnostics()
        })
    };

    let errors = spawn("a.rule", ScriptedEvent::error);
    let warnings = spawn("b.rule", ScriptedEvent::warning);

    let errors = errors.join().unwrap();
    let warnings = warnings.join().unwrap();

    assert_eq!(errors.len(), 2 * ROUNDS);
    assert!(errors
        .iter()
        .all(|d| d.source_name == "a.rule" && d.is_error()));
    assert_eq!(warnings.len(), 2 * ROUNDS);
    assert!(warnings
        .iter()
        .all(|d| d.source_name == "b.rule" && d.is_warning()));

    // Per session, events keep their emission order.
    let lines: Vec<_> = errors.iter().take(4).map(|d| d.line).collect();
    assert_eq!(lines, vec![Some(1), Some(2), Some(1), Some(2)]);
}

#[test]
fn test_registration_waits_for_add_source() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.repeat(vec![
        ScriptedEvent::error("a.rule", 3, "one"),
        ScriptedEvent::error("a.rule", 4, "two"),
    ]);
    engine.delay_events(Duration::from_millis(1));
    let barrier = Arc::new(Barrier::new(2));

    let adding = {
        let engine = engine.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            let mut session = Session::with_engine(engine, SessionConfig::default()).unwrap();
            barrier.wait();
            for _ in 0..ROUNDS {
                session.add_source("...", "").unwrap();
            }
            session.errors().len()
        })
    };

    let opening = {
        let engine = engine.clone();
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..ROUNDS * 4 {
                Session::with_engine(engine.clone(), SessionConfig::default()).unwrap();
            }
        })
    };

    assert_eq!(adding.join().unwrap(), 2 * ROUNDS);
    opening.join().unwrap();

    assert!(!engine.sink_replaced_while_adding());
    assert_eq!(engine.call_count("set_diagnostic_sink"), 1 + ROUNDS * 4);
}

#[test]
#[cfg(feature = "builtin-engine")]
fn test_sessions_on_separate_threads_share_engine() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            thread::spawn(move || {
                let mut session = Session::new().unwrap();
                session.define_variable("worker", i as i64).unwrap();
                let text = format!("rule w{i} {{ condition: worker == {i} }}");
                session.add_source(&text, "workers").unwrap();
                session.materialize().unwrap()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let ruleset = handle.join().unwrap();
        assert!(ruleset.get("workers", &format!("w{i}")).is_some());
    }
}
