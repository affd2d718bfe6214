//! Behavioural tests for the reactor loop and lifecycle controller.

use std::cell::Cell;
use std::rc::Rc;

use rstest::rstest;
use serde_json::json;

use crate::answer::Answer;
use crate::module::ModuleError;
use crate::registry::ReadinessKind;
use crate::server::{Server, ServerError};
use crate::wait::{ReadySets, WaitSets};
use crate::watch_callback;

use super::support::{
    CONTROL_FD, FailingFactory, Harness, RecordingModule, SPEC_DIR, ScriptedFrame, WaitStep,
};

fn counter() -> (Rc<Cell<u32>>, crate::WatchCallback) {
    let count = Rc::new(Cell::new(0));
    let handle = Rc::clone(&count);
    (count, watch_callback(move || handle.set(handle.get() + 1)))
}

#[test]
fn initial_conditions() {
    let harness = Harness::new(Vec::new(), Vec::new());
    assert!(!harness.server.shutdown_flag().is_set());
}

#[test]
fn triggered_shutdown_skips_the_loop_entirely() {
    let mut harness = Harness::new(Vec::new(), Vec::new());
    harness.server.trigger_shutdown();
    harness.server.trigger_shutdown();
    harness.server.run_internal().expect("loop exits immediately");
    assert!(harness.requests.borrow().is_empty());
}

#[test]
fn run_opens_session_with_derived_spec_path() {
    let mut harness = Harness::new(vec![WaitStep::empty_then_shutdown()], Vec::new());
    assert_eq!(harness.server.run("test"), 0);

    let specs = harness.specs.borrow();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].module_name, "test");
    assert_eq!(specs[0].spec_path.as_str(), &format!("{SPEC_DIR}/test.spec"));

    assert_eq!(harness.server.module().setup_calls, 1);
    assert_eq!(harness.server.module().teardown_calls, 1);
    assert_eq!(harness.session.borrow().stop_calls, 1);
}

#[test]
fn shutdown_command_stops_the_loop_and_answers_success() {
    let mut harness = Harness::new(
        vec![WaitStep::ready(ReadySets {
            reads: vec![CONTROL_FD],
            ..ReadySets::default()
        })],
        vec![ScriptedFrame::command("shutdown", None)],
    );
    assert_eq!(harness.server.run("test"), 0);

    assert!(harness.server.shutdown_flag().is_set());
    let session = harness.session.borrow();
    assert_eq!(session.check_calls, vec![true]);
    assert_eq!(session.answers, vec![Answer::success()]);
    assert_eq!(session.stop_calls, 1);
    // The built-in never reaches the module's handler.
    assert!(harness.server.module().commands.is_empty());
}

#[test]
fn unknown_command_without_handler_answers_failure() {
    let mut harness = Harness::new(
        vec![
            WaitStep::ready(ReadySets {
                reads: vec![CONTROL_FD],
                ..ReadySets::default()
            }),
            WaitStep::empty_then_shutdown(),
        ],
        vec![ScriptedFrame::command("other command", None)],
    );
    assert_eq!(harness.server.run("test"), 0);

    let session = harness.session.borrow();
    assert_eq!(session.answers.len(), 1);
    assert_eq!(session.answers[0].status(), 1);
    assert_eq!(
        session.answers[0].payload(),
        Some(&json!("unknown command: other command"))
    );
}

#[test]
fn module_handler_answer_is_returned_verbatim() {
    let module = RecordingModule {
        command_answer: Some(Answer::success_with("counted")),
        ..RecordingModule::default()
    };
    let args = json!({"amount": 2});
    let mut harness = Harness::with_module(
        vec![
            WaitStep::ready(ReadySets {
                reads: vec![CONTROL_FD],
                ..ReadySets::default()
            }),
            WaitStep::empty_then_shutdown(),
        ],
        vec![ScriptedFrame::command("other command", Some(args.clone()))],
        module,
    );
    assert_eq!(harness.server.run("test"), 0);

    assert_eq!(
        harness.session.borrow().answers,
        vec![Answer::success_with("counted")]
    );
    assert_eq!(
        harness.server.module().commands,
        vec![("other command".to_string(), Some(args))]
    );
}

#[test]
fn config_update_reaches_the_module_and_is_acknowledged() {
    let config = json!({"cache_size": 64});
    let mut harness = Harness::new(
        vec![
            WaitStep::ready(ReadySets {
                reads: vec![CONTROL_FD],
                ..ReadySets::default()
            }),
            WaitStep::empty_then_shutdown(),
        ],
        vec![ScriptedFrame::Config(config.clone())],
    );
    assert_eq!(harness.server.run("test"), 0);

    assert_eq!(harness.server.module().configs, vec![config]);
    assert_eq!(harness.session.borrow().answers, vec![Answer::success()]);
}

#[test]
fn interrupted_wait_retries_with_an_identical_request() {
    let mut harness = Harness::new(
        vec![WaitStep::Interrupted, WaitStep::empty_then_shutdown()],
        Vec::new(),
    );
    harness.server.open_session("test").expect("open session");
    harness.server.run_internal().expect("loop exits cleanly");

    let requests = harness.requests.borrow();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
    assert_eq!(requests[0].reads, vec![CONTROL_FD]);
    // The interrupted iteration dispatches nothing.
    assert!(harness.session.borrow().check_calls.is_empty());
}

#[test]
fn wait_failure_propagates_and_leaves_the_session_undisposed() {
    let mut harness = Harness::new(vec![WaitStep::Fail], Vec::new());
    harness.server.open_session("test").expect("open session");

    let failure = harness
        .server
        .run_internal()
        .expect_err("wait failure propagates");
    assert!(matches!(failure, ServerError::Wait { .. }));
    assert_eq!(harness.requests.borrow().len(), 1);
    assert_eq!(harness.session.borrow().stop_calls, 0);
}

#[test]
fn interrupted_then_clean_run_stops_the_session_once() {
    let mut harness = Harness::new(
        vec![WaitStep::Interrupted, WaitStep::empty_then_shutdown()],
        Vec::new(),
    );
    assert_eq!(harness.server.run("test"), 0);

    let requests = harness.requests.borrow();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
    assert_eq!(harness.session.borrow().stop_calls, 1);
}

#[test]
fn watched_descriptors_dispatch_and_unregistered_ones_do_not() {
    let mut harness = Harness::new(
        vec![WaitStep::ready_then_shutdown(ReadySets {
            reads: vec![10, 20, 42, CONTROL_FD],
            writes: Vec::new(),
            errors: vec![30],
        })],
        Vec::new(),
    );

    let (reads, read_callback) = counter();
    let (writes, write_callback) = counter();
    let (errors, error_callback) = counter();
    harness
        .server
        .watch_fileno(10, Some(read_callback.clone()), None, None);
    harness
        .server
        .watch_fileno(20, Some(read_callback), Some(write_callback), None);
    harness.server.watch_fileno(30, None, None, Some(error_callback));

    assert_eq!(harness.server.run("test"), 0);

    // Descriptor 42 is excluded from the request: nothing is registered for
    // it, and the wait request is exactly the registered union plus the
    // control descriptor.
    assert_eq!(
        *harness.requests.borrow(),
        vec![WaitSets {
            reads: vec![10, 20, CONTROL_FD],
            writes: vec![20],
            errors: vec![30],
        }]
    );
    assert_eq!(reads.get(), 2);
    assert_eq!(writes.get(), 0);
    assert_eq!(errors.get(), 1);
}

#[rstest]
#[case(ReadinessKind::Readable)]
#[case(ReadinessKind::Writable)]
#[case(ReadinessKind::Errorable)]
fn unwatch_from_a_firing_callback_is_deferred_to_the_next_iteration(
    #[case] mode: ReadinessKind,
) {
    let everything_ready = ReadySets {
        reads: vec![10],
        writes: vec![10],
        errors: vec![10],
    };
    let mut harness = Harness::new(
        vec![
            WaitStep::ready(everything_ready.clone()),
            WaitStep::ready_then_shutdown(everything_ready),
        ],
        Vec::new(),
    );

    let registry = harness.server.registry();
    let slot_callback = |kind: ReadinessKind| {
        let count = Rc::new(Cell::new(0_u32));
        let handle = Rc::clone(&count);
        let registry = registry.clone();
        let callback = watch_callback(move || {
            handle.set(handle.get() + 1);
            if kind == mode {
                registry
                    .unwatch_fileno(
                        10,
                        kind == ReadinessKind::Readable,
                        kind == ReadinessKind::Writable,
                        kind == ReadinessKind::Errorable,
                    )
                    .expect("unwatch own slot");
            }
        });
        (count, callback)
    };

    let (reads, read_callback) = slot_callback(ReadinessKind::Readable);
    let (writes, write_callback) = slot_callback(ReadinessKind::Writable);
    let (errors, error_callback) = slot_callback(ReadinessKind::Errorable);
    harness
        .server
        .watch_fileno(10, Some(read_callback), Some(write_callback), Some(error_callback));

    harness.server.run_internal().expect("loop exits cleanly");

    // The unwatching slot fired once (first iteration only); the other two
    // slots fired in both iterations, undisturbed.
    for (kind, count) in [
        (ReadinessKind::Readable, reads.get()),
        (ReadinessKind::Writable, writes.get()),
        (ReadinessKind::Errorable, errors.get()),
    ] {
        let expected = if kind == mode { 1 } else { 2 };
        assert_eq!(count, expected, "{kind} callback count");
    }

    // The second request no longer includes the unwatched slot.
    let requests = harness.requests.borrow();
    let second = &requests[1];
    let slot_present = match mode {
        ReadinessKind::Readable => second.reads.contains(&10),
        ReadinessKind::Writable => second.writes.contains(&10),
        ReadinessKind::Errorable => second.errors.contains(&10),
    };
    assert!(!slot_present, "unwatched {mode} slot still requested");
}

#[rstest]
#[case(ModuleError::fatal("module cannot continue"))]
#[case(ModuleError::failed("setup hit a snag"))]
fn setup_failure_exits_with_status_one_and_skips_teardown(#[case] failure: ModuleError) {
    let module = RecordingModule {
        setup_failure: Some(failure),
        ..RecordingModule::default()
    };
    let mut harness = Harness::with_module(Vec::new(), Vec::new(), module);
    assert_eq!(harness.server.run("test"), 1);

    assert_eq!(harness.server.module().setup_calls, 1);
    assert_eq!(harness.server.module().teardown_calls, 0);
    assert_eq!(harness.session.borrow().stop_calls, 0);
}

#[test]
fn loop_failure_exits_with_status_one_and_skips_teardown() {
    let mut harness = Harness::new(vec![WaitStep::Fail], Vec::new());
    assert_eq!(harness.server.run("test"), 1);

    assert_eq!(harness.server.module().teardown_calls, 0);
    assert_eq!(harness.session.borrow().stop_calls, 0);
}

#[test]
fn session_open_failure_exits_with_status_one_before_setup() {
    let config = spindle_config::Config::default();
    let mut server =
        Server::new(config, RecordingModule::default()).with_session_factory(FailingFactory);
    assert_eq!(server.run("test"), 1);
    assert_eq!(server.module().setup_calls, 0);
}
