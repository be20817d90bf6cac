//! Change notification tests through `Results`
//!
//! 1. **Initial load** - one empty notification, then empty changes suppressed
//! 2. **Weak observers** - dropped observers are pruned, never called
//! 3. **Reentrancy** - listeners may unsubscribe or clear during dispatch
//! 4. **Change sets** - index lists and ranges read through the engine

mod common;

use common::TestEnv;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tether::{ChangeDescriptor, ChangeSet, ChangeSetState, Range, Results, ResultsListener};

/// Observer recording every change set it receives
#[derive(Default)]
struct Screen {
    states: RefCell<Vec<ChangeSetState>>,
    insertions: RefCell<Vec<Vec<usize>>>,
    calls: Cell<usize>,
}

fn recording() -> ResultsListener {
    ResultsListener::typed(|screen: &Screen, changes: &ChangeSet| {
        screen.calls.set(screen.calls.get() + 1);
        screen.states.borrow_mut().push(changes.state());
        screen
            .insertions
            .borrow_mut()
            .push(changes.insertions().to_vec());
    })
}

fn results(env: &TestEnv) -> Results {
    env.session.table("items").unwrap().all().unwrap()
}

// ============================================================================
// SECTION 1: Initial Load
// ============================================================================

#[test]
fn test_initial_empty_notification_then_suppression() {
    let env = TestEnv::new();
    let results = results(&env);
    let screen = Rc::new(Screen::default());
    results.subscribe(&screen, recording());

    results.notify_change(ChangeDescriptor::EMPTY);
    results.notify_change(ChangeDescriptor::EMPTY);
    let nothing = env.engine.record_change(&[], &[], &[]);
    results.notify_change(nothing);

    assert_eq!(screen.calls.get(), 1);
    assert_eq!(*screen.states.borrow(), vec![ChangeSetState::Initial]);
    assert!(results.is_loaded());
}

#[test]
fn test_real_change_after_load_is_delivered_as_update() {
    let env = TestEnv::new();
    let results = results(&env);
    let screen = Rc::new(Screen::default());
    results.subscribe(&screen, recording());

    results.load().unwrap();
    let change = env.engine.record_change(&[], &[0, 1], &[]);
    results.notify_change(change);

    assert_eq!(
        *screen.states.borrow(),
        vec![ChangeSetState::Initial, ChangeSetState::Update]
    );
    assert_eq!(*screen.insertions.borrow(), vec![vec![], vec![0, 1]]);
}

#[test]
fn test_snapshot_starts_loaded() {
    let env = TestEnv::new();
    let snapshot = results(&env).snapshot().unwrap();
    let screen = Rc::new(Screen::default());
    snapshot.subscribe(&screen, recording());

    snapshot.load().unwrap();
    snapshot.notify_change(ChangeDescriptor::EMPTY);
    assert_eq!(screen.calls.get(), 0);
}

// ============================================================================
// SECTION 2: Weak Observers
// ============================================================================

#[test]
fn test_dropped_observer_is_never_called() {
    let env = TestEnv::new();
    let results = results(&env);
    let kept = Rc::new(Screen::default());
    let dropped = Rc::new(Screen::default());
    let dropped_calls = Rc::new(Cell::new(0));

    let counter = Rc::clone(&dropped_calls);
    results.subscribe(
        &dropped,
        ResultsListener::typed(move |_: &Screen, _: &ChangeSet| counter.set(counter.get() + 1)),
    );
    results.subscribe(&kept, recording());
    assert_eq!(results.listener_count(), 2);

    drop(dropped);
    results.load().unwrap();

    assert_eq!(dropped_calls.get(), 0);
    assert_eq!(kept.calls.get(), 1);
    assert_eq!(results.listener_count(), 1);
}

#[test]
fn test_subscribe_is_idempotent_per_listener() {
    let env = TestEnv::new();
    let results = results(&env);
    let screen = Rc::new(Screen::default());
    let listener = recording();

    assert!(results.subscribe(&screen, listener.clone()));
    assert!(!results.subscribe(&screen, listener.clone()));
    results.load().unwrap();
    assert_eq!(screen.calls.get(), 1);

    assert!(results.unsubscribe(&screen, &listener));
    assert!(!results.unsubscribe(&screen, &listener));
}

// ============================================================================
// SECTION 3: Reentrancy
// ============================================================================

#[test]
fn test_clear_during_dispatch_stops_the_pass() {
    let env = TestEnv::new();
    let results = results(&env);
    let screens: Vec<Rc<Screen>> = (0..3).map(|_| Rc::new(Screen::default())).collect();

    let target = results.clone();
    results.subscribe(
        &screens[0],
        ResultsListener::typed(move |screen: &Screen, _: &ChangeSet| {
            screen.calls.set(screen.calls.get() + 1);
            target.unsubscribe_all();
        }),
    );
    results.subscribe(&screens[1], recording());
    results.subscribe(&screens[2], recording());

    results.load().unwrap();

    assert_eq!(screens[0].calls.get(), 1);
    assert_eq!(screens[1].calls.get(), 0);
    assert_eq!(screens[2].calls.get(), 0);
    assert_eq!(results.listener_count(), 0);
}

#[test]
fn test_unsubscribe_other_during_dispatch_skips_it() {
    let env = TestEnv::new();
    let results = results(&env);
    let first = Rc::new(Screen::default());
    let second = Rc::new(Screen::default());

    let target = results.clone();
    let victim = Rc::clone(&second);
    results.subscribe(
        &first,
        ResultsListener::typed(move |screen: &Screen, _: &ChangeSet| {
            screen.calls.set(screen.calls.get() + 1);
            target.unsubscribe_observer(&victim);
        }),
    );
    results.subscribe(&second, recording());

    results.load().unwrap();
    assert_eq!(first.calls.get(), 1);
    assert_eq!(second.calls.get(), 0);

    // The listener holds a clone of `results`
    results.unsubscribe_all();
}

#[test]
fn test_subscribe_during_dispatch_waits_for_next_pass() {
    let env = TestEnv::new();
    let results = results(&env);
    let first = Rc::new(Screen::default());
    let late = Rc::new(Screen::default());

    let target = results.clone();
    let late_observer = Rc::clone(&late);
    results.subscribe(
        &first,
        ResultsListener::typed(move |_: &Screen, _: &ChangeSet| {
            target.subscribe(&late_observer, recording());
        }),
    );

    results.load().unwrap();
    assert_eq!(late.calls.get(), 0);

    let change = env.engine.record_change(&[0], &[], &[]);
    results.notify_change(change);
    assert_eq!(late.calls.get(), 1);

    // The listener holds a clone of `results`
    results.unsubscribe_all();
}

// ============================================================================
// SECTION 4: Change Sets
// ============================================================================

#[test]
fn test_ranges_and_lazy_reads() {
    let env = TestEnv::new();
    let results = results(&env);
    results.load().unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let screen = Rc::new(Screen::default());

    let sink = Rc::clone(&seen);
    results.subscribe(
        &screen,
        ResultsListener::typed(move |_: &Screen, changes: &ChangeSet| {
            sink.borrow_mut().push((
                changes.deletion_ranges().to_vec(),
                changes.modification_ranges().to_vec(),
            ));
        }),
    );

    let change = env.engine.record_change(&[7, 2, 3, 4], &[], &[9]);
    let reads_before = env.engine.descriptor_reads();
    results.notify_change(change);

    assert_eq!(
        *seen.borrow(),
        vec![(
            vec![Range { start: 2, length: 3 }, Range { start: 7, length: 1 }],
            vec![Range { start: 9, length: 1 }],
        )]
    );
    // Deletions read once for the emptiness check and reused by the
    // listener; insertions never read
    assert_eq!(env.engine.descriptor_reads() - reads_before, 2);
}
