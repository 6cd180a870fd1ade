//! Integration tests for the reactive graph
//!
//! Exercises fields, calcs, subscriptions and deferred flushing together.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use xcell_reactive::{batch, flush, has_pending, untracked, Calc, Dyn, Field, ReactiveError};

// ────────────────────────────────────────────────────────────────────────────
// Derivation
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_diamond_recomputes_once_per_read() {
    let root = Field::new(1);
    let left = {
        let root = root.clone();
        Calc::new(move || root.get() + 1)
    };
    let right = {
        let root = root.clone();
        Calc::new(move || root.get() * 2)
    };
    let runs = Rc::new(Cell::new(0));
    let sum = {
        let (left, right, runs) = (left.clone(), right.clone(), Rc::clone(&runs));
        Calc::new(move || {
            runs.set(runs.get() + 1);
            left.get().unwrap() + right.get().unwrap()
        })
    };

    assert_eq!(sum.get().unwrap(), 4);
    root.set(10);
    assert_eq!(sum.get().unwrap(), 31);
    assert_eq!(sum.get().unwrap(), 31);
    assert_eq!(runs.get(), 2);
}

#[test]
fn test_untracked_reads_do_not_create_dependencies() {
    let tracked = Field::new(1);
    let ignored = Field::new(100);
    let calc = {
        let (tracked, ignored) = (tracked.clone(), ignored.clone());
        Calc::new(move || tracked.get() + untracked(|| ignored.get()))
    };
    assert_eq!(calc.get().unwrap(), 101);
    ignored.set(200);
    assert!(!calc.is_dirty());
    assert_eq!(calc.get().unwrap(), 101);
    tracked.set(2);
    assert_eq!(calc.get().unwrap(), 202);
}

#[test]
fn test_previous_value_dropped_on_recompute() {
    struct Probe(Rc<Cell<usize>>);
    impl Drop for Probe {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    let drops = Rc::new(Cell::new(0));
    let source = Field::new(0);
    let calc = {
        let (source, drops) = (source.clone(), Rc::clone(&drops));
        Calc::new(move || {
            source.get();
            Rc::new(Probe(Rc::clone(&drops)))
        })
    };
    let _ = calc.get().unwrap();
    source.set(1);
    let _ = calc.get().unwrap();
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_mutual_cycle_reports_and_recovers() {
    let linked = Field::new(false);
    let second: Rc<RefCell<Option<Calc<Result<i32, ReactiveError>>>>> = Rc::new(RefCell::new(None));
    let first = {
        let (linked, second) = (linked.clone(), Rc::clone(&second));
        Calc::new(move || -> Result<i32, ReactiveError> {
            if !linked.get() {
                return Ok(10);
            }
            let other = second.borrow().clone();
            match other {
                Some(other) => other.get()?.map(|v| v + 1),
                None => Ok(0),
            }
        })
    };
    let doubled = {
        let first = first.clone();
        Calc::new(move || -> Result<i32, ReactiveError> { first.get()?.map(|v| v * 2) })
    };
    *second.borrow_mut() = Some(doubled.clone());
    assert_eq!(doubled.get().unwrap(), Ok(20));

    linked.set(true);
    assert!(matches!(doubled.get().unwrap(), Err(ReactiveError::Cycle(_))));
    assert!(matches!(first.get().unwrap(), Err(ReactiveError::Cycle(_))));

    // Breaking the loop re-runs both sides.
    linked.set(false);
    assert_eq!(doubled.get().unwrap(), Ok(20));
    assert_eq!(first.get().unwrap(), Ok(10));
}

// ────────────────────────────────────────────────────────────────────────────
// Subscriptions and flushing
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_field_subscribers_run_on_flush_in_order() {
    let field = Field::new(0);
    let log = Rc::new(RefCell::new(Vec::new()));
    let _first = {
        let log = Rc::clone(&log);
        field.subscribe(move || log.borrow_mut().push("first"))
    };
    let _second = {
        let log = Rc::clone(&log);
        field.subscribe(move || log.borrow_mut().push("second"))
    };

    field.set(1);
    field.set(2);
    assert!(log.borrow().is_empty());
    assert!(has_pending());

    flush();
    assert_eq!(*log.borrow(), vec!["first", "second"]);
    assert!(!has_pending());
}

#[test]
fn test_dropping_subscription_unsubscribes() {
    let field = Field::new(0);
    let hits = Rc::new(Cell::new(0));
    let sub = {
        let hits = Rc::clone(&hits);
        field.subscribe(move || hits.set(hits.get() + 1))
    };
    field.set(1);
    flush();
    drop(sub);
    field.set(2);
    flush();
    assert_eq!(hits.get(), 1);
}

#[test]
fn test_calc_subscriber_sees_fresh_value() {
    let source = Field::new(2);
    let doubled = {
        let source = source.clone();
        Calc::new(move || source.get() * 2)
    };
    let seen = Rc::new(Cell::new(0));
    let _sub = {
        let (doubled_reader, seen) = (doubled.clone(), Rc::clone(&seen));
        doubled.subscribe(move || seen.set(doubled_reader.get().unwrap()))
    };

    source.set(5);
    flush();
    assert_eq!(seen.get(), 10);

    source.set(6);
    flush();
    assert_eq!(seen.get(), 12);
}

#[test]
fn test_subscriber_writes_settle_in_one_flush() {
    let input = Field::new(1);
    let mirror = Field::new(0);
    let _sub = {
        let (input_reader, mirror) = (input.clone(), mirror.clone());
        input.subscribe(move || mirror.set(input_reader.get_untracked() * 3))
    };
    let mirrored = Rc::new(Cell::new(0));
    let _mirror_sub = {
        let (mirror_reader, mirrored) = (mirror.clone(), Rc::clone(&mirrored));
        mirror.subscribe(move || mirrored.set(mirror_reader.get_untracked()))
    };

    input.set(7);
    flush();
    assert_eq!(mirrored.get(), 21);
}

#[test]
fn test_batch_defers_until_outermost_exit() {
    let field = Field::new(0);
    let hits = Rc::new(Cell::new(0));
    let _sub = {
        let hits = Rc::clone(&hits);
        field.subscribe(move || hits.set(hits.get() + 1))
    };

    batch(|| {
        field.set(1);
        batch(|| field.set(2));
        assert_eq!(hits.get(), 0);
        field.set(3);
    });
    assert_eq!(hits.get(), 1);
    assert_eq!(field.get(), 3);
}

// ────────────────────────────────────────────────────────────────────────────
// Dyn
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_dyn_reads_each_variant() {
    let field = Field::new(Some("x".to_string()));
    let constant: Dyn<Option<String>> = "y".into();
    let reactive: Dyn<Option<String>> = field.clone().into();
    let derived: Dyn<Option<String>> = {
        let field = field.clone();
        Calc::new(move || field.get().map(|s| s.to_uppercase())).into()
    };

    assert_eq!(constant.get().unwrap().as_deref(), Some("y"));
    assert_eq!(reactive.get().unwrap().as_deref(), Some("x"));
    assert_eq!(derived.get().unwrap().as_deref(), Some("X"));
    assert!(!constant.is_reactive());

    field.set(None);
    assert_eq!(derived.get().unwrap(), None);
}

#[test]
fn test_dyn_constant_subscription_never_fires() {
    let constant: Dyn<Option<String>> = "fixed".into();
    let hits = Rc::new(Cell::new(0));
    let _sub = {
        let hits = Rc::clone(&hits);
        constant.subscribe(move || hits.set(hits.get() + 1))
    };
    flush();
    assert_eq!(hits.get(), 0);
}
