//! Tests touching the process-wide interpreter.

mod common;

use common::builders::VolumeBuilder;
use serial_test::serial;
use std::sync::Arc;
use tomo_operators::config::InterpreterLimits;
use tomo_operators::{Interpreter, Operator};

#[test]
#[serial]
fn test_operators_share_one_interpreter() {
    let first = Interpreter::init_global(&InterpreterLimits::default());
    let second = Interpreter::global();
    assert!(Arc::ptr_eq(&first, &second));

    let mut a = Operator::new("A");
    let mut b = Operator::new("B");
    a.set_script("fn transform_scalars(d) { d.scale(2.0); }").unwrap();
    b.set_script("fn transform_scalars(d) { d.offset(1.0); }").unwrap();

    let input = VolumeBuilder::new([1, 1, 1]).values(vec![3.0]).build();
    let workers: Vec<_> = [a.transformer(), b.transformer()]
        .into_iter()
        .map(|t| {
            let input = input.clone();
            std::thread::spawn(move || t.apply_transform(&input).is_success())
        })
        .collect();
    for w in workers {
        assert!(w.join().unwrap());
    }

    // either order gives one of these; never a torn value
    let value = input.read().as_image().unwrap().scalars()[0];
    assert!(value == 7.0 || value == 8.0, "unexpected {}", value);
}

#[test]
#[serial]
fn test_later_limits_are_ignored() {
    let first = Interpreter::global();
    let changed = InterpreterLimits {
        max_call_levels: 3,
        ..InterpreterLimits::default()
    };
    let again = Interpreter::init_global(&changed);
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(again.limits().max_call_levels, first.limits().max_call_levels);
}
