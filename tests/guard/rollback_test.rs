/*!
 * Rollback Tests
 * Undo ordering and failure reporting across guard types
 */

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use velen::core::guard::*;

fn step(log: &Arc<Mutex<Vec<String>>>, name: &str) -> ScopedGuard {
    let log = log.clone();
    let label = name.to_string();
    ScopedGuard::new("step", name, move || {
        log.lock().push(label.clone());
        Ok(())
    })
}

fn failing(name: &str) -> ScopedGuard {
    ScopedGuard::new("mount", name, || Err("Device or resource busy".to_string()))
}

#[test]
fn test_guards_are_send() {
    fn assert_send<T: Send>() {}
    assert_send::<ScopedGuard>();
    assert_send::<CompositeGuard>();
    assert_send::<TransactionGuard>();
}

#[test]
fn test_rollback_continues_past_failed_step() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut tx = TransactionGuard::begin("prepare");
    tx.push(step(&log, "root"));
    tx.push(failing("top"));
    tx.push(step(&log, "overlay"));

    let err = tx.rollback().unwrap_err();
    assert_eq!(
        err,
        GuardError::ReleaseFailed {
            resource: "mount top".to_string(),
            reason: "Device or resource busy".to_string(),
        }
    );
    assert_eq!(*log.lock(), vec!["overlay".to_string(), "root".to_string()]);
}

#[test]
fn test_nested_transaction_rolls_back_as_one_step() {
    let log = Arc::new(Mutex::new(Vec::new()));
    {
        let mut outer = TransactionGuard::begin("outer");
        outer.push(step(&log, "first"));

        let mut inner = TransactionGuard::begin("binds");
        inner.push(step(&log, "bind-a"));
        inner.push(step(&log, "bind-b"));
        outer.push(inner);

        outer.push(step(&log, "last"));
    }
    assert_eq!(
        *log.lock(),
        vec!["last", "bind-b", "bind-a", "first"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
    );
}

#[test]
fn test_committed_transaction_cannot_roll_back() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut tx = TransactionGuard::begin("prepare");
    tx.push(step(&log, "mount"));
    assert_eq!(tx.step_labels(), vec!["mount".to_string()]);
    assert_eq!(tx.state(), TransactionState::Active);

    tx.commit().unwrap();
    assert!(log.lock().is_empty());
}

#[test]
fn test_composite_release_all_collects_errors() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut composite = CompositeGuard::new()
        .add(step(&log, "a"))
        .add(failing("b"))
        .add(failing("c"));

    let errors = composite.release_all();
    assert_eq!(errors.len(), 2);
    assert_eq!(*log.lock(), vec!["a".to_string()]);
    assert!(!composite.is_active());
}
