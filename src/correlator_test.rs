use super::*;
use serde_json::json;
use std::sync::mpsc;

type Outcome = Result<Vec<serde_json::Value>, CallbackError>;

fn outcome_slot() -> (Callback, mpsc::Receiver<Outcome>) {
    let (tx, rx) = mpsc::channel();
    let cb = Callback::new(move |result: Result<Args, CallbackError>| {
        tx.send(result.map(|args| args.values())).expect("outcome receiver alive");
    });
    (cb, rx)
}

fn correlator() -> CallbackCorrelator {
    CallbackCorrelator::new(Duration::from_secs(30), 4)
}

#[test]
fn register_assigns_increasing_ids() {
    let mut c = correlator();
    let (a, _ra) = outcome_slot();
    let (b, _rb) = outcome_slot();
    let id_a = c.register("sum", 2, a).expect("register");
    let id_b = c.register("sum", 2, b).expect("register");
    assert!(id_b > id_a);
    assert_eq!(c.len(), 2);
}

#[test]
fn resolve_returns_entry_exactly_once() {
    let mut c = correlator();
    let (cb, rx) = outcome_slot();
    let id = c.register("sum", 2, cb).expect("register");

    let pending = c.resolve(id).expect("first resolve finds entry");
    assert_eq!(pending.event(), "sum");
    assert_eq!(pending.index(), 2);
    pending.complete(Ok(Args::from(vec![json!(5)])));

    assert!(c.resolve(id).is_none());
    assert!(c.is_empty());
    assert_eq!(rx.recv().expect("outcome"), Ok(vec![json!(5)]));
    assert!(rx.try_recv().is_err());
}

#[test]
fn resolve_unknown_id_is_none() {
    let mut c = correlator();
    assert!(c.resolve(99).is_none());
}

#[test]
fn register_refuses_when_full() {
    let mut c = CallbackCorrelator::new(Duration::from_secs(30), 1);
    let (a, _ra) = outcome_slot();
    c.register("e", 0, a).expect("first fits");

    let (b, rb) = outcome_slot();
    let Err((cb, err)) = c.register("e", 0, b) else {
        panic!("second registration should be refused");
    };
    assert_eq!(err, CallbackError::TooManyPending { max: 1 });

    cb.complete(Err(err.clone()));
    assert_eq!(rb.recv().expect("outcome"), Err(err));
    assert_eq!(c.len(), 1);
}

#[test]
fn expire_evicts_only_stale_entries() {
    let mut c = CallbackCorrelator::new(Duration::from_secs(10), 8);
    let start = Instant::now();
    let (old, r_old) = outcome_slot();
    let (fresh, r_fresh) = outcome_slot();
    let old_id = c.register_at("e", 0, old, start).expect("register");
    let fresh_id = c.register_at("e", 1, fresh, start + Duration::from_secs(8)).expect("register");

    let expired = c.expire_at(start + Duration::from_secs(10));
    assert_eq!(expired.len(), 1);
    for p in expired {
        p.complete(Err(CallbackError::TimedOut { timeout_ms: 10_000 }));
    }

    assert!(c.resolve(old_id).is_none());
    assert!(c.resolve(fresh_id).is_some());
    assert_eq!(
        r_old.recv().expect("outcome"),
        Err(CallbackError::TimedOut { timeout_ms: 10_000 })
    );
    assert!(r_fresh.try_recv().is_err());
}

#[test]
fn drain_empties_table_in_registration_order() {
    let mut c = correlator();
    let start = Instant::now();
    let (a, _ra) = outcome_slot();
    let (b, _rb) = outcome_slot();
    c.register_at("second", 0, b, start + Duration::from_millis(5)).expect("register");
    c.register_at("first", 0, a, start).expect("register");

    let drained = c.drain();
    let events: Vec<&str> = drained.iter().map(PendingCallback::event).collect();
    assert_eq!(events, vec!["first", "second"]);
    assert!(c.is_empty());
}

#[test]
fn panicking_callback_is_contained() {
    let mut c = correlator();
    let id = c
        .register("e", 0, Callback::new(|_| panic!("callback failed")))
        .expect("register");
    let pending = c.resolve(id).expect("entry");
    pending.complete(Ok(Args::default()));
}
