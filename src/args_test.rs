use super::*;
use serde_json::json;

#[test]
fn accessors_read_typed_values() {
    let args = Args::from(vec![json!("hi"), json!(5), json!(2.5)]);
    assert_eq!(args.len(), 3);
    assert_eq!(args.str(0), Some("hi"));
    assert_eq!(args.i64(1), Some(5));
    assert_eq!(args.f64(2), Some(2.5));
    assert!(args.value(3).is_none());
    assert!(args.callback(0).is_none());
}

#[test]
fn values_render_callbacks_as_null() {
    let proxy = RemoteCallback::new(1, "sum", 1, Weak::new());
    let args = Args::new(vec![Arg::Value(json!(1)), Arg::Callback(proxy)]);
    assert_eq!(args.values(), vec![json!(1), Value::Null]);
    assert_eq!(args.callback(1).map(RemoteCallback::index), Some(1));
    assert!(args.value(1).is_none());
}

#[test]
fn proxy_without_connection_reports_not_sent() {
    let proxy = RemoteCallback::new(3, "sum", 2, Weak::new());
    assert!(!proxy.call([Payload::value(5)]));
}

#[test]
fn callback_completes_once_with_result() {
    let (tx, rx) = std::sync::mpsc::channel();
    let cb = Callback::new(move |result| {
        tx.send(result.map(|args| args.values())).expect("receiver alive");
    });
    cb.complete(Ok(Args::from(vec![json!(5)])));
    assert_eq!(rx.recv().expect("result"), Ok(vec![json!(5)]));
}
