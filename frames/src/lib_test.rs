use super::*;
use serde_json::json;

fn sample_frame() -> Frame {
    Frame::new(
        "sum",
        vec![
            WireArg::Value(json!(2)),
            WireArg::Value(json!({"nested": [1, "two", null], "ok": true})),
            WireArg::Callback(7),
        ],
    )
}

#[test]
fn encode_decode_round_trip_preserves_frame() {
    let frame = sample_frame();
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode should succeed");
    assert_eq!(decoded, frame);
}

#[test]
fn encode_writes_null_placeholder_and_callback_slot() {
    let text = encode_frame(&sample_frame());
    let json: Value = serde_json::from_str(&text).expect("valid json");

    assert_eq!(json["event"], "sum");
    assert_eq!(json["args"][2], Value::Null);
    assert_eq!(json["callbacks"], json!([{"index": 2, "id": 7}]));
    assert!(json.get("reply_to").is_none());
}

#[test]
fn encode_omits_empty_callbacks() {
    let frame = Frame::new("greet", vec![json!("hi").into()]);
    let json: Value = serde_json::from_str(&encode_frame(&frame)).expect("valid json");
    assert_eq!(json, json!({"event": "greet", "args": ["hi"]}));
}

#[test]
fn reply_frame_round_trips_reply_to() {
    let frame = Frame::reply(7, correlation_event_name("sum", 2), vec![json!(5).into()]);
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");

    assert!(decoded.is_reply());
    assert_eq!(decoded.reply_to, Some(7));
    assert_eq!(decoded.event, "__sum:callback_2");
    assert_eq!(decoded.args, vec![WireArg::Value(json!(5))]);
}

#[test]
fn sentinel_string_is_plain_data() {
    let decoded = decode_frame(r#"{"event":"x","args":["__function(){}__"]}"#).expect("decode");
    assert_eq!(decoded.args, vec![WireArg::Value(json!("__function(){}__"))]);
    assert_eq!(decoded.callback_slots().count(), 0);
}

#[test]
fn missing_args_decode_as_empty() {
    let decoded = decode_frame(r#"{"event":"ping"}"#).expect("decode");
    assert_eq!(decoded.event, "ping");
    assert!(decoded.args.is_empty());
    assert!(decoded.reply_to.is_none());
}

#[test]
fn unknown_fields_are_ignored() {
    let decoded = decode_frame(r#"{"event":"ping","args":[],"extra":1}"#).expect("decode");
    assert_eq!(decoded.event, "ping");
}

#[test]
fn decode_rejects_invalid_json() {
    let err = decode_frame("{not json").expect_err("should fail");
    assert!(matches!(err, CodecError::Json(_)));
}

#[test]
fn decode_rejects_non_object() {
    let err = decode_frame("[1,2,3]").expect_err("should fail");
    assert!(matches!(err, CodecError::NotAnObject));

    let err = decode_frame("null").expect_err("should fail");
    assert!(matches!(err, CodecError::NotAnObject));
}

#[test]
fn decode_rejects_missing_event() {
    let err = decode_frame(r#"{"args":[1]}"#).expect_err("should fail");
    assert!(matches!(err, CodecError::MissingEvent));
}

#[test]
fn decode_rejects_non_string_event() {
    let err = decode_frame(r#"{"event":42}"#).expect_err("should fail");
    assert!(matches!(err, CodecError::InvalidField("event")));
}

#[test]
fn decode_rejects_non_array_args() {
    let err = decode_frame(r#"{"event":"x","args":{"a":1}}"#).expect_err("should fail");
    assert!(matches!(err, CodecError::InvalidField("args")));
}

#[test]
fn decode_rejects_malformed_callbacks() {
    let err = decode_frame(r#"{"event":"x","args":[null],"callbacks":[{"index":"0"}]}"#)
        .expect_err("should fail");
    assert!(matches!(err, CodecError::InvalidField("callbacks")));
}

#[test]
fn decode_rejects_negative_reply_to() {
    let err = decode_frame(r#"{"event":"x","reply_to":-1}"#).expect_err("should fail");
    assert!(matches!(err, CodecError::InvalidField("reply_to")));
}

#[test]
fn decode_rejects_out_of_range_callback_slot() {
    let err = decode_frame(r#"{"event":"x","args":[1],"callbacks":[{"index":3,"id":1}]}"#)
        .expect_err("should fail");
    assert!(matches!(err, CodecError::CallbackOutOfRange { index: 3, len: 1 }));
}

#[test]
fn decode_rejects_duplicate_callback_slot() {
    let err = decode_frame(
        r#"{"event":"x","args":[null],"callbacks":[{"index":0,"id":1},{"index":0,"id":2}]}"#,
    )
    .expect_err("should fail");
    assert!(matches!(err, CodecError::DuplicateCallback(0)));
}

#[test]
fn callback_slots_are_listed_in_argument_order() {
    let frame = Frame::new(
        "multi",
        vec![WireArg::Callback(4), json!(1).into(), WireArg::Callback(9)],
    );
    let slots: Vec<_> = frame.callback_slots().collect();
    assert_eq!(slots, vec![(0, 4), (2, 9)]);
}

#[test]
fn correlation_event_name_format() {
    assert_eq!(correlation_event_name("greet", 0), "__greet:callback_0");
}
