use super::*;

#[test]
fn rejects_empty_name() {
    assert_eq!(EventName::new(""), Err(EventNameError::Empty));
}

#[test]
fn rejects_oversized_name() {
    let long = "x".repeat(MAX_EVENT_NAME_LEN + 1);
    assert_eq!(
        EventName::new(long),
        Err(EventNameError::TooLong { max: MAX_EVENT_NAME_LEN, actual: MAX_EVENT_NAME_LEN + 1 })
    );
}

#[test]
fn accepts_reserved_and_namespaced_names() {
    assert_eq!(EventName::new(OPEN).map(|e| e.to_string()), Ok("open".to_owned()));
    assert!(EventName::try_from("room:say").is_ok());
}

#[test]
fn handshake_event_names_are_fixed() {
    assert_eq!(IM_CONNECTED, "imConnected");
    assert_eq!(CONNECT, "connect");
}
