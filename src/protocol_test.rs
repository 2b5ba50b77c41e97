use super::*;

#[test]
fn test_parse_partial_transcript() {
    let event = parse_server_event(r#"{"type":"partial_transcript","text":"Patient se"}"#).unwrap();
    assert_eq!(
        event,
        ServerEvent::PartialTranscript {
            text: "Patient se".to_string()
        }
    );
}

#[test]
fn test_parse_turn_complete() {
    let event = parse_server_event(
        r#"{
            "type": "turn_complete",
            "text": "Patient se plaint de douleurs",
            "speaker": "A",
            "audio_start_ms": 1200,
            "audio_end_ms": 4800,
            "turn_order": 3
        }"#,
    )
    .unwrap();

    match event {
        ServerEvent::TurnComplete {
            text,
            speaker,
            audio_start_ms,
            audio_end_ms,
            turn_order,
        } => {
            assert_eq!(text, "Patient se plaint de douleurs");
            assert_eq!(speaker.as_deref(), Some("A"));
            assert_eq!(audio_start_ms, 1200);
            assert_eq!(audio_end_ms, 4800);
            assert_eq!(turn_order, 3);
        }
        other => panic!("Expected TurnComplete, got {other:?}"),
    }
}

#[test]
fn test_parse_turn_complete_optional_fields_default() {
    let event =
        parse_server_event(r#"{"type":"turn_complete","text":"ok","turn_order":1}"#).unwrap();
    match event {
        ServerEvent::TurnComplete {
            speaker,
            audio_start_ms,
            audio_end_ms,
            ..
        } => {
            assert_eq!(speaker, None);
            assert_eq!(audio_start_ms, 0);
            assert_eq!(audio_end_ms, 0);
        }
        other => panic!("Expected TurnComplete, got {other:?}"),
    }
}

#[test]
fn test_parse_session_error() {
    let event =
        parse_server_event(r#"{"type":"session_error","code":"auth","message":"token expired"}"#)
            .unwrap();
    assert_eq!(
        event,
        ServerEvent::SessionError {
            code: "auth".to_string(),
            message: "token expired".to_string()
        }
    );
}

#[test]
fn test_parse_unknown_type_fails() {
    assert!(parse_server_event(r#"{"type":"heartbeat"}"#).is_err());
}

#[test]
fn test_parse_garbage_fails() {
    assert!(parse_server_event("not json at all").is_err());
    assert!(parse_server_event(r#"{"text":"no type field"}"#).is_err());
}

#[test]
fn test_end_session_json() {
    assert_eq!(ClientSignal::EndSession.to_json(), r#"{"type":"end_session"}"#);
}
