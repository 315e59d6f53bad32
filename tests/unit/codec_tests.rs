//! Unit tests for NDJSON line framing.

use agent_conductor::worker::codec::LineCodec;
use agent_conductor::AppError;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn decodes_complete_lines_only() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"a\":1}\n{\"b\"");

    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{\"a\":1}"));
    assert!(codec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(b":2}\n");
    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{\"b\":2}"));
}

#[test]
fn decode_eof_returns_unterminated_tail() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("tail");
    assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("tail"));
}

#[test]
fn oversized_line_is_protocol_error_then_recovers() {
    let mut codec = LineCodec::with_max_length(8);
    let mut buf = BytesMut::from("0123456789abcdef\nok\n");

    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, AppError::Protocol(ref m) if m.starts_with("line too long")));

    let mut next = None;
    for _ in 0..4 {
        match codec.decode(&mut buf) {
            Ok(Some(line)) => {
                next = Some(line);
                break;
            }
            Ok(None) | Err(_) => {}
        }
    }
    assert_eq!(next.as_deref(), Some("ok"));
}

#[test]
fn encode_appends_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::new();
    codec.encode("{\"x\":true}".to_owned(), &mut buf).unwrap();
    assert_eq!(&buf[..], b"{\"x\":true}\n");
}
