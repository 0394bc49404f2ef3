//! Unit tests for NDJSON line framing.

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio_util::codec::{Decoder, FramedRead};

use agent_session_runner::process::codec::NdjsonCodec;

// ── Framing ──────────────────────────────────────────────────────────────────

/// Two lines in one buffer are decoded by successive calls.
#[test]
fn batched_lines_are_each_decoded() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"system\"}\n{\"type\":\"result\"}\n");

    let first = codec.decode(&mut buf).expect("first decode");
    let second = codec.decode(&mut buf).expect("second decode");
    let third = codec.decode(&mut buf).expect("third decode");

    assert_eq!(first.as_deref(), Some("{\"type\":\"system\"}"));
    assert_eq!(second.as_deref(), Some("{\"type\":\"result\"}"));
    assert!(third.is_none());
}

/// A partial line stays buffered until its newline arrives.
#[test]
fn partial_line_is_buffered() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"type\":");

    assert!(codec.decode(&mut buf).expect("decode").is_none());

    buf.extend_from_slice(b"\"system\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode").as_deref(),
        Some("{\"type\":\"system\"}")
    );
}

/// A final line without a newline is still returned at EOF.
#[test]
fn unterminated_last_line_is_returned_at_eof() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"result\"}");

    assert_eq!(
        codec.decode_eof(&mut buf).expect("decode_eof").as_deref(),
        Some("{\"type\":\"result\"}")
    );
}

// ── Limits and noise ─────────────────────────────────────────────────────────

/// An oversized line is dropped through its newline without an error.
#[test]
fn oversized_line_is_skipped() {
    let mut codec = NdjsonCodec::with_max_length(16);
    let mut buf = BytesMut::from(format!("{}\n{{\"type\":\"x\"}}\n", "a".repeat(64)).as_str());

    let line = codec.decode(&mut buf).expect("oversized line is not an error");
    assert_eq!(line.as_deref(), Some("{\"type\":\"x\"}"));
    assert!(buf.is_empty());
}

/// An oversized line split across reads is still dropped as a whole.
#[test]
fn oversized_line_across_reads_is_skipped() {
    let mut codec = NdjsonCodec::with_max_length(16);
    let mut buf = BytesMut::from("a".repeat(40).as_str());
    assert!(codec.decode(&mut buf).expect("decode").is_none());

    buf.extend_from_slice("b".repeat(40).as_bytes());
    assert!(codec.decode(&mut buf).expect("decode").is_none());

    buf.extend_from_slice(b"tail\nok\n");
    assert_eq!(codec.decode(&mut buf).expect("decode").as_deref(), Some("ok"));
}

/// Bytes that are not UTF-8 are replaced rather than failing the stream.
#[test]
fn invalid_utf8_is_replaced() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from(&b"\xff\xfe junk\nnext\n"[..]);

    let junk = codec.decode(&mut buf).expect("decode").expect("line");
    assert!(junk.ends_with(" junk"));
    assert!(junk.contains('\u{FFFD}'));
    assert_eq!(codec.decode(&mut buf).expect("decode").as_deref(), Some("next"));
}

#[test]
fn carriage_return_is_stripped() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{}\r\n");
    assert_eq!(codec.decode(&mut buf).expect("decode").as_deref(), Some("{}"));
}

/// A truncated oversized line at EOF yields nothing.
#[test]
fn oversized_tail_at_eof_is_dropped() {
    let mut codec = NdjsonCodec::with_max_length(8);
    let mut buf = BytesMut::from("x".repeat(32).as_str());
    assert!(codec.decode_eof(&mut buf).expect("decode_eof").is_none());
    assert!(buf.is_empty());
}

/// Through `FramedRead`, noise never ends the stream early.
#[tokio::test]
async fn framed_stream_survives_noise() {
    let mut input = Vec::new();
    input.extend_from_slice(b"\xff\xfe junk\n");
    input.extend_from_slice("z".repeat(100).as_bytes());
    input.extend_from_slice(b"\n{not json\nfirst\nsecond");

    let lines: Vec<String> = FramedRead::new(&input[..], NdjsonCodec::with_max_length(32))
        .map(|item| item.expect("no line is an error"))
        .collect()
        .await;

    assert_eq!(lines.len(), 4);
    assert_eq!(&lines[1..], ["{not json", "first", "second"]);
}
