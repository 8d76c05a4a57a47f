//! Newline-delimited JSON frame codec.
//!
//! Each wire frame is one JSON document followed by a single `\n`. The
//! decoder accumulates raw bytes, splits on the delimiter, and keeps the
//! trailing partial fragment as the new buffer, so delivery in arbitrary
//! chunk boundaries — including one byte at a time — yields the identical
//! message sequence as delivery in one chunk.
//!
//! Decoding never aborts the stream: empty and whitespace-only lines are
//! skipped, and a line that fails to parse is logged and dropped while
//! processing continues with the next delimited fragment. A fresh decoder is
//! used per connection, so no state bleeds across a disconnect/reconnect.

use tracing::warn;

use crate::error::TransportError;
use crate::types::Message;
use crate::DEFAULT_MAX_FRAME_BYTES;

/// Incremental decoder for newline-delimited JSON messages.
///
/// # Examples
///
/// ```
/// use toolbridge::shared::framing::FrameDecoder;
/// use toolbridge::types::Message;
///
/// let mut decoder = FrameDecoder::new();
/// assert!(decoder.extend(b"{\"id\":\"req_1\",\"met").is_empty());
/// let messages = decoder.extend(b"hod\":\"board/list\"}\n");
/// assert!(matches!(messages.as_slice(), [Message::Request(_)]));
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
    dropping_oversized: bool,
}

impl FrameDecoder {
    /// Creates a decoder with the default frame-size bound.
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Creates a decoder that discards any line longer than `max_frame_bytes`.
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_bytes,
            dropping_oversized: false,
        }
    }

    /// Feeds a chunk of raw bytes and returns every message completed by it.
    ///
    /// Malformed lines produce no message and do not affect later lines.
    pub fn extend(&mut self, chunk: &[u8]) -> Vec<Message> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();

            if self.dropping_oversized {
                // Tail end of a line that already blew the size bound.
                self.dropping_oversized = false;
                continue;
            }

            if line.len() > self.max_frame_bytes + 1 {
                warn!(
                    length = line.len(),
                    limit = self.max_frame_bytes,
                    "discarding oversized frame"
                );
                continue;
            }

            match decode_line(&line) {
                Some(message) => messages.push(message),
                None => continue,
            }
        }

        if !self.dropping_oversized && self.buffer.len() > self.max_frame_bytes {
            warn!(
                buffered = self.buffer.len(),
                limit = self.max_frame_bytes,
                "discarding oversized frame"
            );
            self.buffer.clear();
            self.dropping_oversized = true;
        }

        messages
    }

    /// Bytes currently buffered waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_line(line: &[u8]) -> Option<Message> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let text = match std::str::from_utf8(line) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "dropping non-UTF-8 line");
            return None;
        },
    };

    if text.trim().is_empty() {
        return None;
    }

    match Message::parse(text) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, "dropping undecodable line");
            None
        },
    }
}

/// Serializes one message as a single JSON document plus the `\n` delimiter.
pub fn encode(message: &Message) -> Result<Vec<u8>, TransportError> {
    let mut bytes = serde_json::to_vec(message)
        .map_err(|e| TransportError::InvalidMessage(format!("failed to serialize: {e}")))?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Event, Request};
    use serde_json::json;

    fn request_line(id: &str, method: &str) -> String {
        format!(r#"{{"id":"{id}","method":"{method}"}}"#) + "\n"
    }

    fn decoded_methods(messages: &[Message]) -> Vec<String> {
        messages
            .iter()
            .map(|m| match m {
                Message::Request(r) => r.method.clone(),
                other => panic!("expected request, got: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn single_chunk_decodes_all_lines() {
        let mut decoder = FrameDecoder::new();
        let stream = request_line("req_1", "sketch/list") + &request_line("req_2", "board/list");
        let messages = decoder.extend(stream.as_bytes());
        assert_eq!(decoded_methods(&messages), ["sketch/list", "board/list"]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn byte_at_a_time_matches_single_chunk() {
        let stream = request_line("req_1", "sketch/list")
            + "\n"
            + &request_line("req_2", "board/list")
            + &request_line("req_3", "library/search");

        let mut whole = FrameDecoder::new();
        let expected = decoded_methods(&whole.extend(stream.as_bytes()));

        let mut dribble = FrameDecoder::new();
        let mut got = Vec::new();
        for byte in stream.as_bytes() {
            got.extend(dribble.extend(std::slice::from_ref(byte)));
        }
        assert_eq!(decoded_methods(&got), expected);
    }

    #[test]
    fn partial_line_is_retained_until_delimiter() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.extend(br#"{"id":"req_1","meth"#).is_empty());
        assert!(decoder.buffered() > 0);
        let messages = decoder.extend(b"od\":\"sketch/read\"}\n");
        assert_eq!(decoded_methods(&messages), ["sketch/read"]);
    }

    #[test]
    fn malformed_line_between_valid_lines_is_isolated() {
        let mut decoder = FrameDecoder::new();
        let stream = request_line("req_1", "sketch/list")
            + "{this is not json}\n"
            + &request_line("req_2", "board/list");
        let messages = decoder.extend(stream.as_bytes());
        assert_eq!(decoded_methods(&messages), ["sketch/list", "board/list"]);
    }

    #[test]
    fn blank_and_whitespace_lines_are_skipped() {
        let mut decoder = FrameDecoder::new();
        let stream = format!("\n  \n\t\n{}", request_line("req_1", "board/list"));
        let messages = decoder.extend(stream.as_bytes());
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let mut decoder = FrameDecoder::new();
        let messages = decoder.extend(b"{\"id\":\"req_1\",\"method\":\"board/list\"}\r\n");
        assert_eq!(decoded_methods(&messages), ["board/list"]);
    }

    #[test]
    fn non_utf8_line_is_dropped_without_aborting() {
        let mut decoder = FrameDecoder::new();
        let mut stream = vec![0xff, 0xfe, 0xfd, b'\n'];
        stream.extend_from_slice(request_line("req_1", "board/list").as_bytes());
        let messages = decoder.extend(&stream);
        assert_eq!(decoded_methods(&messages), ["board/list"]);
    }

    #[test]
    fn oversized_line_is_discarded_and_stream_continues() {
        let mut decoder = FrameDecoder::with_max_frame_bytes(64);
        let huge = "x".repeat(200);
        assert!(decoder.extend(huge.as_bytes()).is_empty());
        // Buffer was dropped rather than grown.
        assert_eq!(decoder.buffered(), 0);

        // Rest of the oversized line plus its delimiter, then a valid line.
        let tail = format!("yyy\n{}", request_line("req_1", "board/list"));
        let messages = decoder.extend(tail.as_bytes());
        assert_eq!(decoded_methods(&messages), ["board/list"]);
    }

    #[test]
    fn oversized_line_arriving_whole_is_also_discarded() {
        let mut decoder = FrameDecoder::with_max_frame_bytes(64);
        let stream = format!("{}\n{}", "x".repeat(200), request_line("req_1", "board/list"));
        let messages = decoder.extend(stream.as_bytes());
        assert_eq!(decoded_methods(&messages), ["board/list"]);
    }

    #[test]
    fn fresh_decoder_after_reconnect_has_no_leftover_state() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"{\"id\":\"req_1\",\"partial");
        assert!(decoder.buffered() > 0);

        // Reconnect: a new decoder starts clean.
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.buffered(), 0);
        let messages = decoder.extend(request_line("req_1", "board/list").as_bytes());
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn encode_appends_single_newline() {
        let message = Message::Request(Request {
            id: "req_1".into(),
            method: "sketch/list".into(),
            params: serde_json::Map::new(),
        });
        let bytes = encode(&message).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn encode_then_decode_round_trips_an_event() {
        let event = Event::new("task/progress", json!({"taskId": "task_1_0"}));
        let bytes = encode(&Message::Event(event)).unwrap();

        let mut decoder = FrameDecoder::new();
        let messages = decoder.extend(&bytes);
        match messages.as_slice() {
            [Message::Event(ev)] => assert_eq!(ev.data["taskId"], "task_1_0"),
            other => panic!("expected one event, got: {other:?}"),
        }
    }
}
