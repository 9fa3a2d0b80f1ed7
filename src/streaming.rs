//! Decoding of newline/SSE-framed JSON response segments.
//!
//! Two sources feed the decoder: an already-buffered list of raw text
//! segments (replay and non-streaming responses) and a live byte stream from
//! an open connection. Either way each segment is decoded independently: an
//! optional `"data: "` prefix is stripped, an empty segment decodes to an
//! empty object, and malformed JSON is a hard failure for the call.

use std::str;

use async_stream::try_stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{Map, Value};

use crate::errors::Error;

/// Optional per-segment prefix on the streaming wire format.
const DATA_PREFIX: &str = "data: ";

/// Decodes one raw segment into a JSON value.
///
/// # Errors
///
/// Returns [`Error::Json`] when the segment is not valid JSON.
pub fn decode_segment(segment: &str) -> Result<Value, Error> {
    let trimmed = segment.trim();
    let data = trimmed.strip_prefix(DATA_PREFIX).unwrap_or(trimmed);
    if data.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    Ok(serde_json::from_str(data)?)
}

/// Parses a live byte stream of newline-delimited JSON into a stream of
/// decoded values.
///
/// Bytes are buffered until a newline, then each non-empty line is decoded
/// with [`decode_segment`]. No state is kept across lines. A trailing line
/// without a final newline is still decoded.
pub fn json_line_stream<S>(byte_stream: S) -> impl Stream<Item = Result<Value, Error>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    try_stream! {
        futures_util::pin_mut!(byte_stream);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk: Bytes = chunk_result?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes = buffer.drain(..=newline_pos).collect::<Vec<u8>>();
                let line = str::from_utf8(&line_bytes)?.trim_end_matches(['\n', '\r']);
                if line.trim().is_empty() {
                    continue;
                }
                yield decode_segment(line)?;
            }
        }

        if !buffer.is_empty() {
            let line = str::from_utf8(&buffer)?.trim();
            if !line.is_empty() {
                yield decode_segment(line)?;
            }
        }
    }
}
