use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::trace;

use crate::models::overlay::ControlErrorCode;

/// Record prefix of a single frame in the chunked response body
const RECORD_PREFIX: &str = "data: ";
/// Sentinel payload terminating the stream
const DONE_SENTINEL: &str = "[DONE]";

/// Typed events decoded from the streaming response body.
/// Produced only during an in-flight turn; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A content token to append to the provisional buffer
    ContentDelta(String),
    /// Out-of-band sponsored payload, forwarded to the overlay surface
    SponsoredContent {
        title: String,
        items: Vec<serde_json::Value>,
        token: String,
    },
    /// Out-of-band premium-upsell hint
    SuggestedPremium(serde_json::Value),
    /// Recognized control-error code carried inside the stream
    ControlError(ControlErrorCode),
    /// Normal end of stream (`[DONE]` sentinel)
    Done,
    /// Cancellation observed; distinct from `Done`, nothing follows
    Aborted,
}

#[derive(Debug, Default, Deserialize)]
struct FrameRecord {
    #[serde(default)]
    choices: Vec<FrameChoice>,
    #[serde(default)]
    error: Option<FrameError>,
}

#[derive(Debug, Default, Deserialize)]
struct FrameChoice {
    #[serde(default)]
    delta: FrameDelta,
}

#[derive(Debug, Default, Deserialize)]
struct FrameDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    sponsored_content: Option<SponsoredPayload>,
    #[serde(default)]
    suggested_premium_content: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct SponsoredPayload {
    #[serde(default)]
    title: String,
    #[serde(default)]
    items: Vec<serde_json::Value>,
    #[serde(default)]
    token: String,
}

#[derive(Debug, Deserialize)]
struct FrameError {
    #[serde(default)]
    message: String,
}

/// Parse one complete line of the response body.
///
/// Lines without the record prefix, records that fail to parse and records
/// matching none of the known shapes are skipped for forward compatibility.
fn parse_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix(RECORD_PREFIX)?;

    if payload == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }

    let record: FrameRecord = match serde_json::from_str(payload) {
        Ok(record) => record,
        Err(err) => {
            trace!(error = %err, "Skipping malformed frame");
            return None;
        }
    };

    if let Some(error) = record.error {
        // Unrecognized in-stream codes are skipped like any unknown record
        return ControlErrorCode::from_code(&error.message).map(StreamEvent::ControlError);
    }

    let delta = record.choices.into_iter().next()?.delta;

    if let Some(content) = delta.content
        && !content.is_empty()
    {
        return Some(StreamEvent::ContentDelta(content));
    }
    if let Some(sponsored) = delta.sponsored_content {
        return Some(StreamEvent::SponsoredContent {
            title: sponsored.title,
            items: sponsored.items,
            token: sponsored.token,
        });
    }
    if let Some(payload) = delta.suggested_premium_content {
        return Some(StreamEvent::SuggestedPremium(payload));
    }

    None
}

/// Decode an incremental byte stream into `StreamEvent`s.
///
/// The decoder holds the trailing partial line between chunks, so events are
/// identical however the bytes are split. The cancellation flag is observed
/// before every read; once set, a single `Aborted` is emitted and reading
/// stops without a `ControlError`. A transport error ends the stream with
/// `Err` (fatal to the turn).
pub fn decode_frames<S, B, E>(
    byte_stream: S,
    cancel: Arc<AtomicBool>,
) -> impl Stream<Item = Result<StreamEvent>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<anyhow::Error>,
{
    async_stream::stream! {
        futures::pin_mut!(byte_stream);
        // Raw bytes, not a String: a multi-byte character may be split
        // across chunks and must not be decoded until its line is complete
        let mut pending: Vec<u8> = Vec::new();

        loop {
            if cancel.load(Ordering::Relaxed) {
                yield Ok(StreamEvent::Aborted);
                return;
            }

            let Some(chunk) = byte_stream.next().await else {
                break;
            };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(err.into());
                    return;
                }
            };

            // Cancellation raised while the read was in flight
            if cancel.load(Ordering::Relaxed) {
                yield Ok(StreamEvent::Aborted);
                return;
            }

            pending.extend_from_slice(chunk.as_ref());

            // Complete lines only; the remainder stays buffered
            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim_end_matches(['\n', '\r']);

                if let Some(event) = parse_line(line) {
                    let done = event == StreamEvent::Done;
                    yield Ok(event);
                    if done {
                        return;
                    }
                }
            }
        }
    }
}
