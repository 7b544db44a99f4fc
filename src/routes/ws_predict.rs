use crate::mailbox::FrameMailbox;
use crate::scheduler::{drive_predictions, StreamReply};
use crate::server::SharedState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use base64::Engine;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

const ROUTE: &str = "ws_predict";

#[derive(Error, Debug, PartialEq)]
pub enum StreamError {
    #[error("Frame too large.")]
    TooLarge,
    #[error("Invalid JSON.")]
    InvalidJson,
    #[error("Missing 'frame' key.")]
    MissingFrame,
    #[error("Invalid base64 in 'frame'.")]
    InvalidBase64,
}

impl StreamError {
    fn into_reply(self) -> StreamReply {
        StreamReply::Error {
            error: self.to_string(),
        }
    }
}

pub async fn ws_predict(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

/// Streaming prediction session.
///
/// Three cooperating pieces per connection: the inbound loop below parses
/// messages and deposits frames into the mailbox, the scheduler loop drains
/// the mailbox one classification at a time, and a writer task owns the
/// socket sink so replies from both never interleave mid-message. A malformed
/// message yields an error reply and the connection stays usable.
async fn handle_stream(socket: WebSocket, state: SharedState) {
    tracing::info!("WebSocket connected");
    state.metrics.stream_opened();

    let (mut sink, mut inbound) = socket.split();
    let mailbox = Arc::new(FrameMailbox::new());
    let (reply_tx, mut reply_rx) = mpsc::channel::<StreamReply>(16);

    let writer = tokio::spawn({
        let metrics = state.metrics.clone();
        async move {
            while let Some(reply) = reply_rx.recv().await {
                if let StreamReply::Predictions { latency_ms, .. } = &reply {
                    metrics.record_prediction(*latency_ms as u64, ROUTE);
                }
                let payload = match serde_json::to_string(&reply) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!("Failed to serialize reply: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    let scheduler = tokio::spawn({
        let mailbox = mailbox.clone();
        let classifier = state.classifier.clone();
        let replies = reply_tx.clone();
        async move {
            drive_predictions(mailbox, replies, move |frame| {
                let classifier = classifier.clone();
                async move { classifier.classify(frame).await }
            })
            .await;
        }
    });

    while let Some(message) = inbound.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("WebSocket receive error: {}", e);
                break;
            }
        };
        match message {
            Message::Text(text) => {
                match parse_frame_message(text.as_str(), state.limits.ws_max_message_bytes) {
                    Ok(frame) => {
                        if mailbox.deposit(frame) {
                            state.metrics.record_dropped_frame(ROUTE);
                            tracing::debug!("Superseded pending frame");
                        }
                    }
                    Err(e) => {
                        if reply_tx.send(e.into_reply()).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Message::Close(_) => break,
            // Ignore binary, ping, pong
            _ => {}
        }
    }

    mailbox.close();
    drop(reply_tx);
    let _ = scheduler.await;
    let _ = writer.await;

    state.metrics.stream_closed();
    tracing::info!("WebSocket disconnected");
}

/// Extracts the frame bytes from one inbound message.
///
/// The raw length is pre-checked against the base64-inflated ceiling so
/// hopeless payloads are rejected before JSON parsing, and the exact decoded
/// length is enforced afterwards.
fn parse_frame_message(raw: &str, max_frame_bytes: usize) -> Result<Bytes, StreamError> {
    // base64 inflates by 4/3 plus padding; anything past that cannot decode
    // to an acceptable frame.
    if raw.len() > max_frame_bytes / 3 * 4 + 1024 {
        return Err(StreamError::TooLarge);
    }

    let message: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| StreamError::InvalidJson)?;
    let encoded = message
        .get("frame")
        .ok_or(StreamError::MissingFrame)?
        .as_str()
        .ok_or(StreamError::InvalidBase64)?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StreamError::InvalidBase64)?;
    if decoded.len() > max_frame_bytes {
        return Err(StreamError::TooLarge);
    }

    Ok(Bytes::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    const MAX: usize = 1024;

    #[test]
    fn accepts_a_valid_frame_message() {
        let payload = format!(r#"{{"frame": "{}"}}"#, STANDARD.encode(b"jpeg bytes"));
        let frame = parse_frame_message(&payload, MAX).unwrap();
        assert_eq!(frame, Bytes::from_static(b"jpeg bytes"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert_eq!(
            parse_frame_message("{not json", MAX),
            Err(StreamError::InvalidJson)
        );
    }

    #[test]
    fn rejects_missing_frame_key() {
        assert_eq!(
            parse_frame_message(r#"{"image": "abcd"}"#, MAX),
            Err(StreamError::MissingFrame)
        );
    }

    #[test]
    fn rejects_non_string_frame_value() {
        assert_eq!(
            parse_frame_message(r#"{"frame": 42}"#, MAX),
            Err(StreamError::InvalidBase64)
        );
    }

    #[test]
    fn rejects_invalid_base64() {
        assert_eq!(
            parse_frame_message(r#"{"frame": "!!not base64!!"}"#, MAX),
            Err(StreamError::InvalidBase64)
        );
    }

    #[test]
    fn rejects_oversized_raw_message_before_decoding() {
        let huge = "a".repeat(MAX * 4);
        let payload = format!(r#"{{"frame": "{}"}}"#, huge);
        assert_eq!(parse_frame_message(&payload, MAX), Err(StreamError::TooLarge));
    }

    #[test]
    fn rejects_frame_exceeding_decoded_ceiling() {
        // Fits the inflated pre-check (within slack) but decodes past the
        // exact ceiling.
        let encoded = STANDARD.encode(vec![0u8; MAX + 1]);
        let payload = format!(r#"{{"frame": "{}"}}"#, encoded);
        assert_eq!(parse_frame_message(&payload, MAX), Err(StreamError::TooLarge));
    }

    #[test]
    fn error_replies_carry_the_message_text() {
        let reply = StreamError::MissingFrame.into_reply();
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"error":"Missing 'frame' key."}"#);
    }
}
