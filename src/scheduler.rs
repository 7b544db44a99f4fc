use crate::classifier::{ClassifierError, Prediction};
use crate::mailbox::FrameMailbox;
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Outbound message for one streaming connection.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StreamReply {
    Predictions {
        predictions: Vec<Prediction>,
        latency_ms: f64,
    },
    Error {
        error: String,
    },
}

/// Per-connection frame-drop scheduler loop.
///
/// Continuously drains the mailbox, classifying one frame at a time. Awaiting
/// each classification to completion before the next `take` is what keeps at
/// most one inference in flight per connection; any frame arriving meanwhile
/// sits in the single mailbox slot and supersedes older pending ones.
///
/// The loop ends when the mailbox closes or the reply channel's receiver is
/// gone. An in-flight classification is never force-cancelled; once it
/// completes its result is simply discarded if nobody is listening.
pub async fn drive_predictions<C, Fut>(
    mailbox: Arc<FrameMailbox>,
    replies: mpsc::Sender<StreamReply>,
    classify: C,
) where
    C: Fn(Bytes) -> Fut,
    Fut: Future<Output = Result<Vec<Prediction>, ClassifierError>>,
{
    while let Some(frame) = mailbox.take().await {
        let started = Instant::now();
        let reply = match classify(frame).await {
            Ok(predictions) => StreamReply::Predictions {
                predictions,
                latency_ms: round_ms(started.elapsed()),
            },
            Err(e) => {
                tracing::error!("Inference error: {}", e);
                StreamReply::Error {
                    error: e.to_string(),
                }
            }
        };
        if replies.send(reply).await.is_err() {
            // Connection is gone; no point draining further frames.
            break;
        }
    }
}

fn round_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 10_000.0).round() / 10.0
}
