//! Streaming HTTP transport for one conversation turn
//!
//! Wraps a single streaming POST and exposes the response as an ordered
//! sequence of [`StreamEvent`]s over a channel, the body being decoded by
//! the incremental SSE parser. Cancellation is cooperative through a
//! [`CancellationToken`]: once triggered, no further `Delta` is delivered
//! and the stream ends with `Closed` rather than `Failed`.
//!
//! The transport itself places no limit on concurrent subscriptions; the
//! one-open-subscription-per-turn rule is enforced by the engine.

use crate::core::sse::{Frame, FrameParser};
use crate::error::ChatError;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One outbound streaming request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: String,
    pub bearer_token: String,
    pub body: serde_json::Value,
}

/// Events delivered to the subscriber, in arrival order.
#[derive(Debug)]
pub enum StreamEvent {
    /// Text payload of one `message` frame.
    Delta(String),
    /// Server signalled normal end-of-stream (`done`/`complete` frame).
    Done,
    /// Connection closed without a terminal frame: either the caller
    /// cancelled, or the server hung up cleanly.
    Closed,
    /// Network-initiated failure. Never emitted for caller cancellation.
    Failed(ChatError),
}

/// Receiving side of one open stream.
pub struct Subscription {
    events: mpsc::Receiver<StreamEvent>,
}

impl Subscription {
    /// Next event, or `None` once the reader task has finished and the
    /// channel drained.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }
}

#[derive(Clone, Default)]
pub struct StreamTransport {
    client: Client,
}

impl StreamTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the streaming POST. A non-2xx response fails the open; after a
    /// successful open all outcomes arrive as events on the subscription.
    /// The connect phase itself races the token, so a cancellation during a
    /// slow connection fails the open with `Cancelled` instead of waiting
    /// out the server.
    pub async fn open(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<Subscription, ChatError> {
        let send = self
            .client
            .post(&request.url)
            .header("Authorization", format!("Bearer {}", request.bearer_token))
            .header("Content-Type", "application/json")
            .json(&request.body)
            .send();

        let response = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("stream cancelled while connecting");
                return Err(ChatError::Cancelled);
            }

            result = send => result.map_err(|e| ChatError::Network(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(read_stream(response, tx, cancel));

        Ok(Subscription { events: rx })
    }
}

async fn read_stream(
    response: reqwest::Response,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    let mut stream = response.bytes_stream();
    let mut parser = FrameParser::new();

    loop {
        tokio::select! {
            // Cancellation wins over a ready chunk so no Delta is delivered
            // after the caller asked to stop.
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("stream cancelled by caller");
                let _ = tx.send(StreamEvent::Closed).await;
                return;
            }

            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    for frame in parser.push(&bytes) {
                        match classify(frame) {
                            Some(StreamEvent::Done) => {
                                let _ = tx.send(StreamEvent::Done).await;
                                return;
                            }
                            Some(event) => {
                                if tx.send(event).await.is_err() {
                                    // Subscriber dropped; stop reading.
                                    return;
                                }
                            }
                            None => {}
                        }
                    }
                }
                Some(Err(e)) => {
                    let event = if cancel.is_cancelled() {
                        StreamEvent::Closed
                    } else {
                        tracing::warn!("stream dropped: {}", e);
                        StreamEvent::Failed(ChatError::Network(e.to_string()))
                    };
                    let _ = tx.send(event).await;
                    return;
                }
                None => {
                    // Clean close without a terminal frame.
                    if let Some(frame) = parser.finish() {
                        if let Some(event) = classify(frame) {
                            let _ = tx.send(event).await;
                        }
                    }
                    let _ = tx.send(StreamEvent::Closed).await;
                    return;
                }
            }
        }
    }
}

fn classify(frame: Frame) -> Option<StreamEvent> {
    match frame.event.as_deref() {
        None | Some("") | Some("message") => Some(StreamEvent::Delta(decode_payload(&frame.data))),
        Some("done") | Some("complete") => Some(StreamEvent::Done),
        Some(other) => {
            tracing::trace!(event = other, "ignoring unrecognized frame type");
            None
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    content: String,
}

/// Data payloads come in two shapes, on either endpoint: a JSON envelope
/// `{"content": "..."}` or a bare string appended verbatim.
fn decode_payload(data: &str) -> String {
    match serde_json::from_str::<Envelope>(data) {
        Ok(envelope) => envelope.content,
        Err(_) => data.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json_envelope() {
        assert_eq!(decode_payload(r#"{"content":"hello"}"#), "hello");
    }

    #[test]
    fn passes_bare_text_verbatim() {
        assert_eq!(decode_payload("plain text"), "plain text");
        // A JSON-ish string that is not the envelope stays verbatim.
        assert_eq!(decode_payload(r#""quoted""#), r#""quoted""#);
    }

    #[test]
    fn classifies_frames() {
        let delta = classify(Frame {
            event: None,
            data: "x".into(),
        });
        assert!(matches!(delta, Some(StreamEvent::Delta(d)) if d == "x"));

        let done = classify(Frame {
            event: Some("done".into()),
            data: String::new(),
        });
        assert!(matches!(done, Some(StreamEvent::Done)));

        let complete = classify(Frame {
            event: Some("complete".into()),
            data: String::new(),
        });
        assert!(matches!(complete, Some(StreamEvent::Done)));

        let unknown = classify(Frame {
            event: Some("heartbeat".into()),
            data: String::new(),
        });
        assert!(unknown.is_none());
    }
}
