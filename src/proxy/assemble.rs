//! Response assembly for batch and streaming modes.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::extract::{extract_text, BATCH_SHAPES};
use super::stream::{FrameDecoder, StreamEvent};
use crate::error::{Error, Result};

/// Client-facing sink for streamed token fragments.
///
/// The receiving half backs the HTTP response body; dropping the sender
/// closes the stream.
pub type ClientSink = mpsc::Sender<std::result::Result<Bytes, std::io::Error>>;

/// What a finished forwarding loop produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Number of deltas written to the sink.
    pub deltas: usize,
    /// Total bytes of delta text written.
    pub bytes: usize,
    /// Whether the upstream sent its terminal sentinel.
    pub done_received: bool,
}

/// Extract the reply text from a complete batch body.
pub fn assemble_reply(body: &[u8]) -> Result<String> {
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(error = %e, "Upstream batch body is not JSON");
            return Err(Error::UpstreamEmptyReply);
        }
    };

    match extract_text(&value, BATCH_SHAPES) {
        Some((shape, text)) => {
            tracing::debug!(shape = ?shape, "Extracted batch reply");
            Ok(text)
        }
        None => {
            let preview: String = value.to_string().chars().take(1000).collect();
            tracing::error!(body = %preview, "Upstream response has no recognizable reply text");
            Err(Error::UpstreamEmptyReply)
        }
    }
}

/// Pull upstream chunks, decode them and forward deltas to the client sink.
///
/// Suspends only while awaiting the next upstream chunk or sink capacity.
/// If the client goes away, the upstream stream is dropped on the spot,
/// closing the upstream connection, and `ClientDisconnected` is returned.
/// On the terminal sentinel, end of stream, or an upstream read error the
/// sink is closed by being dropped; no error frame is written after bytes
/// have started flowing.
pub async fn forward_stream<S, E>(
    upstream: S,
    mut decoder: FrameDecoder,
    sink: ClientSink,
) -> Result<StreamSummary>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut upstream = upstream;
    let mut summary = StreamSummary::default();

    loop {
        let step = tokio::select! {
            biased;
            _ = sink.closed() => Step::Disconnected,
            next = upstream.next() => Step::Next(next),
        };

        let (events, ended) = match step {
            Step::Disconnected => break,
            Step::Next(Some(Ok(chunk))) => (decoder.push(&chunk), false),
            Step::Next(Some(Err(e))) => {
                tracing::error!(error = %e, "Error reading upstream stream");
                return Ok(finish(summary));
            }
            Step::Next(None) => (decoder.finish(), true),
        };

        if write_events(&sink, events, &mut summary).await.is_err() {
            break;
        }

        if summary.done_received || ended {
            return Ok(finish(summary));
        }
    }

    drop(upstream);
    tracing::info!(
        deltas = summary.deltas,
        "Client disconnected; aborted upstream stream"
    );
    Err(Error::ClientDisconnected)
}

enum Step<T> {
    Disconnected,
    Next(Option<T>),
}

fn finish(summary: StreamSummary) -> StreamSummary {
    if !summary.done_received {
        tracing::warn!(
            deltas = summary.deltas,
            "Upstream stream ended without a terminal sentinel"
        );
    }
    summary
}

/// Write decoded events in order; stops at `Done`.
async fn write_events(
    sink: &ClientSink,
    events: Vec<StreamEvent>,
    summary: &mut StreamSummary,
) -> Result<()> {
    for event in events {
        match event {
            StreamEvent::Delta(text) => {
                summary.deltas += 1;
                summary.bytes += text.len();
                sink.send(Ok(Bytes::from(text)))
                    .await
                    .map_err(|_| Error::ClientDisconnected)?;
            }
            StreamEvent::Done => {
                summary.done_received = true;
                break;
            }
        }
    }
    Ok(())
}
