//! Newline-delimited JSON framing over a worker's standard streams.
//!
//! Requests are correlated to responses by id, so completion order does not
//! matter. Anything on the inbound stream that is not a response envelope is
//! dropped.

use crate::errors::BridgeError;
use crate::protocol::{ResponseEnvelope, WorkerRequest};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::trace;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

type Reply = Result<Value, BridgeError>;

#[derive(Default)]
struct PendingCalls {
    calls: HashMap<u64, oneshot::Sender<Reply>>,
    /// Set once the channel is torn down; later sends fail with this.
    closed: Option<BridgeError>,
}

pub struct ProcessChannel {
    next_id: AtomicU64,
    pending: Mutex<PendingCalls>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    buffer: Mutex<Vec<u8>>,
}

impl ProcessChannel {
    pub fn new(writer: BoxedWriter) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(PendingCalls::default()),
            writer: tokio::sync::Mutex::new(Some(writer)),
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Sends `request` and waits for the matching response.
    pub async fn send(&self, request: &WorkerRequest) -> Result<Value, BridgeError> {
        let reply = self.dispatch(request).await?;
        reply.await.unwrap_or(Err(BridgeError::ProcessExited))
    }

    /// Writes the request line and returns the receiver for its response.
    /// Nothing is registered when the input stream is already gone.
    async fn dispatch(&self, request: &WorkerRequest) -> Result<oneshot::Receiver<Reply>, BridgeError> {
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(self.closed_reason());
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = request
            .to_line(id)
            .map_err(|e| BridgeError::Channel(format!("failed to encode request: {}", e)))?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if let Some(reason) = &pending.closed {
                return Err(reason.clone());
            }
            pending.calls.insert(id, tx);
        }
        trace!(id, kind = request.kind(), "sending request");

        let written = async {
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await
        }
        .await;
        if let Err(e) = written {
            lock(&self.pending).calls.remove(&id);
            return Err(BridgeError::Channel(e.to_string()));
        }
        Ok(rx)
    }

    /// Appends inbound bytes and resolves every complete line. A trailing
    /// partial line waits for the next chunk.
    pub fn feed(&self, chunk: &[u8]) {
        let lines: Vec<Vec<u8>> = {
            let mut buffer = lock(&self.buffer);
            buffer.extend_from_slice(chunk);
            let mut lines = Vec::new();
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = buffer.drain(..=pos).collect();
                line.pop();
                lines.push(line);
            }
            lines
        };
        for line in lines {
            self.handle_line(&line);
        }
    }

    fn handle_line(&self, line: &[u8]) {
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        let envelope: ResponseEnvelope = match serde_json::from_slice(line) {
            Ok(envelope) => envelope,
            Err(_) => {
                trace!(line = %String::from_utf8_lossy(line), "dropping non-protocol line");
                return;
            }
        };
        let Some(tx) = lock(&self.pending).calls.remove(&envelope.id) else {
            trace!(id = envelope.id, "dropping response with unknown id");
            return;
        };
        let reply = if envelope.ok {
            Ok(envelope.data.unwrap_or(Value::Null))
        } else {
            Err(BridgeError::from_worker_reason(
                envelope
                    .error
                    .unwrap_or_else(|| "worker reported an unspecified error".to_string()),
            ))
        };
        let _ = tx.send(reply);
    }

    /// Rejects every outstanding call with `reason` and refuses new ones.
    pub fn fail_all(&self, reason: BridgeError) {
        let drained: Vec<_> = {
            let mut pending = lock(&self.pending);
            if pending.closed.is_none() {
                pending.closed = Some(reason.clone());
            }
            pending.calls.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(reason.clone()));
        }
    }

    /// Ends the worker's input stream. The worker treats EOF as a request
    /// to shut down.
    pub async fn close_input(&self) {
        let stream = self.writer.lock().await.take();
        if let Some(mut stream) = stream {
            let _ = stream.shutdown().await;
        }
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).calls.len()
    }

    fn closed_reason(&self) -> BridgeError {
        lock(&self.pending)
            .closed
            .clone()
            .unwrap_or(BridgeError::NotRunning)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
