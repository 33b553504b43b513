//! ChannelTransport - in-process transport, one bounded FIFO per strand.
//!
//! - send never waits: a full buffer is an error (`BufferFull`)
//! - receive waits until an item arrives or the buffer is closed
//! - buffers are created on the first send to a strand

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::domain::{Msg, TransportError};
use crate::ports::Transport;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

struct StrandBuffer {
    tx: mpsc::Sender<Msg>,
    rx: Arc<Mutex<mpsc::Receiver<Msg>>>,
}

impl StrandBuffer {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

pub struct ChannelTransport {
    capacity: usize,
    buffers: Mutex<HashMap<String, StrandBuffer>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// `capacity` is per strand; zero is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Envelopes waiting in the strand's buffer.
    pub async fn pending(&self, strand: &str) -> usize {
        let buffers = self.buffers.lock().await;
        buffers
            .get(strand)
            .map_or(0, |buf| buf.tx.max_capacity() - buf.tx.capacity())
    }

    /// Close one strand's buffer. Pending receivers drain what is left, then get `Closed`.
    pub async fn close_strand(&self, strand: &str) {
        if self.buffers.lock().await.remove(strand).is_some() {
            tracing::debug!(strand, "channel buffer closed");
        }
    }

    /// Close every buffer, as a process restart would.
    pub async fn reset(&self) {
        let mut buffers = self.buffers.lock().await;
        let closed = buffers.len();
        buffers.clear();
        tracing::debug!(closed, "channel transport reset");
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_message(&self, msg: &Msg) -> Result<(), TransportError> {
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers
            .entry(msg.strand().to_string())
            .or_insert_with(|| StrandBuffer::new(self.capacity));

        match buffer.tx.try_send(msg.clone()) {
            Ok(()) => {
                tracing::debug!(strand = msg.strand(), msg_id = msg.id(), "message sent via channel");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(strand = msg.strand(), "channel buffer full");
                Err(TransportError::BufferFull(msg.strand().to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(TransportError::Closed(msg.strand().to_string()))
            }
        }
    }

    async fn receive_message(&self, strand: &str) -> Result<Msg, TransportError> {
        // Only hold the map lock long enough to find the buffer.
        let rx = {
            let buffers = self.buffers.lock().await;
            match buffers.get(strand) {
                Some(buf) => Arc::clone(&buf.rx),
                None => {
                    tracing::debug!(strand, "no channel buffer for strand");
                    return Err(TransportError::NoConnection(strand.to_string()));
                }
            }
        };

        let mut rx = rx.lock().await;
        match rx.recv().await {
            Some(msg) => {
                tracing::debug!(strand, msg_id = msg.id(), "message received via channel");
                Ok(msg)
            }
            None => {
                tracing::debug!(strand, "channel closed");
                Err(TransportError::Closed(strand.to_string()))
            }
        }
    }
}
