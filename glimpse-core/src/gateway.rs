//! Decoupling layer between transports and the engine loop.
//!
//! Transports hand instructions in and take framed messages out
//! without knowing anything about the controller, and the controller
//! never sees a socket. Instructions land in a queue the controller
//! drains once per tick; outbound frames flow through an unbounded
//! channel to the publisher task. Closing that channel is the
//! shutdown signal for the publisher.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::client::ClientRegistry;
use crate::error::EngineError;
use crate::wire::Instruction;

/// Destination for fully framed outbound messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn publish(&self, frame: Bytes) -> Result<(), EngineError>;
}

/// Shared entry point for transports.
pub struct EngineGateway {
    registry: Arc<Mutex<ClientRegistry>>,
    instructions: Mutex<Vec<Instruction>>,
    message_tx: mpsc::UnboundedSender<Bytes>,
}

impl EngineGateway {
    pub fn new(
        registry: Arc<Mutex<ClientRegistry>>,
        message_tx: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            registry,
            instructions: Mutex::new(Vec::new()),
            message_tx,
        }
    }

    pub fn registry(&self) -> Arc<Mutex<ClientRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Queue an instruction for the next controller tick.
    pub fn submit(&self, instruction: Instruction) {
        self.instructions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(instruction);
    }

    /// Take everything queued since the last drain.
    pub fn drain_instructions(&self) -> Vec<Instruction> {
        std::mem::take(
            &mut *self
                .instructions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Register a new client, returning its id and index bit.
    pub fn connect_client(&self) -> Result<(u32, u64), EngineError> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_client(Instant::now())
    }

    /// Remove a client explicitly (transport-level disconnect).
    pub fn disconnect_client(&self, client_id: u32) -> Result<(), EngineError> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_client(client_id)
    }

    /// Hand a framed message to the publisher.
    pub fn publish(&self, frame: Bytes) -> Result<(), EngineError> {
        self.message_tx.send(frame)?;
        Ok(())
    }
}

/// Pump frames from the gateway channel into a sink until the channel
/// closes.
pub async fn run_publisher(
    mut message_rx: mpsc::UnboundedReceiver<Bytes>,
    sink: Arc<dyn MessageSink>,
) {
    while let Some(frame) = message_rx.recv().await {
        if let Err(e) = sink.publish(frame).await {
            tracing::warn!(error = %e, "message publish failed");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
