//! Background ingestion.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bundle::RawPayload;
use super::generation::{GenerationOutcome, GenerationPipeline};

/// Sending half handed to push receivers.
#[derive(Clone)]
pub struct PayloadSender {
    sender: mpsc::UnboundedSender<RawPayload>,
}

impl PayloadSender {
    /// Queue a payload for ingestion. Returns false once the worker is gone.
    pub fn submit(&self, payload: RawPayload) -> bool {
        match self.sender.send(payload) {
            Ok(()) => true,
            Err(e) => {
                warn!("Generation worker stopped, dropping payload {:?}", e.0.id());
                false
            }
        }
    }
}

/// Drains inbound payloads through the generation pipeline, one at a time,
/// each on a blocking thread.
pub struct GenerationWorker {
    receiver: mpsc::UnboundedReceiver<RawPayload>,
    pipeline: Arc<GenerationPipeline>,
}

impl GenerationWorker {
    pub fn new(pipeline: Arc<GenerationPipeline>) -> (Self, PayloadSender) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { receiver, pipeline }, PayloadSender { sender })
    }

    /// Main loop - call from a spawned task.
    ///
    /// Returns the outcome of every processed payload once all senders are
    /// dropped or `shutdown` fires. A payload already on a blocking thread
    /// is allowed to finish.
    pub async fn run(mut self, shutdown: CancellationToken) -> Vec<GenerationOutcome> {
        info!("Generation worker starting");
        let mut outcomes = Vec::new();

        loop {
            let payload = tokio::select! {
                payload = self.receiver.recv() => match payload {
                    Some(payload) => payload,
                    None => {
                        debug!("Payload channel closed");
                        break;
                    }
                },
                _ = shutdown.cancelled() => {
                    info!("Generation worker shutting down");
                    break;
                }
            };

            let pipeline = self.pipeline.clone();
            match tokio::task::spawn_blocking(move || pipeline.ingest(&payload)).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("Ingestion task panicked: {}", e),
            }
        }

        info!("Generation worker stopped after {} payload(s)", outcomes.len());
        outcomes
    }
}
