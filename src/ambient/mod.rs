//! Ambient text
//!
//! Generated flavor lines for creature yells. Generation can be slow or
//! fail, so requests are handed to a tokio task and results come back
//! through a channel the engine drains on a later tick. Requests that fail
//! or arrive late are dropped silently.

use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::game::state::CreatureId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmbientError {
    #[error("generation timed out after {0} ms")]
    Timeout(u64),
    #[error("ambient text is unavailable")]
    Unavailable,
    #[error("generation failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbientRequest {
    pub creature: CreatureId,
    pub name: String,
    pub prompt: String,
    pub yell: bool,
}

/// A generated line ready to be spoken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbientLine {
    pub creature: CreatureId,
    pub text: String,
    pub yell: bool,
}

/// Source of generated flavor text
#[async_trait]
pub trait AmbientText: Send + Sync {
    async fn generate(&self, request: &AmbientRequest) -> Result<String, AmbientError>;
}

/// Generator that never produces anything
pub struct SilentText;

#[async_trait]
impl AmbientText for SilentText {
    async fn generate(&self, _request: &AmbientRequest) -> Result<String, AmbientError> {
        Err(AmbientError::Unavailable)
    }
}

/// Send `line` to the engine side. A closed channel marks the worker for
/// shutdown.
fn deliver_line(delivery_tx: &Sender<AmbientLine>, closed: &AtomicBool, line: AmbientLine) -> bool {
    let creature = line.creature;
    match delivery_tx.send(line) {
        Ok(()) => true,
        Err(e) => {
            debug!(creature, "ambient line undeliverable: {}", e);
            closed.store(true, Ordering::Relaxed);
            false
        }
    }
}

/// Background queue in front of an `AmbientText` generator
pub struct AmbientQueue {
    requests: Option<mpsc::Sender<AmbientRequest>>,
    deliveries: Receiver<AmbientLine>,
}

impl AmbientQueue {
    /// Queue that accepts nothing
    pub fn disabled() -> Self {
        let (_, deliveries) = unbounded();
        Self {
            requests: None,
            deliveries,
        }
    }

    /// Start the worker on the current tokio runtime. Outside a runtime the
    /// queue is disabled.
    pub fn spawn(generator: Arc<dyn AmbientText>, capacity: usize, timeout: Duration) -> Self {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime, ambient text disabled");
            return Self::disabled();
        };

        let (request_tx, mut request_rx) = mpsc::channel::<AmbientRequest>(capacity.max(1));
        let (delivery_tx, deliveries) = unbounded();

        let closed = Arc::new(AtomicBool::new(false));

        handle.spawn(async move {
            while let Some(request) = request_rx.recv().await {
                if closed.load(Ordering::Relaxed) {
                    debug!("ambient delivery channel closed, stopping worker");
                    break;
                }
                let generator = generator.clone();
                let delivery_tx: Sender<AmbientLine> = delivery_tx.clone();
                let closed = closed.clone();
                tokio::spawn(async move {
                    let result = tokio::time::timeout(timeout, generator.generate(&request))
                        .await
                        .unwrap_or_else(|_| Err(AmbientError::Timeout(timeout.as_millis() as u64)));

                    match result {
                        Ok(text) if !text.trim().is_empty() => {
                            let line = AmbientLine {
                                creature: request.creature,
                                text: text.trim().to_string(),
                                yell: request.yell,
                            };
                            deliver_line(&delivery_tx, &closed, line);
                        }
                        Ok(_) => debug!(creature = request.creature, "ambient text empty"),
                        Err(e) => debug!(creature = request.creature, "ambient text dropped: {}", e),
                    }
                });
            }
        });

        Self {
            requests: Some(request_tx),
            deliveries,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.requests.is_some()
    }

    /// Hand a request to the worker without waiting. Returns false when the
    /// request was dropped.
    pub fn submit(&self, request: AmbientRequest) -> bool {
        let Some(requests) = &self.requests else {
            return false;
        };
        match requests.try_send(request) {
            Ok(()) => true,
            Err(e) => {
                debug!("ambient request dropped: {}", e);
                false
            }
        }
    }

    /// Lines delivered since the last call
    pub fn drain(&self) -> Vec<AmbientLine> {
        self.deliveries.try_iter().collect()
    }
}

impl Default for AmbientQueue {
    fn default() -> Self {
        Self::disabled()
    }
}
