//! Single in-flight request tracking with escalating timeouts
//!
//! At most one request may wait for its reply. While it waits, two timeout
//! windows run back to back. When the first elapses a [`WaitSignal::ShowWaiting`]
//! is raised so the UI can show a "waiting for server" indicator. When the
//! second elapses the request is abandoned and [`WaitSignal::StopWaiting`] is
//! raised. A matching reply cancels both windows.

use bytes::Bytes;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;
use shared::codec::encode_message;
use shared::{CodecError, MessageType};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum CorrelatorError {
    #[error("a {pending:?} request is already waiting for its reply")]
    RequestPending { pending: MessageType },
    #[error("transport is closed")]
    TransportClosed,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// UI feedback raised by the timeout windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSignal {
    ShowWaiting(MessageType),
    StopWaiting(MessageType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    Waiting,
    SoftTimeoutFired,
}

#[derive(Debug)]
struct Pending {
    request: MessageType,
    reply: MessageType,
    generation: u64,
    stage: TimeoutStage,
    timer: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct State {
    pending: Option<Pending>,
    next_generation: u64,
}

pub struct RequestCorrelator {
    state: Arc<Mutex<State>>,
    transport: mpsc::UnboundedSender<Bytes>,
    signals: mpsc::UnboundedSender<WaitSignal>,
    soft_timeout: Duration,
    hard_timeout: Duration,
}

impl RequestCorrelator {
    /// `hard_timeout` is measured from the moment the soft timeout fired
    pub fn new(
        transport: mpsc::UnboundedSender<Bytes>,
        soft_timeout: Duration,
        hard_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<WaitSignal>) {
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let correlator = Self {
            state: Arc::new(Mutex::new(State::default())),
            transport,
            signals,
            soft_timeout,
            hard_timeout,
        };
        (correlator, signal_rx)
    }

    /// Encodes and transmits a request
    ///
    /// Rejected without touching the wire while another request is pending.
    /// Requests that expect a reply become the pending request.
    pub fn send<T: Serialize>(&self, kind: MessageType, message: &T) -> Result<(), CorrelatorError> {
        let bytes = encode_message(kind, message)?;

        let mut state = self.state.lock();
        if let Some(pending) = &state.pending {
            return Err(CorrelatorError::RequestPending {
                pending: pending.request,
            });
        }

        self.transport
            .send(bytes)
            .map_err(|_| CorrelatorError::TransportClosed)?;

        if let Some(reply) = kind.reply() {
            let generation = state.next_generation;
            state.next_generation += 1;
            let timer = self.spawn_timer(kind, generation);
            state.pending = Some(Pending {
                request: kind,
                reply,
                generation,
                stage: TimeoutStage::Waiting,
                timer,
            });
            debug!("Waiting for {:?}", reply);
        }
        Ok(())
    }

    /// Clears the pending request if `kind` is its reply
    pub fn on_reply(&self, kind: MessageType) -> bool {
        let mut state = self.state.lock();
        let matches = state
            .pending
            .as_ref()
            .map_or(false, |pending| pending.reply == kind);
        if !matches {
            return false;
        }

        if let Some(pending) = state.pending.take() {
            pending.timer.abort();
            if pending.stage == TimeoutStage::SoftTimeoutFired {
                let _ = self.signals.send(WaitSignal::StopWaiting(pending.request));
            }
        }
        true
    }

    /// Drops the pending request without signalling
    pub fn cancel(&self) -> Option<MessageType> {
        let pending = self.state.lock().pending.take()?;
        pending.timer.abort();
        Some(pending.request)
    }

    pub fn pending(&self) -> Option<MessageType> {
        self.state.lock().pending.as_ref().map(|pending| pending.request)
    }

    pub fn stage(&self) -> Option<TimeoutStage> {
        self.state.lock().pending.as_ref().map(|pending| pending.stage)
    }

    fn spawn_timer(&self, request: MessageType, generation: u64) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let signals = self.signals.clone();
        let soft_timeout = self.soft_timeout;
        let hard_timeout = self.hard_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(soft_timeout).await;
            {
                let mut state = state.lock();
                match state.pending.as_mut() {
                    Some(pending) if pending.generation == generation => {
                        pending.stage = TimeoutStage::SoftTimeoutFired;
                    }
                    _ => return,
                }
            }
            debug!("{:?} soft timeout", request);
            let _ = signals.send(WaitSignal::ShowWaiting(request));

            tokio::time::sleep(hard_timeout).await;
            {
                let mut state = state.lock();
                match state.pending.as_ref() {
                    Some(pending) if pending.generation == generation => {
                        state.pending = None;
                    }
                    _ => return,
                }
            }
            warn!("{:?} abandoned after hard timeout", request);
            let _ = signals.send(WaitSignal::StopWaiting(request));
        })
    }
}

impl Drop for RequestCorrelator {
    fn drop(&mut self) {
        self.cancel();
    }
}
