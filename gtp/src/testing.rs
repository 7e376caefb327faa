//! In-process star-topology relay, for driving the coordinator/protocol
//! engine end-to-end without a real relay process or network socket.
//! Analogous to the teacher crate's `mock_multiparty_channels`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::coordinator::GuessSource;
use crate::error::GtpError;
use crate::relay::RelayTransport;

struct BrokerState {
    senders: HashMap<String, mpsc::UnboundedSender<String>>,
}

/// Shared handle to an in-memory relay. Every `join`ed peer can reach every
/// other through it, the way a real relay forwards named lines between
/// connected clients.
#[derive(Clone)]
pub struct MockNetwork {
    inner: Arc<Mutex<BrokerState>>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BrokerState {
                senders: HashMap::new(),
            })),
        }
    }

    /// Register `nickname` and return its relay handle.
    pub fn join(&self, nickname: &str) -> MockRelay {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .expect("mock network lock poisoned")
            .senders
            .insert(nickname.to_string(), tx);
        MockRelay {
            nickname: nickname.to_string(),
            network: self.clone(),
            inbox: rx,
            salvaged: VecDeque::new(),
        }
    }

    fn roster(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .expect("mock network lock poisoned")
            .senders
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Deliver `payload` directly to each of `recipients`' inboxes. Exposed
    /// so tests can inject frames out of protocol order (see the demux
    /// reordering scenario).
    pub fn send_to(&self, recipients: &[String], payload: String) {
        let inner = self.inner.lock().expect("mock network lock poisoned");
        for r in recipients {
            if let Some(tx) = inner.senders.get(r) {
                let _ = tx.send(payload.clone());
            }
        }
    }
}

/// A peer's handle onto a `MockNetwork`, implementing `RelayTransport`.
pub struct MockRelay {
    nickname: String,
    network: MockNetwork,
    inbox: mpsc::UnboundedReceiver<String>,
    salvaged: VecDeque<String>,
}

#[async_trait(?Send)]
impl RelayTransport for MockRelay {
    async fn connect(&mut self, _nickname: &str) -> Result<(), GtpError> {
        Ok(())
    }

    async fn send(&mut self, recipients: &[String], payload: &str) -> Result<(), GtpError> {
        self.network.send_to(recipients, payload.to_string());
        Ok(())
    }

    async fn list_peers(&mut self) -> Result<Vec<String>, GtpError> {
        Ok(self
            .network
            .roster()
            .into_iter()
            .filter(|n| n != &self.nickname)
            .collect())
    }

    async fn receive(&mut self, deadline: Instant) -> Result<Option<String>, GtpError> {
        if let Some(raw) = self.salvaged.pop_front() {
            return Ok(Some(raw));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        match tokio::time::timeout(remaining, self.inbox.recv()).await {
            Ok(Some(raw)) => Ok(Some(raw)),
            Ok(None) => Err(GtpError::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock network dropped",
            ))),
            Err(_) => Ok(None),
        }
    }

    fn drain_salvaged(&mut self) -> Vec<String> {
        self.salvaged.drain(..).collect()
    }

    async fn close(&mut self) {}
}

/// A `GuessSource` that replays a scripted sequence of guesses, for
/// deterministic end-to-end scenarios (S1, S2).
pub struct ScriptedGuesses {
    guesses: VecDeque<(u64, u64)>,
}

impl ScriptedGuesses {
    pub fn new(guesses: impl IntoIterator<Item = (u64, u64)>) -> Self {
        Self {
            guesses: guesses.into_iter().collect(),
        }
    }
}

#[async_trait(?Send)]
impl GuessSource for ScriptedGuesses {
    async fn next_guess(&mut self, _field_size: u64) -> Result<(u64, u64), GtpError> {
        self.guesses
            .pop_front()
            .ok_or_else(|| GtpError::UserInput("scripted guesses exhausted".to_string()))
    }
}
