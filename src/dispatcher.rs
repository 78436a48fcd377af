//! The relay-and-response engine.
//!
//! `RelayDispatcher` is an actor: it owns the [`Session`] and processes one
//! chat event or one control command to completion before looking at the
//! next. The control plane talks to it only through [`RelayCommand`]s, the
//! gate flags, and the bridge, so no lock guards the session itself.

use crate::aggregator::TriggerAggregator;
use crate::bridge::{Bridge, Notification};
use crate::chat::ChatPlatform;
use crate::constants::{DECORATIONS, MAX_REPLY_CHARS, PROBE_PROMPT, REPLY_SYSTEM_PROMPT};
use crate::db::BotState;
use crate::failover::{CredentialPool, FailoverController};
use crate::gate::{Gate, RelayMode};
use crate::str_utils::{mask_credential, normalize_channel};
use crate::types::{ChatEvent, RelayError, Result, SessionIdentity};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

/// Everything one operator session mutates.
pub struct Session {
    pub identity: Option<SessionIdentity>,
    pub channel: Option<String>,
    pub enabled: bool,
    pub stop_words: Vec<String>,
    pub failover: FailoverController,
    pub aggregator: TriggerAggregator,
}

impl Session {
    pub fn new(failover: FailoverController, aggregator: TriggerAggregator) -> Self {
        Self {
            identity: None,
            channel: None,
            enabled: false,
            stop_words: Vec::new(),
            failover,
            aggregator,
        }
    }

    pub fn matching_stop_word(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.stop_words
            .iter()
            .find(|w| !w.is_empty() && lowered.contains(w.as_str()))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginReport {
    pub credentials: usize,
    pub working_credential: bool,
    pub channel: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub identity: Option<SessionIdentity>,
    pub channel: Option<String>,
    pub enabled: bool,
    pub mode: RelayMode,
    pub credentials: usize,
    pub active_credential: Option<String>,
    pub pending: usize,
    pub threshold: usize,
}

pub enum RelayCommand {
    Login {
        identity: SessionIdentity,
        credentials: Vec<String>,
        stop_words: Vec<String>,
        state: BotState,
        resp: oneshot::Sender<Result<LoginReport>>,
    },
    SetChannel {
        name: String,
        resp: oneshot::Sender<Result<String>>,
    },
    SetEnabled {
        enabled: bool,
        resp: oneshot::Sender<Result<()>>,
    },
    AddCredential {
        credential: String,
        resp: oneshot::Sender<Result<()>>,
    },
    RemoveCredential {
        index: usize,
        resp: oneshot::Sender<Result<String>>,
    },
    AddStopWord {
        word: String,
        resp: oneshot::Sender<Result<String>>,
    },
    RemoveStopWord {
        index: usize,
        resp: oneshot::Sender<Result<String>>,
    },
    ListCredentials {
        resp: oneshot::Sender<Vec<String>>,
    },
    ListStopWords {
        resp: oneshot::Sender<Vec<String>>,
    },
    Status {
        resp: oneshot::Sender<SessionStatus>,
    },
}

/// What happened to one incoming chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    NoSession,
    Paused,
    StopWord,
    Observed,
    Responded(String),
    ResponseFailed,
}

/// Picks one decoration and applies it. Over-long replies are replaced by the
/// bare token.
pub fn decorate(text: &str, rng: &mut fastrand::Rng) -> String {
    let token = DECORATIONS[rng.usize(..DECORATIONS.len())];
    if text.chars().count() > MAX_REPLY_CHARS {
        token.to_string()
    } else {
        format!("{} {}", text.trim(), token)
    }
}

pub struct RelayDispatcher {
    session: Session,
    gate: Gate,
    bridge: Bridge,
    chat: Arc<dyn ChatPlatform>,
    rng: fastrand::Rng,
    probe_rounds: u32,
    span: tracing::Span,
}

impl RelayDispatcher {
    pub fn new(
        session: Session,
        gate: Gate,
        bridge: Bridge,
        chat: Arc<dyn ChatPlatform>,
        rng: fastrand::Rng,
        probe_rounds: u32,
    ) -> Self {
        Self {
            session,
            gate,
            bridge,
            chat,
            rng,
            probe_rounds,
            span: tracing::info_span!("session", session_id = tracing::field::Empty, operator_id = tracing::field::Empty),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub async fn run(
        mut self,
        mut rx_chat: mpsc::Receiver<ChatEvent>,
        mut rx_cmd: mpsc::Receiver<RelayCommand>,
    ) {
        tracing::info!("Relay dispatcher started");
        let mut chat_open = true;
        let mut cmd_open = true;

        while chat_open || cmd_open {
            tokio::select! {
                biased;
                cmd = rx_cmd.recv(), if cmd_open => match cmd {
                    Some(cmd) => {
                        let span = self.span.clone();
                        self.handle_command(cmd).instrument(span).await;
                    }
                    None => {
                        tracing::warn!("Control plane closed its command channel");
                        cmd_open = false;
                    }
                },
                ev = rx_chat.recv(), if chat_open => match ev {
                    Some(ev) => {
                        let span = self.span.clone();
                        self.handle_chat_event(ev).instrument(span).await;
                    }
                    None => {
                        tracing::warn!("Chat event source closed");
                        chat_open = false;
                    }
                },
            }
        }
        tracing::info!("Relay dispatcher stopped");
    }

    pub async fn handle_chat_event(&mut self, ev: ChatEvent) -> EventOutcome {
        let Some(identity) = self.session.identity else {
            tracing::trace!("[NO SESSION] {}", ev.formatted());
            return EventOutcome::NoSession;
        };

        if self.gate.mode() == RelayMode::Paused {
            tracing::info!("[PAUSED] {}", ev.formatted());
            return EventOutcome::Paused;
        }

        if let Some(word) = self.session.matching_stop_word(&ev.text) {
            tracing::info!("[STOP WORD '{}'] {}", word, ev.formatted());
            return EventOutcome::StopWord;
        }

        let line = ev.formatted();
        tracing::info!("{}", line);

        self.bridge.submit(Notification::Relay {
            operator: identity.operator_id,
            text: line.clone(),
        });

        self.session.aggregator.observe(line);

        if !(self.session.enabled && self.session.aggregator.should_respond()) {
            return EventOutcome::Observed;
        }

        match self.respond().await {
            Ok(published) => EventOutcome::Responded(published),
            Err(e) => {
                tracing::warn!("[🤖] Response cycle aborted: {}", e.inner);
                EventOutcome::ResponseFailed
            }
        }
    }

    /// Builds the prompt, completes it, decorates, publishes, notifies, flushes.
    /// Any failure leaves the pending triggers in place.
    pub async fn respond(&mut self) -> Result<String> {
        let prompt = self.session.aggregator.build_prompt();

        let text = self
            .session
            .failover
            .complete(&prompt, REPLY_SYSTEM_PROMPT)
            .await?;

        if text.trim().is_empty() {
            return Err(RelayError::EmptyCompletion.into());
        }

        let decorated = decorate(&text, &mut self.rng);

        let channel = match &self.session.channel {
            Some(c) => c.clone(),
            None => return Err(RelayError::Publish("no active channel".into()).into()),
        };
        if let Err(e) = self.chat.publish(&channel, &decorated).await {
            tracing::error!("[🤖] Failed to publish to #{}: {}", channel, e.inner);
            return Err(match e.inner {
                RelayError::Publish(m) => RelayError::Publish(m),
                other => RelayError::Publish(other.to_string()),
            }
            .into());
        }
        tracing::info!("[🤖] AI → #{}: {}", channel, decorated);

        if let Some(identity) = self.session.identity {
            self.bridge.submit(Notification::Published {
                operator: identity.operator_id,
                text: decorated.clone(),
            });
        }

        self.session.aggregator.flush();
        Ok(decorated)
    }

    pub async fn handle_command(&mut self, cmd: RelayCommand) {
        match cmd {
            RelayCommand::Login {
                identity,
                credentials,
                stop_words,
                state,
                resp,
            } => {
                let report = self.login(identity, credentials, stop_words, state).await;
                let _ = resp.send(report);
            }
            RelayCommand::SetChannel { name, resp } => {
                let _ = resp.send(self.set_channel(&name).await);
            }
            RelayCommand::SetEnabled { enabled, resp } => {
                self.set_enabled(enabled);
                let _ = resp.send(Ok(()));
            }
            RelayCommand::AddCredential { credential, resp } => {
                let _ = resp.send(self.session.failover.add_credential(&credential));
            }
            RelayCommand::RemoveCredential { index, resp } => {
                let _ = resp.send(self.session.failover.remove_credential(index));
            }
            RelayCommand::AddStopWord { word, resp } => {
                let _ = resp.send(self.add_stop_word(&word));
            }
            RelayCommand::RemoveStopWord { index, resp } => {
                let _ = resp.send(self.remove_stop_word(index));
            }
            RelayCommand::ListCredentials { resp } => {
                let masked = self
                    .session
                    .failover
                    .pool()
                    .credentials()
                    .iter()
                    .map(|c| mask_credential(c))
                    .collect();
                let _ = resp.send(masked);
            }
            RelayCommand::ListStopWords { resp } => {
                let _ = resp.send(self.session.stop_words.clone());
            }
            RelayCommand::Status { resp } => {
                let _ = resp.send(self.status());
            }
        }
    }

    pub async fn login(
        &mut self,
        identity: SessionIdentity,
        credentials: Vec<String>,
        stop_words: Vec<String>,
        state: BotState,
    ) -> Result<LoginReport> {
        let session_id = uuid::Uuid::new_v4();
        self.span = tracing::info_span!(
            "session",
            session_id = %session_id,
            operator_id = %identity.operator_id
        );
        tracing::info!(parent: &self.span, "Operator {} ({}) logged in", identity.operator_id, identity.role);

        self.session.identity = Some(identity);
        self.session.stop_words = stop_words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        self.session.enabled = state.enabled;
        self.session.aggregator.reset();

        let pool = CredentialPool::new(credentials);
        let count = pool.len();

        let working = match self.session.failover.activate(pool) {
            Ok(()) => match self
                .session
                .failover
                .probe_all(PROBE_PROMPT, self.probe_rounds)
                .instrument(self.span.clone())
                .await
            {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!(parent: &self.span, "No working credential at login: {}", e.inner);
                    false
                }
            },
            Err(e) => {
                tracing::error!(parent: &self.span, "Operator has no credentials: {}", e.inner);
                false
            }
        };

        self.session.channel = None;
        if let Some(channel) = state.channel.as_deref() {
            if let Err(e) = self.set_channel(channel).await {
                tracing::error!(parent: &self.span, "Failed to join saved channel {}: {}", channel, e.inner);
            }
        }

        Ok(LoginReport {
            credentials: count,
            working_credential: working,
            channel: self.session.channel.clone(),
            enabled: self.session.enabled,
        })
    }

    pub async fn set_channel(&mut self, name: &str) -> Result<String> {
        let channel = normalize_channel(name);
        if channel.is_empty() {
            return Err(RelayError::InvalidInput("channel name is empty".into()).into());
        }
        self.chat.join(&channel).await?;
        self.session.channel = Some(channel.clone());
        self.session.aggregator.reset();
        tracing::info!("Channel set to #{}", channel);
        Ok(channel)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.session.enabled = enabled;
        self.session.aggregator.reset();
        if enabled && !self.session.failover.has_active_client() && !self.session.failover.pool().is_empty() {
            if let Err(e) = self.session.failover.reactivate() {
                tracing::warn!("Could not reactivate credentials: {}", e.inner);
            }
        }
        tracing::info!("Relay {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn add_stop_word(&mut self, word: &str) -> Result<String> {
        let word = word.trim().to_lowercase();
        if word.is_empty() {
            return Err(RelayError::InvalidInput("stop word is empty".into()).into());
        }
        if self.session.stop_words.contains(&word) {
            return Err(RelayError::InvalidInput(format!("'{}' is already a stop word", word)).into());
        }
        self.session.stop_words.push(word.clone());
        Ok(word)
    }

    pub fn remove_stop_word(&mut self, index: usize) -> Result<String> {
        if index >= self.session.stop_words.len() {
            return Err(RelayError::InvalidInput(format!("no stop word at position {}", index + 1)).into());
        }
        Ok(self.session.stop_words.remove(index))
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            identity: self.session.identity,
            channel: self.session.channel.clone(),
            enabled: self.session.enabled,
            mode: self.gate.mode(),
            credentials: self.session.failover.pool().len(),
            active_credential: self.session.failover.active_credential().map(mask_credential),
            pending: self.session.aggregator.pending_len(),
            threshold: self.session.aggregator.threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decorate_short_reply() {
        let mut rng = fastrand::Rng::with_seed(11);
        let out = decorate("  hello  ", &mut rng);
        let token = match out.strip_prefix("hello ") {
            Some(t) => t,
            None => panic!("unexpected decoration: {:?}", out),
        };
        assert!(DECORATIONS.contains(&token));
    }

    #[test]
    fn test_decorate_long_reply_is_replaced() {
        let mut rng = fastrand::Rng::with_seed(11);
        let long = "x".repeat(MAX_REPLY_CHARS + 1);
        let out = decorate(&long, &mut rng);
        assert!(DECORATIONS.contains(&out.as_str()));
    }

    #[test]
    fn test_decorate_boundary_is_kept() {
        let mut rng = fastrand::Rng::with_seed(2);
        let exact = "y".repeat(MAX_REPLY_CHARS);
        let out = decorate(&exact, &mut rng);
        assert!(out.starts_with(&exact));
    }

    #[test]
    fn test_blank_decorations_dominate() {
        let blanks = DECORATIONS.iter().filter(|d| d.trim().is_empty()).count();
        assert!(blanks * 2 >= DECORATIONS.len());
    }
}
