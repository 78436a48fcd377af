//! Operator control plane: the Telegram admin menu and its linear dialogs.
//!
//! Each dialog raises one gate flag for its duration, which pauses the relay.
//! Changes are applied to the dispatcher first and persisted afterwards; a
//! failed write is reported to the operator but not rolled back.

use crate::db::{self, DbPool};
use crate::dispatcher::RelayCommand;
use crate::gate::{Gate, GateFlag};
use crate::hardening::RetryPolicy;
use crate::telegram::TelegramClient;
use crate::types::{Admin, OperatorId, RelayError, Result, SessionIdentity};
use tokio::sync::{mpsc, oneshot};

pub const BTN_ENABLE: &str = "🚀 Start bot";
pub const BTN_DISABLE: &str = "⛔ Stop bot";
pub const BTN_CHANNEL: &str = "🔄 Change channel";
pub const BTN_ADD_KEY: &str = "➕ Add API key";
pub const BTN_KEYS: &str = "🔑 Our keys";
pub const BTN_STOP_WORDS: &str = "🛑 Stop words";

pub const MAIN_KEYBOARD: &[&[&str]] = &[
    &[BTN_ENABLE, BTN_DISABLE],
    &[BTN_CHANNEL, BTN_ADD_KEY],
    &[BTN_KEYS, BTN_STOP_WORDS],
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    Start,
    Enable,
    Disable,
    ChangeChannel,
    AddKey,
    ShowKeys,
    StopWords,
    Text(String),
}

pub fn parse_action(text: &str) -> MenuAction {
    let text = text.trim();
    if text == "/start" || text.starts_with("/start ") {
        return MenuAction::Start;
    }
    match text {
        BTN_ENABLE => MenuAction::Enable,
        BTN_DISABLE => MenuAction::Disable,
        BTN_CHANNEL => MenuAction::ChangeChannel,
        BTN_ADD_KEY => MenuAction::AddKey,
        BTN_KEYS => MenuAction::ShowKeys,
        BTN_STOP_WORDS => MenuAction::StopWords,
        other => MenuAction::Text(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: bool,
}

impl Reply {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: false,
        }
    }

    fn with_menu(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: true,
        }
    }
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}) {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ControlPlane {
    db: DbPool,
    gate: Gate,
    tx_cmd: mpsc::Sender<RelayCommand>,
    admins: Vec<Admin>,
    identity: Option<SessionIdentity>,
}

impl ControlPlane {
    pub fn new(db: DbPool, gate: Gate, tx_cmd: mpsc::Sender<RelayCommand>, admins: Vec<Admin>) -> Self {
        Self {
            db,
            gate,
            tx_cmd,
            admins,
            identity: None,
        }
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.identity
    }

    fn admin(&self, id: OperatorId) -> Option<&Admin> {
        self.admins.iter().find(|a| a.operator_id == id)
    }

    /// Sends a command to the dispatcher and waits for its answer.
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> RelayCommand) -> Result<T> {
        let (resp, rx) = oneshot::channel();
        if self.tx_cmd.send(build(resp)).await.is_err() {
            return Err(RelayError::internal("relay dispatcher is not running").into());
        }
        rx.await
            .map_err(|_| RelayError::internal("relay dispatcher dropped the request").into())
    }

    pub async fn handle_message(&mut self, from: OperatorId, text: &str) -> Option<Reply> {
        let action = parse_action(text);
        let Some(admin) = self.admin(from).cloned() else {
            tracing::info!("Ignoring message from non-admin {}", from);
            return match action {
                MenuAction::Start => Some(Reply::plain(
                    "This bot is a service bot.\nYou do not have administrator rights.",
                )),
                _ => None,
            };
        };

        if action == MenuAction::Start {
            return Some(self.login(&admin).await);
        }

        let Some(identity) = self.identity else {
            return Some(Reply::plain("Send /start first."));
        };

        let reply = match action {
            MenuAction::Start => unreachable!("handled above"),
            MenuAction::Enable => self.toggle(identity, true).await,
            MenuAction::Disable => self.toggle(identity, false).await,
            MenuAction::ChangeChannel => {
                self.open_dialog(identity, GateFlag::ChannelChange).await;
                Reply::plain("🔄 Changing the Twitch channel.\n\nEnter the channel name (no @ and no links).")
            }
            MenuAction::AddKey => {
                self.open_dialog(identity, GateFlag::KeyAdd).await;
                Reply::plain("➕ Adding an API key.\n\nSend the whole key.\nSend 0 to cancel.")
            }
            MenuAction::ShowKeys => {
                self.open_dialog(identity, GateFlag::KeyDelete).await;
                let keys = self
                    .request(|resp| RelayCommand::ListCredentials { resp })
                    .await
                    .unwrap_or_default();
                if keys.is_empty() {
                    Reply::plain("🔑 The key list is empty.")
                } else {
                    Reply::plain(format!(
                        "🔑 Your API keys:\n\n{}\n\nSend a key number to delete it\n0 to cancel",
                        numbered(&keys)
                    ))
                }
            }
            MenuAction::StopWords => {
                self.open_dialog(identity, GateFlag::StopWordEdit).await;
                let words = self
                    .request(|resp| RelayCommand::ListStopWords { resp })
                    .await
                    .unwrap_or_default();
                if words.is_empty() {
                    Reply::plain("🛑 No stop words yet.\n\nSend a word or phrase to add it.\n0 to exit.")
                } else {
                    Reply::plain(format!(
                        "🛑 Current stop words:\n\n{}\n\nSend a word to add it\nA number to delete\n0 to exit",
                        numbered(&words)
                    ))
                }
            }
            MenuAction::Text(text) => match self.gate.active() {
                Some(GateFlag::ChannelChange) => self.dialog_channel(identity, &text).await,
                Some(GateFlag::KeyAdd) => self.dialog_add_key(identity, &text).await,
                Some(GateFlag::KeyDelete) => self.dialog_delete_key(identity, &text).await,
                Some(GateFlag::StopWordEdit) => self.dialog_stop_words(&text).await,
                None => return None,
            },
        };
        Some(reply)
    }

    async fn login(&mut self, admin: &Admin) -> Reply {
        let identity = SessionIdentity {
            operator_id: admin.operator_id,
            role: admin.role,
        };
        self.identity = Some(identity);
        self.gate.clear_all();

        let credentials = match db::load_credentials(&self.db, identity.operator_id).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to load credentials: {}", e);
                Vec::new()
            }
        };
        let stop_words = match db::load_stop_words(&self.db).await {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!("Failed to load stop words: {}", e);
                Vec::new()
            }
        };
        let state = match db::load_bot_state(&self.db, identity.operator_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to load bot state: {}", e);
                db::BotState::default()
            }
        };

        let report = self
            .request(|resp| RelayCommand::Login {
                identity,
                credentials,
                stop_words,
                state,
                resp,
            })
            .await
            .and_then(|r| r);

        let mut text = String::from("👋 Hi!\n\nYou are in the Twitch bot control panel.\n");
        match report {
            Ok(report) => {
                text.push_str(&format!(
                    "\nKeys: {}{}\nChannel: {}\nBot: {}\n",
                    report.credentials,
                    if report.working_credential { "" } else { " (none working)" },
                    report.channel.as_deref().unwrap_or("not set"),
                    if report.enabled { "running" } else { "stopped" },
                ));
            }
            Err(e) => {
                tracing::error!("Login failed: {}", e);
                text.push_str(&format!("\n⚠ Session could not start: {}\n", e));
            }
        }
        text.push_str(&format!(
            "\nAvailable actions:\n{}\n{}\n{}\n{}\n{}\n{}",
            BTN_ENABLE, BTN_DISABLE, BTN_CHANNEL, BTN_ADD_KEY, BTN_KEYS, BTN_STOP_WORDS
        ));
        Reply::with_menu(text)
    }

    async fn set_enabled(&self, identity: SessionIdentity, enabled: bool) -> Result<()> {
        self.request(|resp| RelayCommand::SetEnabled { enabled, resp })
            .await
            .and_then(|r| r)?;
        if let Err(e) = db::set_bot_enabled(&self.db, identity.operator_id, enabled).await {
            tracing::warn!("Failed to persist enabled flag: {}", e);
        }
        Ok(())
    }

    async fn toggle(&self, identity: SessionIdentity, enabled: bool) -> Reply {
        self.gate.clear_all();
        match self.set_enabled(identity, enabled).await {
            Ok(()) if enabled => Reply::plain("✅ Bot enabled. It now answers in the Twitch chat."),
            Ok(()) => Reply::plain("⛔ Bot stopped."),
            Err(e) => Reply::plain(format!("❌ {}", e)),
        }
    }

    /// Stops the bot, clears its buffers and pauses relaying until the dialog ends.
    async fn open_dialog(&self, identity: SessionIdentity, flag: GateFlag) {
        self.gate.enter(flag);
        if let Err(e) = self.set_enabled(identity, false).await {
            tracing::warn!("Failed to disable relay for dialog: {}", e);
        }
    }

    async fn dialog_channel(&self, identity: SessionIdentity, text: &str) -> Reply {
        let text = text.trim();
        if text.is_empty() {
            return Reply::plain("❌ The channel name cannot be empty.");
        }
        let name = text.to_string();
        let channel = match self
            .request(|resp| RelayCommand::SetChannel { name, resp })
            .await
            .and_then(|r| r)
        {
            Ok(c) => c,
            Err(e) => return Reply::plain(format!("❌ Could not switch channel: {}", e)),
        };
        self.gate.set(GateFlag::ChannelChange, false);

        let mut text = format!("✅ Channel set: {}\n\nThe bot is stopped.\nPress «{}».", channel, BTN_ENABLE);
        if let Err(e) = db::set_current_channel(&self.db, identity.operator_id, &channel).await {
            tracing::warn!("Failed to persist channel: {}", e);
            text.push_str("\n⚠ Not saved to the database.");
        }
        Reply::with_menu(text)
    }

    async fn dialog_add_key(&self, identity: SessionIdentity, text: &str) -> Reply {
        let text = text.trim();
        if text == "0" {
            self.gate.set(GateFlag::KeyAdd, false);
            return Reply::plain("❎ Adding a key was cancelled.");
        }
        let credential = text.to_string();
        let result = self
            .request(|resp| RelayCommand::AddCredential {
                credential: credential.clone(),
                resp,
            })
            .await
            .and_then(|r| r);
        self.gate.set(GateFlag::KeyAdd, false);
        if let Err(e) = result {
            return Reply::plain(format!("❌ {}", e));
        }
        if let Err(e) = db::add_credential(&self.db, identity.operator_id, &credential).await {
            tracing::warn!("Failed to persist credential: {}", e);
            return Reply::plain("✅ Key added (not saved to the database).");
        }
        Reply::plain("✅ Key added.")
    }

    async fn dialog_delete_key(&self, identity: SessionIdentity, text: &str) -> Reply {
        let text = text.trim();
        if text == "0" {
            self.gate.set(GateFlag::KeyDelete, false);
            return Reply::plain("❎ Deletion cancelled.");
        }
        let Ok(number) = text.parse::<usize>() else {
            return Reply::plain("❌ Enter the key number.");
        };
        if number == 0 {
            return Reply::plain("❌ Wrong number.");
        }
        let removed = match self
            .request(|resp| RelayCommand::RemoveCredential {
                index: number - 1,
                resp,
            })
            .await
            .and_then(|r| r)
        {
            Ok(k) => k,
            Err(_) => return Reply::plain("❌ Wrong number."),
        };
        self.gate.set(GateFlag::KeyDelete, false);
        if let Err(e) = db::delete_credential(&self.db, identity.operator_id, &removed).await {
            tracing::warn!("Failed to delete credential from the database: {}", e);
            return Reply::plain("🗑 Key removed (database not updated).");
        }
        Reply::plain("🗑 Key removed.")
    }

    async fn dialog_stop_words(&self, text: &str) -> Reply {
        let text = text.trim();
        if text == "0" {
            self.gate.set(GateFlag::StopWordEdit, false);
            return Reply::plain("Leaving stop word management.");
        }

        if let Ok(number) = text.parse::<usize>() {
            if number == 0 {
                return Reply::plain("❌ Wrong number.");
            }
            return match self
                .request(|resp| RelayCommand::RemoveStopWord {
                    index: number - 1,
                    resp,
                })
                .await
                .and_then(|r| r)
            {
                Ok(word) => match db::delete_stop_word(&self.db, &word).await {
                    Ok(()) => Reply::plain(format!("❌ Removed: {}", word)),
                    Err(e) => {
                        tracing::warn!("Failed to delete stop word from the database: {}", e);
                        Reply::plain(format!("❌ Removed: {} (database not updated)", word))
                    }
                },
                Err(_) => Reply::plain("❌ Wrong number."),
            };
        }

        let word = text.to_string();
        match self
            .request(|resp| RelayCommand::AddStopWord { word, resp })
            .await
            .and_then(|r| r)
        {
            Ok(word) => match db::add_stop_word(&self.db, &word).await {
                Ok(()) => Reply::plain(format!("✅ Added: {}", word)),
                Err(e) => {
                    tracing::warn!("Failed to persist stop word: {}", e);
                    Reply::plain(format!("✅ Added: {} (not saved to the database)", word))
                }
            },
            Err(e) => Reply::plain(format!("❌ {}", e)),
        }
    }

    /// Long-polls Telegram until the process exits.
    pub async fn run(mut self, telegram: TelegramClient) {
        if let Err(e) = telegram.delete_webhook().await {
            tracing::warn!("deleteWebhook failed: {}", e);
        }
        tracing::info!("📲 Telegram control plane started, waiting for /start");

        let policy = RetryPolicy::new(5, 500);
        let mut offset = 0i64;
        loop {
            let updates = match policy.execute_with_retry(|| telegram.get_updates(offset)).await {
                Ok(u) => u,
                Err(e) => {
                    tracing::error!("Telegram polling failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else { continue };
                let (Some(from), Some(text)) = (message.from, message.text) else {
                    continue;
                };
                tracing::debug!(
                    "Control message from {} ({})",
                    from.id,
                    from.username.as_deref().unwrap_or("-")
                );
                if let Some(reply) = self.handle_message(OperatorId(from.id), &text).await {
                    let keyboard = if reply.keyboard { Some(MAIN_KEYBOARD) } else { None };
                    if let Err(e) = telegram.send_message(message.chat.id, &reply.text, keyboard).await {
                        tracing::warn!("Failed to answer operator: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        assert_eq!(parse_action("/start"), MenuAction::Start);
        assert_eq!(parse_action("/start deep-link"), MenuAction::Start);
        assert_eq!(parse_action(BTN_KEYS), MenuAction::ShowKeys);
        assert_eq!(parse_action(" mychannel "), MenuAction::Text("mychannel".into()));
    }

    #[test]
    fn test_numbered() {
        let items = vec!["a".to_string(), "b".to_string()];
        assert_eq!(numbered(&items), "1) a\n2) b");
    }
}
