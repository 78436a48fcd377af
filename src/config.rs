use crate::constants::{
    DEFAULT_MODEL, DEFAULT_PROBE_ROUNDS, OPENROUTER_BASE_URL, TWITCH_IRC_HOST, TWITCH_IRC_PORT,
    TWITCH_RECONNECT_BASE_DELAY_MS,
};
use crate::types::{RelayError, Result};
use clap::Parser;
use std::collections::HashMap;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value = "chatrelay.db")]
    pub database: String,
    #[arg(long, default_value = OPENROUTER_BASE_URL)]
    pub openrouter_base_url: String,
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,
    #[arg(long, default_value_t = 60)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = DEFAULT_PROBE_ROUNDS)]
    pub probe_rounds: u32,
    #[arg(long, default_value = TWITCH_IRC_HOST)]
    pub twitch_host: String,
    #[arg(long, default_value_t = TWITCH_IRC_PORT)]
    pub twitch_port: u16,
    /// Connect to the chat server without TLS (local test servers only).
    #[arg(long)]
    pub twitch_plaintext: bool,
    #[arg(long, default_value_t = TWITCH_RECONNECT_BASE_DELAY_MS)]
    pub twitch_reconnect_delay_ms: u64,
    #[arg(long, default_value = "logs")]
    pub log_dir: String,
    #[arg(long, default_value = "127.0.0.1:8099")]
    pub health_addr: String,
}

/// Secrets read from the `config` table, each overridable by an environment variable.
#[derive(Clone)]
pub struct Secrets {
    pub telegram_api_key: String,
    pub twitch_oauth_token: Option<String>,
    pub twitch_nick: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("telegram_api_key", &"***")
            .field("twitch_oauth_token", &self.twitch_oauth_token.as_ref().map(|_| "***"))
            .field("twitch_nick", &self.twitch_nick)
            .finish()
    }
}

fn pick(env: &HashMap<String, String>, stored: &HashMap<String, String>, env_key: &str, db_key: &str) -> Option<String> {
    env.get(env_key)
        .or_else(|| stored.get(db_key))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Secrets {
    /// Resolves secrets from the stored config and an environment snapshot.
    /// The Telegram key is the only mandatory one.
    pub fn resolve(stored: &HashMap<String, String>, env: &HashMap<String, String>) -> Result<Self> {
        let telegram_api_key = pick(env, stored, "TELEGRAM_API_KEY", "telegram_api_key").ok_or_else(|| {
            RelayError::Config("telegram_api_key is missing from both the config table and the environment".into())
        })?;
        Ok(Self {
            telegram_api_key,
            twitch_oauth_token: pick(env, stored, "TWITCH_OAUTH_TOKEN", "twitch_oauth_token"),
            twitch_nick: pick(env, stored, "TWITCH_NICK", "twitch_nick"),
        })
    }

    pub fn from_process_env(stored: &HashMap<String, String>) -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::resolve(stored, &env)
    }
}
