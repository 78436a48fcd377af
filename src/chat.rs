//! Live-chat collaborator: Twitch IRC over TLS, with a supervised reader that
//! reconnects on its own.

use crate::hardening::RetryPolicy;
use crate::str_utils::normalize_channel;
use crate::types::{ChatEvent, RelayError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, LinesCodec};

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn join(&self, channel: &str) -> Result<()>;
    async fn publish(&self, channel: &str, text: &str) -> Result<()>;
}

/// One parsed IRC line we care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcLine {
    Ping(String),
    Message { channel: String, event: ChatEvent },
    Ready,
    Reconnect,
    Other,
}

/// Parses a raw IRC line with optional IRCv3 tags.
pub fn parse_irc_line(line: &str) -> IrcLine {
    let line = line.trim_end_matches(['\r', '\n']);
    let (tags, rest) = match line.strip_prefix('@') {
        Some(tagged) => match tagged.split_once(' ') {
            Some((tags, rest)) => (Some(tags), rest),
            None => return IrcLine::Other,
        },
        None => (None, line),
    };

    if let Some(payload) = rest.strip_prefix("PING ") {
        return IrcLine::Ping(payload.to_string());
    }

    let (prefix, rest) = match rest.strip_prefix(':') {
        Some(p) => match p.split_once(' ') {
            Some((prefix, rest)) => (prefix, rest),
            None => return IrcLine::Other,
        },
        None => ("", rest),
    };

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let params = parts.next().unwrap_or_default();

    match command {
        "001" => IrcLine::Ready,
        "RECONNECT" => IrcLine::Reconnect,
        "PRIVMSG" => {
            let Some((target, text)) = params.split_once(" :") else {
                return IrcLine::Other;
            };
            let nick = prefix.split('!').next().unwrap_or_default();
            let display_name = tags
                .and_then(|t| {
                    t.split(';')
                        .filter_map(|kv| kv.split_once('='))
                        .find(|(k, _)| *k == "display-name")
                        .map(|(_, v)| v)
                })
                .filter(|v| !v.is_empty())
                .unwrap_or(nick);
            IrcLine::Message {
                channel: target.trim_start_matches('#').to_string(),
                event: ChatEvent::new(display_name, text),
            }
        }
        _ => IrcLine::Other,
    }
}

/// Where and how to reach the chat server.
#[derive(Clone)]
pub struct IrcSettings {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub nick: String,
    pub oauth_token: String,
    /// Base delay of the reconnect backoff; doubles per failed attempt.
    pub reconnect_base_delay_ms: u64,
}

impl std::fmt::Debug for IrcSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrcSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("nick", &self.nick)
            .field("oauth_token", &"***")
            .finish()
    }
}

type IrcReader = Box<dyn AsyncRead + Send + Unpin>;
type IrcWriter = Box<dyn AsyncWrite + Send + Unpin>;
type IrcLines = FramedRead<IrcReader, LinesCodec>;

/// Why a read session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ServerReconnect,
    Closed { welcomed: bool },
    DispatcherGone,
}

async fn dial(settings: &IrcSettings) -> Result<(IrcReader, IrcWriter)> {
    let tcp = TcpStream::connect((settings.host.as_str(), settings.port)).await?;
    if !settings.tls {
        let (r, w) = tcp.into_split();
        return Ok((Box::new(r), Box::new(w)));
    }
    let connector = tokio_native_tls::native_tls::TlsConnector::new()
        .map_err(|e| RelayError::Config(format!("TLS setup failed: {}", e)))?;
    let stream = tokio_native_tls::TlsConnector::from(connector)
        .connect(&settings.host, tcp)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::ConnectionAborted, e))?;
    let (r, w) = tokio::io::split(stream);
    Ok((Box::new(r), Box::new(w)))
}

pub struct TwitchIrc {
    settings: IrcSettings,
    writer: Mutex<Option<IrcWriter>>,
    joined: Mutex<Option<String>>,
}

impl TwitchIrc {
    /// Connects, authenticates and spawns the supervised reader feeding `tx_events`.
    /// The reader reconnects with backoff on EOF, read errors and server RECONNECT,
    /// and rejoins the current channel each time.
    pub async fn connect(settings: IrcSettings, tx_events: mpsc::Sender<ChatEvent>) -> Result<Arc<Self>> {
        let irc = Arc::new(Self {
            settings,
            writer: Mutex::new(None),
            joined: Mutex::new(None),
        });
        let lines = irc.open().await?;
        tokio::spawn(irc.clone().supervise(lines, tx_events));
        Ok(irc)
    }

    /// Dials, logs in and rejoins the last channel.
    async fn open(&self) -> Result<IrcLines> {
        let (read_half, write_half) = dial(&self.settings).await?;
        *self.writer.lock().await = Some(write_half);

        let token = if self.settings.oauth_token.starts_with("oauth:") {
            self.settings.oauth_token.clone()
        } else {
            format!("oauth:{}", self.settings.oauth_token)
        };
        self.send_raw("CAP REQ :twitch.tv/tags twitch.tv/commands").await?;
        self.send_raw(&format!("PASS {}", token)).await?;
        self.send_raw(&format!("NICK {}", self.settings.nick.to_lowercase())).await?;

        let joined = self.joined.lock().await.clone();
        if let Some(channel) = joined {
            self.send_raw(&format!("JOIN #{}", channel)).await?;
            tracing::info!("[🎮] Rejoined #{}", channel);
        }
        Ok(FramedRead::new(read_half, LinesCodec::new_with_max_length(64 * 1024)))
    }

    async fn supervise(self: Arc<Self>, mut lines: IrcLines, tx_events: mpsc::Sender<ChatEvent>) {
        let policy = RetryPolicy::new(u32::MAX, self.settings.reconnect_base_delay_ms);
        let mut attempt = 0u32;
        loop {
            match self.read_session(&mut lines, &tx_events).await {
                SessionEnd::DispatcherGone => {
                    tracing::warn!("[🎮] Dispatcher gone, stopping IRC reader");
                    return;
                }
                SessionEnd::ServerReconnect => {
                    tracing::info!("[🎮] Server requested a reconnect");
                    attempt = 0;
                }
                SessionEnd::Closed { welcomed } => {
                    tracing::warn!("[🎮] Twitch IRC connection closed");
                    if welcomed {
                        attempt = 0;
                    }
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
            *self.writer.lock().await = None;

            lines = loop {
                if tx_events.is_closed() {
                    return;
                }
                match self.open().await {
                    Ok(l) => break l,
                    Err(e) => {
                        attempt = attempt.saturating_add(1);
                        let delay = policy.delay_for(attempt);
                        tracing::warn!("[🎮] Reconnect failed: {}. Retrying in {:?}", e, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            };
        }
    }

    async fn read_session(&self, lines: &mut IrcLines, tx_events: &mpsc::Sender<ChatEvent>) -> SessionEnd {
        let mut welcomed = false;
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!("[🎮] IRC read error: {}", e);
                    break;
                }
            };
            match parse_irc_line(&line) {
                IrcLine::Ping(payload) => {
                    if let Err(e) = self.send_raw(&format!("PONG {}", payload)).await {
                        tracing::warn!("[🎮] Failed to answer PING: {}", e);
                    }
                }
                IrcLine::Ready => {
                    welcomed = true;
                    tracing::info!("[🎮] Twitch chat connected");
                }
                IrcLine::Reconnect => return SessionEnd::ServerReconnect,
                IrcLine::Message { channel, event } => {
                    // Lines still in flight from a channel we already left.
                    if self.joined.lock().await.as_deref() != Some(channel.as_str()) {
                        tracing::trace!("[🎮] Dropping message from stale #{}", channel);
                        continue;
                    }
                    tracing::trace!("[🎮] #{} {}", channel, event.formatted());
                    if tx_events.send(event).await.is_err() {
                        return SessionEnd::DispatcherGone;
                    }
                }
                IrcLine::Other => {}
            }
        }
        SessionEnd::Closed { welcomed }
    }

    async fn send_raw(&self, line: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "IRC connection is down").into());
        };
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for TwitchIrc {
    async fn join(&self, channel: &str) -> Result<()> {
        let channel = normalize_channel(channel);
        if channel.is_empty() {
            return Err(RelayError::InvalidInput("channel name is empty".into()).into());
        }
        let mut joined = self.joined.lock().await;
        if joined.as_deref() == Some(channel.as_str()) {
            return Ok(());
        }
        // Recorded before sending so a reconnect in between still rejoins it.
        let previous = joined.replace(channel.clone());
        if let Some(previous) = previous {
            self.send_raw(&format!("PART #{}", previous)).await?;
        }
        self.send_raw(&format!("JOIN #{}", channel)).await?;
        tracing::info!("[🎮] Joined #{}", channel);
        Ok(())
    }

    async fn publish(&self, channel: &str, text: &str) -> Result<()> {
        let channel = normalize_channel(channel);
        // IRC lines cannot carry raw newlines.
        let text = text.replace(['\r', '\n'], " ");
        self.send_raw(&format!("PRIVMSG #{} :{}", channel, text))
            .await
            .map_err(|e| RelayError::Publish(e.to_string()).into())
    }
}
