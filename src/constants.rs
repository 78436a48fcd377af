/// OpenRouter API endpoints
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-r1:free";

/// Twitch IRC gateway (TLS, token auth)
pub const TWITCH_RECONNECT_BASE_DELAY_MS: u64 = 1000;
pub const TWITCH_IRC_HOST: &str = "irc.chat.twitch.tv";
pub const TWITCH_IRC_PORT: u16 = 6697;

/// Telegram Bot API
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const TELEGRAM_POLL_TIMEOUT_SECS: u64 = 30;

/// Database defaults
pub const DB_PRAGMAS: &[&str] = &[
    "PRAGMA journal_mode = WAL",
    "PRAGMA synchronous = NORMAL",
    "PRAGMA busy_timeout = 5000",
];

/// Rolling chat window used as prompt context.
pub const CHAT_WINDOW_CAPACITY: usize = 7;

/// Inclusive range the response threshold is drawn from.
pub const THRESHOLD_MIN: usize = 7;
pub const THRESHOLD_MAX: usize = 12;

/// Replies longer than this are swapped for a bare decoration token.
pub const MAX_REPLY_CHARS: usize = 70;

pub const REPLY_MAX_TOKENS: u32 = 60;
pub const PROBE_MAX_TOKENS: u32 = 5;
pub const DEFAULT_PROBE_ROUNDS: u32 = 3;

/// Credentials are shown with at most this many leading characters.
pub const CREDENTIAL_PREVIEW_CHARS: usize = 12;

pub const REPLY_SYSTEM_PROMPT: &str =
    "You are a regular viewer in a Twitch chat. Do not pretend to be a bot. Write naturally.";

pub const REPLY_DIRECTIVE: &str = "Reply like a regular participant of this Twitch chat.\n\
The reply is short (under 10 words), all lowercase, with no punctuation at the end.\n\n\
Chat history:\n";

pub const PROBE_SYSTEM_PROMPT: &str = "answer 'ok'";
pub const PROBE_PROMPT: &str = "answer with one word: ok";

/// Emotes appended to published replies. The blank entries make an
/// undecorated reply the common case.
pub const DECORATIONS: &[&str] = &[
    "<3",
    "PoroSad",
    "WhySoSerious",
    "BangbooBounce",
    "SUBprise",
    "BloodTrail",
    "DinoDance",
    "CoolCat",
    "BabyRage",
    "ItsBoshyTime",
    "NotLikeThis",
    " ",
    " ",
    " ",
    " ",
    " ",
    " ",
    " ",
    " ",
    " ",
    " ",
    " ",
];
