use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;
use std::io::Write;

lazy_static! {
    static ref SECRET_REGEX: Regex = Regex::new(
        r"(?i)(sk-[A-Za-z0-9_-]{20,}|oauth:[a-z0-9]{10,}|Bearer\s+[^\s]+|bot\d{6,}:[A-Za-z0-9_-]{30,}|\b\d{6,}:[A-Za-z0-9_-]{30,})"
    )
    .expect("Invalid redaction regex");
}

/// Replaces API keys, IRC oauth tokens and Telegram bot tokens.
pub fn redact_secrets(input: &str) -> Cow<'_, str> {
    SECRET_REGEX.replace_all(input, "[REDACTED]")
}

pub struct RedactingWriter<W: Write> {
    inner: W,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let input = String::from_utf8_lossy(buf);
        let redacted = redact_secrets(&input);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
