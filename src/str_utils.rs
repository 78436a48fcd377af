use crate::constants::CREDENTIAL_PREVIEW_CHARS;

/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Shortened form of a credential for logs and operator listings.
pub fn mask_credential(credential: &str) -> String {
    if credential.chars().count() > CREDENTIAL_PREVIEW_CHARS {
        format!("{}...", prefix_chars(credential, CREDENTIAL_PREVIEW_CHARS))
    } else {
        credential.to_string()
    }
}

/// Normalizes a channel name the way operators tend to type it (`@Name`, `#name`).
pub fn normalize_channel(name: &str) -> String {
    name.trim()
        .trim_start_matches(['@', '#'])
        .to_lowercase()
}
