//! Helpers for sanitizing data before it reaches logs or the UI.
//!
//! Logs are safe to share for debugging. These functions ensure no session
//! tokens, full email addresses or oversized server bodies leak into them.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Maximum length for server error bodies kept in error messages.
pub const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Shortens a hash for display: the first `keep` characters followed by
/// `...`. Values no longer than `keep` are returned unchanged.
pub fn truncate_hash(hash: &str, keep: usize) -> String {
    match hash.char_indices().nth(keep) {
        Some((cut, _)) => format!("{}...", &hash[..cut]),
        None => hash.to_string(),
    }
}

/// Truncates a response body to [`MAX_ERROR_BODY_LENGTH`] characters.
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        Some((cut, _)) => format!("{}... (truncated)", &body[..cut]),
        None => body.to_string(),
    }
}

/// Masks the local part of an email address.
///
/// - `ada@example.com` → `a***@example.com`
/// - `not-an-email` → `***`
pub fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}

/// Returns a short deterministic fingerprint of a secret for correlating log
/// lines without exposing the value.
pub fn fingerprint(secret: &str) -> String {
    let mut hasher = DefaultHasher::new();
    secret.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}
