//! Helpers for sanitizing data before it enters logs and span attributes.
//!
//! Jobs carry personal data (names, email addresses, room photos).
//! Anything that ends up in a span field goes through here first.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Masks the local part of an email address, keeping the first character
/// and the domain.
///
/// - `maria@example.com` → `m***@example.com`
/// - `x@.` and other odd shapes degrade to `***`
pub fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let first = local.chars().next().unwrap_or('*');
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}

/// Truncates text to at most `max` characters for span fields, marking
/// the cut with an ellipsis.
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}…", cut)
}

/// Returns a short deterministic hash of an identifier for correlation
/// without exposing the value itself.
pub fn hash_id(value: &str) -> String {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    let hash = hasher.finish();
    format!("{:016x}", hash)
}
