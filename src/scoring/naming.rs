//! `(SC:x.y)` suffixes on model display names.
//!
//! A suffix is a trailing `(SC:<digits>.<digits>)`, optionally surrounded
//! by whitespace. Everything here is idempotent: adding a suffix to a name
//! that already has one replaces it.

/// `7.25` → `(SC:7.3)`.
pub fn format_suffix(score: f64) -> String {
    format!("(SC:{score:.1})")
}

/// Split `"GPT-4o (SC:7.3)"` into `("GPT-4o", 7.3)`.
fn split_suffix(name: &str) -> Option<(&str, f64)> {
    let trimmed = name.trim_end();
    let body = trimmed.strip_suffix(')')?;
    let open = body.rfind("(SC:")?;
    let number = &body[open + 4..];

    let (int, frac) = number.split_once('.')?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int) || !all_digits(frac) {
        return None;
    }
    let score = number.parse().ok()?;
    Some((trimmed[..open].trim_end(), score))
}

pub fn has_suffix(name: &str) -> bool {
    split_suffix(name).is_some()
}

pub fn extract_score(name: &str) -> Option<f64> {
    split_suffix(name).map(|(_, score)| score)
}

/// The name without its suffix (and the whitespace before it).
pub fn remove_suffix(name: &str) -> &str {
    match split_suffix(name) {
        Some((base, _)) => base,
        None => name,
    }
}

/// `"GPT-4o"` + 7.3 → `"GPT-4o (SC:7.3)"`, replacing any existing suffix.
pub fn with_suffix(name: &str, score: f64) -> String {
    let base = remove_suffix(name);
    if base.is_empty() {
        format_suffix(score)
    } else {
        format!("{} {}", base, format_suffix(score))
    }
}
