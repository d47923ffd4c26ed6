//! Utility helpers for phone numbers and log-safe strings

/// Truncate a string to at most `max_bytes` bytes, ensuring the cut lands on a
/// valid UTF-8 char boundary. Returns the longest prefix that fits.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Reduce a phone number or JID to its digits.
///
/// Accepts E.164 (`+5511999990000`), formatted input (`(11) 99999-0000`) and
/// JIDs (`5511999990000@s.whatsapp.net`). Returns `None` when no digit is left.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let local = raw.split('@').next().unwrap_or(raw);
    let digits: String = local.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() { None } else { Some(digits) }
}

/// Mask all but the last four digits, for info-level logs.
pub fn mask_phone(raw: &str) -> String {
    let digits = normalize_phone(raw).unwrap_or_default();
    if digits.len() <= 4 {
        return "*".repeat(digits.len());
    }
    let visible = &digits[digits.len() - 4..];
    format!("{}{}", "*".repeat(digits.len() - 4), visible)
}
