//! Article field validation
//!
//! Syntactic checks applied before any filesystem or index access: message-id
//! form, newsgroup names, dates, and the hex-encoded key material carried in
//! signature headers.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha512};

use crate::{NewsError, Result};

/// Maximum accepted message-id length, the NNTP line-length ceiling
pub const MAX_MESSAGE_ID_LEN: usize = 250;

/// The reserved control newsgroup, excluded from global orderings
pub const CONTROL_GROUP: &str = "ctl";

/// Check whether a message-id is syntactically valid
///
/// A message-id is valid iff it begins with `<`, ends with `>`, contains `@`,
/// and is within NNTP length limits. This gate is applied before any
/// filesystem lookup keyed by message-id.
///
/// # Examples
///
/// ```
/// use newsd::validation::valid_message_id;
///
/// assert!(valid_message_id("<abc123@example.tld>"));
/// assert!(!valid_message_id("abc123@example.tld"));  // missing brackets
/// assert!(!valid_message_id("<abc123>"));            // missing @
/// ```
#[must_use]
pub fn valid_message_id(message_id: &str) -> bool {
    message_id.len() >= 5
        && message_id.len() <= MAX_MESSAGE_ID_LEN
        && message_id.starts_with('<')
        && message_id.ends_with('>')
        && message_id.contains('@')
        && !message_id.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Validate a newsgroup name
///
/// Components are dot-separated, non-empty, and limited to lowercase
/// letters, digits, `+`, `-`, and `_`.
pub fn validate_newsgroup(newsgroup: &str) -> Result<()> {
    if newsgroup.is_empty() {
        return Err(NewsError::InvalidNewsgroup("empty name".to_string()));
    }
    if newsgroup.starts_with('.') || newsgroup.ends_with('.') {
        return Err(NewsError::InvalidNewsgroup(format!(
            "leading or trailing dot: {}",
            newsgroup
        )));
    }
    for component in newsgroup.split('.') {
        if component.is_empty() {
            return Err(NewsError::InvalidNewsgroup(format!(
                "empty component: {}",
                newsgroup
            )));
        }
        for ch in component.chars() {
            if !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '+' || ch == '-' || ch == '_') {
                return Err(NewsError::InvalidNewsgroup(format!(
                    "invalid character {:?} in {}",
                    ch, newsgroup
                )));
            }
        }
    }
    Ok(())
}

/// Parse a `Date` header (RFC 1123Z / RFC 2822) into unix seconds
///
/// Accepts the common `GMT` zone variation found in the wild.
///
/// # Examples
///
/// ```
/// use newsd::validation::parse_date;
///
/// let posted = parse_date("Mon, 02 Jan 2006 15:04:05 -0700").unwrap();
/// assert_eq!(posted, 1136239445);
/// ```
pub fn parse_date(date_str: &str) -> Result<i64> {
    match DateTime::parse_from_rfc2822(date_str) {
        Ok(dt) => Ok(dt.with_timezone(&Utc).timestamp()),
        Err(_) => {
            if date_str.contains("GMT") {
                let normalized = date_str.replace("GMT", "+0000");
                if let Ok(dt) = DateTime::parse_from_rfc2822(&normalized) {
                    return Ok(dt.with_timezone(&Utc).timestamp());
                }
            }
            Err(NewsError::Parse(format!("invalid date: {}", date_str)))
        }
    }
}

/// Is this subject line a sage?
///
/// A sage reply never bumps its thread. The subject form is `sage` alone or
/// a `sage ` prefix, case-insensitive; the `X-Sage` header is the other
/// trigger and is handled during header extraction.
#[must_use]
pub fn is_sage_subject(subject: &str) -> bool {
    let s = subject.trim().to_ascii_lowercase();
    s == "sage" || s.starts_with("sage ")
}

/// Hash a message-id for the short hash→message-id mapping
#[must_use]
pub fn hash_message_id(message_id: &str) -> String {
    hex::encode(Sha512::digest(message_id.as_bytes()))
}

/// Decode a hex-encoded Ed25519 public key, enforcing the 32-byte length
pub fn decode_pubkey(pubkey_hex: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(pubkey_hex.trim())?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| NewsError::InvalidPubkeyLength(bytes.len()))
}

/// Decode a hex-encoded Ed25519 signature, enforcing the 64-byte length
pub fn decode_signature(sig_hex: &str) -> Result<[u8; 64]> {
    let bytes = hex::decode(sig_hex.trim())?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| NewsError::InvalidSignatureLength(bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_message_id() {
        assert!(valid_message_id("<abc123@example.tld>"));
        assert!(valid_message_id("<a@b>"));
        assert!(valid_message_id("<very.long.local-part_123@node.example.tld>"));
    }

    #[test]
    fn test_message_id_missing_brackets() {
        assert!(!valid_message_id("abc123@example.tld"));
        assert!(!valid_message_id("<abc123@example.tld"));
        assert!(!valid_message_id("abc123@example.tld>"));
    }

    #[test]
    fn test_message_id_missing_at() {
        assert!(!valid_message_id("<abc123>"));
        assert!(!valid_message_id("<abc123.example.tld>"));
    }

    #[test]
    fn test_message_id_whitespace() {
        assert!(!valid_message_id("<abc 123@example.tld>"));
        assert!(!valid_message_id("<abc123@example.tld >"));
    }

    #[test]
    fn test_message_id_too_long() {
        let long = format!("<{}@x>", "a".repeat(MAX_MESSAGE_ID_LEN));
        assert!(!valid_message_id(&long));
    }

    #[test]
    fn test_message_id_too_short() {
        assert!(!valid_message_id("<@>"));
    }

    #[test]
    fn test_validate_newsgroup_valid() {
        assert!(validate_newsgroup("overchan.test").is_ok());
        assert!(validate_newsgroup("ctl").is_ok());
        assert!(validate_newsgroup("overchan.ru_board-2+").is_ok());
    }

    #[test]
    fn test_validate_newsgroup_invalid() {
        assert!(validate_newsgroup("").is_err());
        assert!(validate_newsgroup(".overchan").is_err());
        assert!(validate_newsgroup("overchan.").is_err());
        assert!(validate_newsgroup("over..chan").is_err());
        assert!(validate_newsgroup("Overchan.test").is_err());
        assert!(validate_newsgroup("overchan/test").is_err());
    }

    #[test]
    fn test_parse_date_rfc1123z() {
        assert_eq!(parse_date("Mon, 02 Jan 2006 15:04:05 -0700").unwrap(), 1136239445);
    }

    #[test]
    fn test_parse_date_gmt_variant() {
        assert_eq!(parse_date("Mon, 02 Jan 2006 22:04:05 GMT").unwrap(), 1136239445);
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date("not a date").is_err());
        assert!(parse_date("2006-01-02").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn test_is_sage_subject() {
        assert!(is_sage_subject("sage"));
        assert!(is_sage_subject("Sage re: hello"));
        assert!(is_sage_subject("  SAGE goes in all fields"));
        assert!(!is_sage_subject("sageguro"));
        assert!(!is_sage_subject("hello"));
    }

    #[test]
    fn test_hash_message_id_stable() {
        let a = hash_message_id("<abc@x>");
        let b = hash_message_id("<abc@x>");
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
        assert_ne!(a, hash_message_id("<def@x>"));
    }

    #[test]
    fn test_decode_pubkey_length() {
        let good = "aa".repeat(32);
        assert!(decode_pubkey(&good).is_ok());
        let short = "aa".repeat(16);
        assert!(matches!(decode_pubkey(&short), Err(NewsError::InvalidPubkeyLength(16))));
        assert!(matches!(decode_pubkey("zz"), Err(NewsError::Hex(_))));
    }

    #[test]
    fn test_decode_signature_length() {
        let good = "bb".repeat(64);
        assert!(decode_signature(&good).is_ok());
        let short = "bb".repeat(10);
        assert!(matches!(
            decode_signature(&short),
            Err(NewsError::InvalidSignatureLength(10))
        ));
    }
}
