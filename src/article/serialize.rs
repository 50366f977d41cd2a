//! Wire serialization of articles
//!
//! Writes the exact article form peers exchange: RFC-822 headers, then either
//! the plain text body, the retained signed region, or a MIME multipart body
//! with one text part and one base64 part per attachment.

use std::io::Write;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;

use crate::Result;

use super::types::{Article, HeaderMap};

/// Wire line delimiter
pub const CRLF: &str = "\r\n";
/// On-disk line delimiter
pub const LF: &str = "\n";

/// Preamble text written before the first multipart boundary
const MULTIPART_PREAMBLE: &str = "SRNDv2 Multipart UGUU";

/// Headers the serializer emits itself; anything else in the map is extra
const KNOWN_HEADERS: &[&str] = &[
    "Mime-Version",
    "Content-Type",
    "From",
    "Date",
    "X-Pubkey-Ed25519",
    "X-Signature-Ed25519-Sha512",
    "Newsgroups",
    "Subject",
    "Message-Id",
    "References",
    "Path",
    "X-Sage",
];

/// Write a header block verbatim, one line per value, ending with the blank
/// separator line
pub fn write_headers<W: Write>(w: &mut W, headers: &HeaderMap, delim: &str) -> Result<()> {
    for (name, values) in headers.iter() {
        for value in values {
            write!(w, "{}: {}{}", name, value, delim)?;
        }
    }
    write!(w, "{}", delim)?;
    Ok(())
}

/// Serialize an article to its wire form
///
/// `delim` selects the line delimiter: [`CRLF`] on the wire, [`LF`] on disk.
/// Articles with attachments become `multipart/mixed` with a fresh random
/// boundary; signed articles write their retained signed region as the body.
pub fn write_article<W: Write>(w: &mut W, article: &Article, delim: &str) -> Result<()> {
    let mut line = |w: &mut W, s: &str| -> Result<()> {
        write!(w, "{}{}", s, delim)?;
        Ok(())
    };

    let boundary = random_boundary();
    let content_type = if article.attachments.is_empty() {
        if article.content_type.is_empty() {
            "text/plain; charset=UTF-8".to_string()
        } else {
            article.content_type.clone()
        }
    } else {
        line(w, "Mime-Version: 1.0")?;
        format!("multipart/mixed; boundary=\"{}\"", boundary)
    };
    line(w, &format!("Content-Type: {}", content_type))?;
    line(w, &format!("From: {} <{}>", article.name, article.email))?;
    line(w, &format!("Date: {}", format_date(article.posted)))?;
    if article.is_signed() {
        line(w, &format!("X-pubkey-ed25519: {}", article.pubkey))?;
        line(
            w,
            &format!("X-signature-ed25519-sha512: {}", article.signature),
        )?;
    }
    line(w, &format!("Newsgroups: {}", article.newsgroup))?;
    line(w, &format!("Subject: {}", article.subject))?;
    line(w, &format!("Message-ID: {}", article.message_id))?;
    if !article.reference.is_empty() {
        line(w, &format!("References: {}", article.reference))?;
    }
    line(w, &format!("Path: {}", article.path))?;
    if article.sage && !crate::validation::is_sage_subject(&article.subject) {
        line(w, "X-Sage: 1")?;
    }
    for (name, values) in article.headers.iter() {
        if KNOWN_HEADERS.contains(&name) {
            continue;
        }
        for value in values {
            line(w, &format!("{}: {}", name, value))?;
        }
    }
    line(w, "")?;

    // a signed article replays its signed region untouched
    if !article.signed_body.is_empty() {
        line(w, &article.signed_body)?;
        return Ok(());
    }

    if article.attachments.is_empty() {
        line(w, &article.message)?;
        return Ok(());
    }

    line(w, MULTIPART_PREAMBLE)?;
    line(w, &format!("--{}", boundary))?;
    line(w, "Content-Type: text/plain; charset=UTF-8")?;
    line(w, "Content-Transfer-Encoding: 8bit")?;
    line(w, "")?;
    line(w, &article.message)?;
    for att in &article.attachments {
        line(w, &format!("--{}", boundary))?;
        line(w, &format!("Content-Type: {}", att.mime))?;
        line(
            w,
            &format!("Content-Disposition: attachment; filename=\"{}\"", att.filename),
        )?;
        line(w, "Content-Transfer-Encoding: base64")?;
        line(w, "")?;
        let encoded = STANDARD.encode(&att.data);
        for chunk in encoded.as_bytes().chunks(76) {
            w.write_all(chunk)?;
            write!(w, "{}", delim)?;
        }
    }
    line(w, &format!("--{}--", boundary))?;
    Ok(())
}

/// 30 random bytes as hex, long enough to never collide with body content
fn random_boundary() -> String {
    let mut bytes = [0u8; 30];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// RFC 1123Z date form used by the `Date` header
fn format_date(posted: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp(posted, 0).unwrap_or_default();
    dt.format("%a, %d %b %Y %H:%M:%S %z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::types::Attachment;

    fn plain_article() -> Article {
        Article {
            message_id: "<abc@x>".to_string(),
            newsgroup: "overchan.test".to_string(),
            subject: "hello".to_string(),
            name: "Anon".to_string(),
            email: "anon@node.tld".to_string(),
            path: "node.tld".to_string(),
            posted: 1136239445,
            content_type: "text/plain".to_string(),
            message: "hi".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_format_date_rfc1123z() {
        assert_eq!(format_date(1136239445), "Mon, 02 Jan 2006 22:04:05 +0000");
    }

    #[test]
    fn test_write_plain_article() {
        let mut out = Vec::new();
        write_article(&mut out, &plain_article(), CRLF).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("From: Anon <anon@node.tld>\r\n"));
        assert!(text.contains("Message-ID: <abc@x>\r\n"));
        assert!(text.contains("Newsgroups: overchan.test\r\n"));
        assert!(text.contains("\r\n\r\nhi\r\n"));
        assert!(!text.contains("References:"));
        assert!(!text.contains("Mime-Version"));
    }

    #[test]
    fn test_write_reply_includes_references() {
        let mut article = plain_article();
        article.reference = "<root@x>".to_string();
        let mut out = Vec::new();
        write_article(&mut out, &article, LF).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("References: <root@x>\n"));
    }

    #[test]
    fn test_write_multipart() {
        let mut article = plain_article();
        article.message = "see pic".to_string();
        article
            .attachments
            .push(Attachment::from_bytes(vec![1, 2, 3, 4], "image/png", "pic.png"));
        let mut out = Vec::new();
        write_article(&mut out, &article, CRLF).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Mime-Version: 1.0\r\n"));
        assert!(text.contains("multipart/mixed; boundary=\""));
        assert!(text.contains("SRNDv2 Multipart UGUU\r\n"));
        assert!(text.contains("Content-Disposition: attachment; filename=\"pic.png\"\r\n"));
        assert!(text.contains("Content-Transfer-Encoding: base64\r\n"));
        assert!(text.contains(&STANDARD.encode([1u8, 2, 3, 4])));
        // terminator present
        let boundary_line = text
            .lines()
            .find(|l| l.starts_with("--") && l.ends_with("--"))
            .unwrap();
        assert!(boundary_line.len() > 4);
    }

    #[test]
    fn test_write_signed_headers() {
        let mut article = plain_article();
        article.pubkey = "aa".repeat(32);
        article.signature = "bb".repeat(64);
        article.signed_body = "mod line 1\nmod line 2".to_string();
        let mut out = Vec::new();
        write_article(&mut out, &article, LF).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(&format!("X-pubkey-ed25519: {}\n", article.pubkey)));
        assert!(text.contains("mod line 1\nmod line 2\n"));
        // signed region replaces the plain message body
        assert!(!text.ends_with("hi\n"));
    }

    #[test]
    fn test_write_headers_block() {
        let mut h = HeaderMap::new();
        h.set("Subject", "s");
        h.add("Content-Disposition", "attachment");
        h.add("Content-Disposition", "filename=\"a\"");
        let mut out = Vec::new();
        write_headers(&mut out, &h, CRLF).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Subject: s\r\n"));
        assert!(text.contains("Content-Disposition: attachment\r\n"));
        assert!(text.contains("Content-Disposition: filename=\"a\"\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_random_boundary_length() {
        let b = random_boundary();
        assert_eq!(b.len(), 60);
        assert_ne!(b, random_boundary());
    }
}
