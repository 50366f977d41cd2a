//! RFC-822 header block reading and metadata extraction

use std::io::BufRead;

use tracing::debug;

use crate::validation::{is_sage_subject, parse_date};
use crate::{NewsError, Result};

use super::types::{Article, HeaderMap};

/// Read a header block from a reader, stopping at the blank separator line
///
/// Headers are `name: value` lines; continuation lines start with whitespace
/// and are folded into the previous value with a single space. Values are
/// kept verbatim apart from the fold and the trailing line break. EOF ends
/// the block.
pub fn read_header_block<R: BufRead>(reader: &mut R) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut current: Option<(String, String)> = None;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        let text = trim_line_ending(&line);
        if text.is_empty() {
            break;
        }
        let text = String::from_utf8_lossy(text);

        if text.starts_with(' ') || text.starts_with('\t') {
            // folded continuation of the previous header
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(text.trim());
            } else {
                debug!("continuation line with no header, skipping");
            }
            continue;
        }

        if let Some((name, value)) = current.take() {
            headers.add(&name, value);
        }
        match text.split_once(':') {
            Some((name, value)) => {
                current = Some((name.trim().to_string(), value.trim_start().to_string()));
            }
            None => {
                debug!("malformed header line, skipping: {:?}", text);
            }
        }
    }
    if let Some((name, value)) = current.take() {
        headers.add(&name, value);
    }
    Ok(headers)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Build an article skeleton from a header block
///
/// Extracts the fields the pipeline works with; the body-derived fields
/// (message, attachments, signed region) are filled in by the parser. A
/// `Newsgroups` value with commas is truncated to its first entry; a
/// malformed `Date` is a parse error, a missing one posts at epoch.
pub fn extract_metadata(headers: &HeaderMap) -> Result<Article> {
    let mut article = Article {
        headers: headers.clone(),
        ..Default::default()
    };

    article.message_id = headers.get_or("Message-ID", "").to_string();
    article.subject = headers.get_or("Subject", "").to_string();
    article.path = headers.get_or("Path", "").to_string();
    article.pubkey = headers.get_or("X-Pubkey-Ed25519", "").to_string();
    article.signature = headers.get_or("X-Signature-Ed25519-Sha512", "").to_string();

    if let Some(groups) = headers.get("Newsgroups") {
        let first = groups.split(',').next().unwrap_or("").trim();
        article.newsgroup = first.to_string();
    }

    if let Some(references) = headers.get("References") {
        // the whole value is the thread root reference
        article.reference = references.trim().to_string();
    }

    if let Some(from) = headers.get("From") {
        let (name, email) = split_from(from);
        article.name = name;
        article.email = email;
    }

    match headers.get("Date") {
        Some(date) => {
            article.posted = parse_date(date)
                .map_err(|_| NewsError::Parse(format!("bad Date header: {}", date)))?;
        }
        None => article.posted = 0,
    }

    if let Some(ct) = headers.get("Content-Type") {
        // parameters are kept in the header map; the field is the bare type
        article.content_type = ct.split(';').next().unwrap_or("").trim().to_string();
    }

    article.sage = headers.contains("X-Sage") || is_sage_subject(&article.subject);

    Ok(article)
}

/// Split a `From` value into display name and address
///
/// The wire form is `Name <addr>`; a bare value becomes the name.
fn split_from(from: &str) -> (String, String) {
    if let Some((name, rest)) = from.rsplit_once('<') {
        let email = rest.trim_end().trim_end_matches('>');
        (name.trim().to_string(), email.to_string())
    } else {
        (from.trim().to_string(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read(s: &str) -> HeaderMap {
        read_header_block(&mut Cursor::new(s.as_bytes())).unwrap()
    }

    #[test]
    fn test_read_simple_block() {
        let h = read("Subject: hello\r\nMessage-ID: <abc@x>\r\n\r\nbody");
        assert_eq!(h.get("subject"), Some("hello"));
        assert_eq!(h.get("message-id"), Some("<abc@x>"));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn test_read_lf_only() {
        let h = read("Subject: hello\nNewsgroups: overchan.test\n\n");
        assert_eq!(h.get("Subject"), Some("hello"));
        assert_eq!(h.get("Newsgroups"), Some("overchan.test"));
    }

    #[test]
    fn test_folded_header() {
        let h = read("Subject: a long\n subject line\n\n");
        assert_eq!(h.get("Subject"), Some("a long subject line"));
    }

    #[test]
    fn test_repeated_header() {
        let h = read("Content-Disposition: attachment\nContent-Disposition: filename=\"a\"\n\n");
        assert_eq!(h.get_all("content-disposition").len(), 2);
    }

    #[test]
    fn test_eof_ends_block() {
        let h = read("Subject: no blank line");
        assert_eq!(h.get("Subject"), Some("no blank line"));
    }

    #[test]
    fn test_reader_positioned_at_body() {
        let mut cur = Cursor::new(&b"Subject: s\r\n\r\nthe body"[..]);
        read_header_block(&mut cur).unwrap();
        let mut rest = String::new();
        std::io::Read::read_to_string(&mut cur, &mut rest).unwrap();
        assert_eq!(rest, "the body");
    }

    #[test]
    fn test_extract_metadata_basic() {
        let h = read(
            "Message-ID: <abc@x>\nNewsgroups: overchan.test\nSubject: hello\n\
             Date: Mon, 02 Jan 2006 15:04:05 -0700\nFrom: Anon <anon@node.tld>\n\
             Path: node.tld\nContent-Type: text/plain; charset=UTF-8\n\n",
        );
        let a = extract_metadata(&h).unwrap();
        assert_eq!(a.message_id, "<abc@x>");
        assert_eq!(a.newsgroup, "overchan.test");
        assert_eq!(a.subject, "hello");
        assert_eq!(a.posted, 1136239445);
        assert_eq!(a.name, "Anon");
        assert_eq!(a.email, "anon@node.tld");
        assert_eq!(a.path, "node.tld");
        assert_eq!(a.content_type, "text/plain");
        assert!(!a.sage);
        assert!(a.is_op());
    }

    #[test]
    fn test_extract_newsgroups_comma_truncated() {
        let h = read("Newsgroups: overchan.a,overchan.b\n\n");
        let a = extract_metadata(&h).unwrap();
        assert_eq!(a.newsgroup, "overchan.a");
    }

    #[test]
    fn test_extract_reference() {
        let h = read("References: <root@x>\n\n");
        let a = extract_metadata(&h).unwrap();
        assert_eq!(a.reference, "<root@x>");
        assert!(!a.is_op());
    }

    #[test]
    fn test_extract_reference_keeps_full_value() {
        let h = read("References: <root@x> <mid@x>\n\n");
        let a = extract_metadata(&h).unwrap();
        assert_eq!(a.reference, "<root@x> <mid@x>");
    }

    #[test]
    fn test_extract_sage_header() {
        let h = read("Subject: hello\nX-Sage: 1\n\n");
        assert!(extract_metadata(&h).unwrap().sage);
    }

    #[test]
    fn test_extract_sage_subject() {
        let h = read("Subject: Sage re: hello\n\n");
        assert!(extract_metadata(&h).unwrap().sage);
    }

    #[test]
    fn test_extract_bad_date_is_parse_error() {
        let h = read("Date: yesterday-ish\n\n");
        assert!(matches!(extract_metadata(&h), Err(NewsError::Parse(_))));
    }

    #[test]
    fn test_split_from_bare() {
        let h = read("From: anonymous\n\n");
        let a = extract_metadata(&h).unwrap();
        assert_eq!(a.name, "anonymous");
        assert_eq!(a.email, "");
    }

    #[test]
    fn test_extract_signature_headers() {
        let h = read("X-Pubkey-Ed25519: aabb\nX-Signature-Ed25519-Sha512: ccdd\n\n");
        let a = extract_metadata(&h).unwrap();
        assert_eq!(a.pubkey, "aabb");
        assert_eq!(a.signature, "ccdd");
    }
}
