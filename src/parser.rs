//! Recursive article body parsing
//!
//! The body of an article is one of three shapes, selected by the top-level
//! `Content-Type`: a multipart container of text and attachments, a signed
//! `message/rfc822` envelope wrapping a complete inner article, or a plain
//! single-part body. Envelopes recurse until an unsigned article is reached;
//! that innermost article is the one that exists.
//!
//! An optional tee sink receives every byte read from the outermost body, so
//! the file store captures the exact wire form while parsing happens. The tee
//! is composed once at entry; the inner parse of a signed envelope always
//! discards (the outer bytes are what gets persisted).

use std::io::{self, BufRead, BufReader, Cursor, Read, Write};

use sha2::{Digest, Sha512};
use tracing::{debug, warn};

use crate::article::{extract_metadata, read_header_block, Article, Attachment, HeaderMap};
use crate::mime::{MediaType, MultipartReader};
use crate::store::BlobStore;
use crate::validation::{decode_pubkey, decode_signature};
use crate::verify::verify_detached;
use crate::{NewsError, Result};

/// Upper bound on MIME parts in one article
pub const MAX_MIME_PARTS: usize = 32;

/// Reader adapter that copies everything read into a sink
pub struct TeeReader<'a, R> {
    inner: R,
    sink: &'a mut dyn Write,
}

impl<'a, R: Read> TeeReader<'a, R> {
    /// Tee `inner` into `sink`
    pub fn new(inner: R, sink: &'a mut dyn Write) -> Self {
        Self { inner, sink }
    }
}

impl<R: Read> Read for TeeReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.sink.write_all(&buf[..n])?;
        }
        Ok(n)
    }
}

/// Parse a complete raw article: header block, blank line, body
///
/// Used when re-materializing a stored article; no blob store, no tee.
pub fn read_message<R: BufRead>(mut reader: R) -> Result<Article> {
    let headers = read_header_block(&mut reader)?;
    read_message_body(reader, headers, None, None, false)
}

/// Parse an article body whose headers were already read
///
/// * `store`: attachments are saved here when supplied; without it the
///   decoded bytes stay on the attachment.
/// * `tee`: receives every byte read from the outermost body.
/// * `discard_attachments`: read parts but keep and persist nothing of
///   their bodies; disables the tee as well.
///
/// For a signed envelope the inner body is hashed while buffering, the
/// detached signature is checked, and parsing recurses into the inner
/// message. The returned article is the innermost unsigned one.
pub fn read_message_body<R: BufRead>(
    body: R,
    headers: HeaderMap,
    store: Option<&BlobStore>,
    tee: Option<&mut dyn Write>,
    discard_attachments: bool,
) -> Result<Article> {
    let mut article = extract_metadata(&headers)?;

    let raw_type = headers.get_or("Content-Type", "text/plain; charset=UTF-8");
    let media = MediaType::parse(raw_type)?;

    // compose the tee once; a discarded or absent sink tees into /dev/null
    let mut null = io::sink();
    let sink: &mut dyn Write = match tee {
        Some(w) if !discard_attachments => w,
        _ => &mut null,
    };
    let mut body = BufReader::new(TeeReader::new(body, sink));

    if let Some(boundary) = media.boundary() {
        read_multipart(&mut body, boundary, store, discard_attachments, &mut article)?;
        return Ok(article);
    }

    if media.essence() == "message/rfc822" {
        return read_envelope(&mut body, &headers, store, &article);
    }

    // single part: the raw body is the message text, whatever the type
    let mut buf = Vec::new();
    body.read_to_end(&mut buf)?;
    article.message = String::from_utf8_lossy(&buf).into_owned();
    if article.is_signed() {
        article.signed_body = article.message.clone();
    }
    Ok(article)
}

fn read_multipart<R: BufRead>(
    body: R,
    boundary: &str,
    store: Option<&BlobStore>,
    discard_attachments: bool,
    article: &mut Article,
) -> Result<()> {
    let mut parts = MultipartReader::new(body, boundary);
    let mut count = 0usize;
    while let Some(part) = parts.next_part()? {
        count += 1;
        if count > MAX_MIME_PARTS {
            return Err(NewsError::Parse(format!(
                "too many parts in {}",
                article.message_id
            )));
        }
        let part_type = match MediaType::parse(part.content_type()) {
            Ok(mt) => mt,
            Err(e) => {
                // a malformed part type skips the part, not the article
                warn!("skipping part with bad content type: {}", e);
                continue;
            }
        };
        if part_type.essence() == "text/plain" {
            let data = part.decoded()?;
            article.message.push_str(&String::from_utf8_lossy(&data));
            continue;
        }
        let data = part.decoded()?;
        let filename = part.filename().unwrap_or_default();
        let mut attachment = Attachment::from_bytes(data, part_type.essence(), filename);
        if discard_attachments {
            attachment.clear_data();
        } else if let Some(blobs) = store {
            blobs.save(&attachment.data, &attachment.extension)?;
            attachment.clear_data();
        }
        article.attachments.push(attachment);
    }
    Ok(())
}

fn read_envelope<R: BufRead>(
    body: &mut R,
    headers: &HeaderMap,
    store: Option<&BlobStore>,
    outer: &Article,
) -> Result<Article> {
    let pubkey_hex = headers.get_or("X-Pubkey-Ed25519", "");
    let sig_hex = headers.get_or("X-Signature-Ed25519-Sha512", "");
    if pubkey_hex.is_empty() || sig_hex.is_empty() {
        warn!("signed envelope missing key or signature header");
        return Err(NewsError::InvalidHeaders);
    }
    let pubkey = decode_pubkey(pubkey_hex)?;
    let sig = decode_signature(sig_hex)?;

    // hash the inner body while buffering it for the recursive parse
    let mut hasher = Sha512::new();
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = body.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        buffer.extend_from_slice(&chunk[..n]);
    }
    let hash: [u8; 64] = hasher.finalize().into();

    if !verify_detached(&hash, &sig, &pubkey) {
        warn!("invalid envelope signature from {}", pubkey_hex);
        return Err(NewsError::InvalidSignature(outer.message_id.clone()));
    }
    debug!("envelope signature verified from {}", pubkey_hex);

    let mut inner = BufReader::new(Cursor::new(buffer));
    let inner_headers = read_header_block(&mut inner)?;
    let mut article = read_message_body(
        inner,
        inner_headers,
        store,
        Some(&mut io::sink()),
        false,
    )?;

    // the innermost article carries the envelope's key material
    if article.pubkey.is_empty() {
        article.pubkey = pubkey_hex.to_string();
        article.signature = sig_hex.to_string();
    }
    Ok(article)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use std::io::Cursor;

    fn parse_raw(raw: &str) -> Result<Article> {
        read_message(BufReader::new(Cursor::new(raw.as_bytes().to_vec())))
    }

    const PLAIN: &str = "Content-Type: text/plain\r\n\
        Message-ID: <abc@x>\r\n\
        Newsgroups: overchan.test\r\n\
        Subject: hello\r\n\
        Date: Mon, 02 Jan 2006 15:04:05 -0700\r\n\
        \r\n\
        hi";

    #[test]
    fn test_parse_plain_article() {
        let a = parse_raw(PLAIN).unwrap();
        assert_eq!(a.message_id, "<abc@x>");
        assert_eq!(a.newsgroup, "overchan.test");
        assert_eq!(a.posted, 1136239445);
        assert_eq!(a.message, "hi");
        assert!(a.attachments.is_empty());
        assert!(a.is_op());
    }

    #[test]
    fn test_parse_no_content_type_defaults_plain() {
        let raw = "Message-ID: <abc@x>\r\nNewsgroups: overchan.test\r\n\r\nbody text";
        let a = parse_raw(raw).unwrap();
        assert_eq!(a.message, "body text");
    }

    #[test]
    fn test_parse_bad_top_level_type_fails() {
        let raw = "Content-Type: garbage\r\nMessage-ID: <abc@x>\r\n\r\nbody";
        assert!(matches!(parse_raw(raw), Err(NewsError::Parse(_))));
    }

    fn multipart_raw() -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        [
            "Content-Type: multipart/mixed; boundary=\"bnd\"",
            "Message-ID: <pic@x>",
            "Newsgroups: overchan.test",
            "Subject: pic post",
            "",
            "SRNDv2 Multipart UGUU",
            "--bnd",
            "Content-Type: text/plain; charset=UTF-8",
            "Content-Transfer-Encoding: 8bit",
            "",
            "see pic",
            "--bnd",
            "Content-Type: image/png",
            "Content-Disposition: attachment; filename=\"pic.png\"",
            "Content-Transfer-Encoding: base64",
            "",
            &STANDARD.encode(b"png bytes here"),
            "--bnd--",
            "",
        ]
        .join("\r\n")
    }

    #[test]
    fn test_parse_multipart_without_store_keeps_data() {
        let a = parse_raw(&multipart_raw()).unwrap();
        assert_eq!(a.message, "see pic");
        assert_eq!(a.attachments.len(), 1);
        let att = &a.attachments[0];
        assert_eq!(att.mime, "image/png");
        assert_eq!(att.filename, "pic.png");
        assert_eq!(att.extension, "png");
        assert_eq!(att.data, b"png bytes here");
        assert_eq!(att.sha512_hex, hex::encode(crate::verify::sha512(b"png bytes here")));
    }

    #[test]
    fn test_parse_multipart_bad_part_type_skipped() {
        let raw = [
            "Content-Type: multipart/mixed; boundary=\"b\"",
            "Message-ID: <skip@x>",
            "",
            "--b",
            "Content-Type: !!!",
            "",
            "ignored",
            "--b",
            "Content-Type: text/plain",
            "",
            "kept",
            "--b--",
            "",
        ]
        .join("\r\n");
        let a = parse_raw(&raw).unwrap();
        assert_eq!(a.message, "kept");
        assert!(a.attachments.is_empty());
    }

    #[test]
    fn test_parse_too_many_parts() {
        let mut lines = vec![
            "Content-Type: multipart/mixed; boundary=\"b\"".to_string(),
            "Message-ID: <many@x>".to_string(),
            String::new(),
        ];
        for i in 0..(MAX_MIME_PARTS + 1) {
            lines.push("--b".to_string());
            lines.push("Content-Type: text/plain".to_string());
            lines.push(String::new());
            lines.push(format!("part {}", i));
        }
        lines.push("--b--".to_string());
        lines.push(String::new());
        let raw = lines.join("\r\n");
        assert!(matches!(parse_raw(&raw), Err(NewsError::Parse(_))));
    }

    #[test]
    fn test_tee_captures_exact_body() {
        let body = "line one\r\nline two\r\n";
        let mut captured = Vec::new();
        let headers = {
            let mut h = HeaderMap::new();
            h.set("Content-Type", "text/plain");
            h.set("Message-ID", "<tee@x>");
            h
        };
        let a = read_message_body(
            BufReader::new(Cursor::new(body.as_bytes().to_vec())),
            headers,
            None,
            Some(&mut captured),
            false,
        )
        .unwrap();
        assert_eq!(captured, body.as_bytes());
        assert_eq!(a.message, body);
    }

    fn envelope_raw(flip_bit: bool) -> String {
        let sk = SigningKey::from_bytes(&[42u8; 32]);
        let inner = "Content-Type: text/plain\r\n\
            Message-ID: <inner@x>\r\n\
            Newsgroups: overchan.test\r\n\
            Subject: signed hello\r\n\
            Date: Mon, 02 Jan 2006 15:04:05 -0700\r\n\
            \r\n\
            signed body";
        let hash = crate::verify::sha512(inner.as_bytes());
        let mut sig = sk.sign(&hash).to_bytes();
        if flip_bit {
            sig[10] ^= 0x01;
        }
        format!(
            "Content-Type: message/rfc822\r\n\
             Message-ID: <outer@x>\r\n\
             Newsgroups: overchan.test\r\n\
             X-Pubkey-Ed25519: {}\r\n\
             X-Signature-Ed25519-Sha512: {}\r\n\
             \r\n\
             {}",
            hex::encode(sk.verifying_key().to_bytes()),
            hex::encode(sig),
            inner
        )
    }

    #[test]
    fn test_parse_valid_envelope_returns_inner() {
        let a = parse_raw(&envelope_raw(false)).unwrap();
        assert_eq!(a.message_id, "<inner@x>");
        assert_eq!(a.message, "signed body");
        assert!(!a.pubkey.is_empty());
        assert!(!a.signature.is_empty());
    }

    #[test]
    fn test_parse_invalid_envelope_signature() {
        assert!(matches!(
            parse_raw(&envelope_raw(true)),
            Err(NewsError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_parse_envelope_missing_headers() {
        let raw = "Content-Type: message/rfc822\r\nMessage-ID: <outer@x>\r\n\r\nwhatever";
        assert!(matches!(parse_raw(raw), Err(NewsError::InvalidHeaders)));
    }

    #[test]
    fn test_parse_envelope_bad_key_length() {
        let raw = "Content-Type: message/rfc822\r\n\
            Message-ID: <outer@x>\r\n\
            X-Pubkey-Ed25519: aabb\r\n\
            X-Signature-Ed25519-Sha512: ccdd\r\n\
            \r\n\
            whatever";
        assert!(matches!(parse_raw(raw), Err(NewsError::InvalidPubkeyLength(2))));
    }

    #[test]
    fn test_envelope_tee_captures_outer_bytes() {
        let raw = envelope_raw(false);
        let (header_text, body_text) = raw.split_once("\r\n\r\n").unwrap();
        let mut headers_reader = Cursor::new(format!("{}\r\n\r\n", header_text).into_bytes());
        let headers = read_header_block(&mut BufReader::new(&mut headers_reader)).unwrap();

        let mut captured = Vec::new();
        let a = read_message_body(
            BufReader::new(Cursor::new(body_text.as_bytes().to_vec())),
            headers,
            None,
            Some(&mut captured),
            false,
        )
        .unwrap();
        assert_eq!(a.message_id, "<inner@x>");
        // the outer sink sees the envelope payload, not the re-parsed inner body
        assert_eq!(captured, body_text.as_bytes());
    }

    #[test]
    fn test_single_part_signed_body_retained() {
        let raw = format!(
            "Content-Type: text/plain\r\n\
             Message-ID: <mod@x>\r\n\
             X-Pubkey-Ed25519: {}\r\n\
             X-Signature-Ed25519-Sha512: {}\r\n\
             \r\n\
             mod line\n",
            "aa".repeat(32),
            "bb".repeat(64),
        );
        let a = parse_raw(&raw).unwrap();
        assert_eq!(a.signed_body, a.message);
        assert!(!a.signed_body.is_empty());
    }
}
