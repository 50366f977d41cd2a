//! Core article and attachment types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

/// One ingested message
///
/// Produced by the parser from a raw header block plus body; persisted by the
/// metadata index. `headers` keeps every header verbatim, while the named
/// fields carry the extracted values the rest of the pipeline works with.
///
/// `reference` is the message-id of the thread root, or empty when this
/// article is itself the root ("OP"). If the source listed several
/// newsgroups, `newsgroup` is the first one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Article {
    /// Globally unique message-id, `<local@domain>` form
    pub message_id: String,
    /// Canonical (first) newsgroup
    pub newsgroup: String,
    /// Message-id of the thread root; empty for an OP
    pub reference: String,
    /// Subject line
    pub subject: String,
    /// Poster display name
    pub name: String,
    /// Poster address from the `From` header
    pub email: String,
    /// NNTP transit path
    pub path: String,
    /// Post time, unix seconds, from the `Date` header
    pub posted: i64,
    /// Top-level content type, parameters stripped
    pub content_type: String,
    /// Text body
    pub message: String,
    /// Sage flag: subject prefix or `X-Sage` header
    pub sage: bool,
    /// Hex Ed25519 public key, when signed
    pub pubkey: String,
    /// Hex Ed25519 signature, when signed
    pub signature: String,
    /// The exact byte region that was signed, kept for re-verification
    pub signed_body: String,
    /// Every header, verbatim, name → values
    pub headers: HeaderMap,
    /// Attachments in wire order
    pub attachments: Vec<Attachment>,
}

impl Article {
    /// Is this article a thread root?
    #[must_use]
    pub fn is_op(&self) -> bool {
        self.reference.is_empty() || self.reference == self.message_id
    }

    /// Message-id of the thread this article belongs to
    #[must_use]
    pub fn thread_root(&self) -> &str {
        if self.is_op() {
            &self.message_id
        } else {
            &self.reference
        }
    }

    /// Does this article carry a header-based signature?
    #[must_use]
    pub fn is_signed(&self) -> bool {
        !self.pubkey.is_empty() && !self.signature.is_empty()
    }
}

/// One content-addressed attachment
///
/// Two attachments with the same `sha512_hex` are the same blob; the on-disk
/// file exists at most once. `data` holds the decoded bytes only until the
/// blob store has persisted them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    /// Declared media type, parameters stripped
    pub mime: String,
    /// Original filename from the part's Content-Disposition
    pub filename: String,
    /// Filename extension, without the dot
    pub extension: String,
    /// Hex SHA-512 of the decoded bytes
    pub sha512_hex: String,
    /// Decoded bytes; emptied once saved to the blob store
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Attachment {
    /// Build an attachment from decoded bytes, deriving hash and extension
    pub fn from_bytes(data: Vec<u8>, mime: impl Into<String>, filename: impl Into<String>) -> Self {
        let mime = mime.into();
        let filename = filename.into();
        let extension = extension_for(&filename, &mime);
        let sha512_hex = hex::encode(Sha512::digest(&data));
        Self {
            mime,
            filename,
            extension,
            sha512_hex,
            data,
        }
    }

    /// Deterministic on-disk filename: `<sha512>.<ext>`
    #[must_use]
    pub fn storage_filename(&self) -> String {
        format!("{}.{}", self.sha512_hex, self.extension)
    }

    /// Drop the in-memory bytes after the blob store has them
    pub fn clear_data(&mut self) {
        self.data = Vec::new();
    }
}

fn extension_for(filename: &str, mime: &str) -> String {
    if let Some((_, ext)) = filename.rsplit_once('.') {
        if !ext.is_empty() {
            return ext.to_ascii_lowercase();
        }
    }
    // no usable filename extension: fall back to the mime subtype
    match mime.split_once('/') {
        Some((_, sub)) if !sub.is_empty() => sub.to_ascii_lowercase(),
        _ => "bin".to_string(),
    }
}

/// Verbatim header storage: canonical name → values in order of appearance
///
/// Names are canonicalized the way netnews software writes them
/// (`content-type` → `Content-Type`), values are kept byte-for-byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMap {
    inner: BTreeMap<String, Vec<String>>,
}

impl HeaderMap {
    /// Empty header map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical form of a header name: each dash-separated token capitalized
    #[must_use]
    pub fn canonical_name(name: &str) -> String {
        let mut out = String::with_capacity(name.len());
        for (i, token) in name.split('-').enumerate() {
            if i > 0 {
                out.push('-');
            }
            let mut chars = token.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.extend(chars.flat_map(|c| c.to_lowercase()));
            }
        }
        out
    }

    /// Replace all values of a header
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.inner.insert(Self::canonical_name(name), vec![value.into()]);
    }

    /// Append a value to a header
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.inner
            .entry(Self::canonical_name(name))
            .or_default()
            .push(value.into());
    }

    /// First value of a header, if present
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .get(&Self::canonical_name(name))
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// First value of a header, or a default
    #[must_use]
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// All values of a header
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.inner
            .get(&Self::canonical_name(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Is the header present at all?
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&Self::canonical_name(name))
    }

    /// Remove a header, returning its values
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.inner.remove(&Self::canonical_name(name))
    }

    /// Iterate over `(name, values)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct header names
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when no headers are present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
