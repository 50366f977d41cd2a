//! Media type parsing and multipart body reading
//!
//! Just enough MIME for the article formats peers actually exchange:
//! `type/subtype` with parameters, and `multipart/*` bodies whose parts are
//! either 8bit text or base64 attachments.

use std::io::BufRead;

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::article::{read_header_block, HeaderMap};
use crate::{NewsError, Result};

/// A parsed `Content-Type` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    essence: String,
    params: Vec<(String, String)>,
}

impl MediaType {
    /// Parse a media type header value
    ///
    /// The essence (`type/subtype`) is lowercased; parameters keep their
    /// values with surrounding quotes removed.
    pub fn parse(value: &str) -> Result<MediaType> {
        let mut segments = value.split(';');
        let essence = segments
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        let (ty, sub) = essence
            .split_once('/')
            .ok_or_else(|| NewsError::Parse(format!("invalid media type: {:?}", value)))?;
        if ty.is_empty() || sub.is_empty() || essence.chars().any(|c| c.is_whitespace()) {
            return Err(NewsError::Parse(format!("invalid media type: {:?}", value)));
        }
        let mut params = Vec::new();
        for segment in segments {
            if let Some((name, val)) = segment.split_once('=') {
                params.push((name.trim().to_ascii_lowercase(), unquote(val.trim()).to_string()));
            }
        }
        Ok(MediaType { essence, params })
    }

    /// The bare `type/subtype`
    #[must_use]
    pub fn essence(&self) -> &str {
        &self.essence
    }

    /// Is this any `multipart/*` type?
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.essence.starts_with("multipart/")
    }

    /// Look up a parameter by name
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The multipart boundary parameter
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary")
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// One part of a multipart body, body bytes still in transfer encoding
#[derive(Debug)]
pub struct MimePart {
    /// Part headers
    pub headers: HeaderMap,
    data: Vec<u8>,
}

impl MimePart {
    /// The part's declared content type, `text/plain` when absent
    #[must_use]
    pub fn content_type(&self) -> &str {
        self.headers.get_or("Content-Type", "text/plain")
    }

    /// The attachment filename from Content-Disposition, if any
    ///
    /// Scans every Content-Disposition value; some writers split the
    /// disposition and the filename parameter over two header lines.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        for value in self.headers.get_all("Content-Disposition") {
            for segment in value.split(';') {
                if let Some((name, val)) = segment.split_once('=') {
                    if name.trim().eq_ignore_ascii_case("filename") {
                        return Some(unquote(val.trim()).to_string());
                    }
                }
            }
        }
        None
    }

    /// Decode the body per its Content-Transfer-Encoding
    ///
    /// `base64` is decoded (line breaks tolerated); every other encoding is
    /// passed through as-is.
    pub fn decoded(&self) -> Result<Vec<u8>> {
        let encoding = self
            .headers
            .get_or("Content-Transfer-Encoding", "")
            .trim()
            .to_ascii_lowercase();
        if encoding == "base64" {
            let compact: Vec<u8> = self
                .data
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            STANDARD
                .decode(&compact)
                .map_err(|e| NewsError::Parse(format!("bad base64 part: {}", e)))
        } else {
            Ok(self.data.clone())
        }
    }

    /// Raw body bytes, still transfer-encoded
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.data
    }
}

/// Streaming reader over a multipart body
///
/// Tolerates both CRLF and LF line endings and skips any preamble before the
/// first boundary. The body ends at the `--boundary--` terminator; EOF before
/// the terminator is a parse error.
pub struct MultipartReader<R: BufRead> {
    reader: R,
    delimiter: String,
    started: bool,
    done: bool,
}

impl<R: BufRead> MultipartReader<R> {
    /// Wrap a reader positioned at the start of the multipart body
    pub fn new(reader: R, boundary: &str) -> Self {
        Self {
            reader,
            delimiter: format!("--{}", boundary),
            started: false,
            done: false,
        }
    }

    /// Read the next part, or `None` after the terminator
    pub fn next_part(&mut self) -> Result<Option<MimePart>> {
        if self.done {
            return Ok(None);
        }
        if !self.started {
            self.skip_preamble()?;
            if self.done {
                return Ok(None);
            }
        }

        let headers = read_header_block(&mut self.reader)?;
        let mut data = Vec::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = self.reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                return Err(NewsError::Parse("unterminated multipart body".to_string()));
            }
            match self.classify(&line) {
                BoundaryKind::Delimiter => break,
                BoundaryKind::Terminator => {
                    self.done = true;
                    break;
                }
                BoundaryKind::Data => data.extend_from_slice(&line),
            }
        }
        // the line break before a boundary belongs to the boundary
        strip_trailing_newline(&mut data);
        Ok(Some(MimePart { headers, data }))
    }

    fn skip_preamble(&mut self) -> Result<()> {
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = self.reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                // empty or preamble-only body with no parts
                self.done = true;
                return Ok(());
            }
            match self.classify(&line) {
                BoundaryKind::Delimiter => {
                    self.started = true;
                    return Ok(());
                }
                BoundaryKind::Terminator => {
                    self.done = true;
                    return Ok(());
                }
                BoundaryKind::Data => {}
            }
        }
    }

    fn classify(&self, line: &[u8]) -> BoundaryKind {
        let line = trim_line_ending(line);
        if line == self.delimiter.as_bytes() {
            BoundaryKind::Delimiter
        } else if line.len() == self.delimiter.len() + 2
            && line.starts_with(self.delimiter.as_bytes())
            && line.ends_with(b"--")
        {
            BoundaryKind::Terminator
        } else {
            BoundaryKind::Data
        }
    }
}

enum BoundaryKind {
    Delimiter,
    Terminator,
    Data,
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn strip_trailing_newline(data: &mut Vec<u8>) {
    if data.last() == Some(&b'\n') {
        data.pop();
        if data.last() == Some(&b'\r') {
            data.pop();
        }
    }
}
