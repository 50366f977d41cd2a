//! Article data model
//!
//! Types and helpers for the articles this server exchanges: the structured
//! [`Article`] produced by parsing, the verbatim [`HeaderMap`], attachments,
//! and the wire serializer.

mod builder;
mod headers;
mod serialize;
mod types;

pub use builder::ArticleBuilder;
pub use headers::{extract_metadata, read_header_block};
pub use serialize::{write_article, write_headers, CRLF, LF};
pub use types::{Article, Attachment, HeaderMap};
