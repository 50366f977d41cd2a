#![doc = include_str!("../README.md")]

/// Article data model: articles, attachments, headers, wire serialization
pub mod article;
/// Store and tool configuration
pub mod config;
mod error;
/// Ingestion controller
pub mod ingest;
/// Metadata index contract and reference backend
pub mod index;
/// Canonical IP forms for range bans
pub mod ipnet;
/// Media type parsing and multipart reading
pub mod mime;
/// Recursive article body parsing
pub mod parser;
/// Article file store and attachment blob store
pub mod store;
/// Field validation: message-ids, newsgroups, dates, key material
pub mod validation;
/// Ed25519 signature verification
pub mod verify;

pub use article::{
    read_header_block, write_article, write_headers, Article, ArticleBuilder, Attachment,
    HeaderMap, CRLF, LF,
};
pub use config::StoreConfig;
pub use error::{NewsError, Result};
pub use ingest::Ingester;
pub use index::{
    ArticleRecord, AttachmentRecord, Index, PostRecord, RedbIndex, THREADS_PER_PAGE,
};
pub use mime::{MediaType, MimePart, MultipartReader};
pub use parser::{read_message, read_message_body, TeeReader};
pub use store::{ArticleFileStore, ArticleReader, ArticleSink, BlobStore};
pub use validation::{parse_date, valid_message_id, validate_newsgroup, CONTROL_GROUP};
pub use verify::{verify_detached, verify_header_signature, verify_open};
