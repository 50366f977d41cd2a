//! On-disk stores
//!
//! Two independent filesystem layers: the article file store holding raw
//! articles keyed by message-id, and the content-addressed blob store holding
//! attachment bytes and their thumbnails.

mod blobs;
mod files;

pub use blobs::BlobStore;
pub use files::{ArticleFileStore, ArticleReader, ArticleSink};
