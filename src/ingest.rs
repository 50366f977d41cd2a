//! Ingestion controller
//!
//! Ties the pipeline together: first-writer-wins deduplication through the
//! file store, parsing with the wire form teed into the article file,
//! registration in the metadata index, and best-effort asynchronous
//! thumbnailing. Any parse, verify, or index failure rolls the file store
//! back so a failed ingest leaves no trace.

use std::io::{BufReader, Read};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task;
use tracing::{debug, warn};

use crate::article::{write_headers, Article, HeaderMap, LF};
use crate::index::Index;
use crate::parser::{read_message, read_message_body};
use crate::store::{ArticleFileStore, BlobStore};
use crate::validation::{valid_message_id, validate_newsgroup};
use crate::{NewsError, Result};

const DEFAULT_THUMBNAIL_CONCURRENCY: usize = 4;

/// The article ingestion and retrieval controller
#[derive(Clone)]
pub struct Ingester {
    files: Arc<ArticleFileStore>,
    blobs: Arc<BlobStore>,
    index: Arc<dyn Index>,
    thumbnail_permits: Arc<Semaphore>,
}

impl Ingester {
    /// Build a controller over the given stores and index
    pub fn new(files: Arc<ArticleFileStore>, blobs: Arc<BlobStore>, index: Arc<dyn Index>) -> Self {
        Self {
            files,
            blobs,
            index,
            thumbnail_permits: Arc::new(Semaphore::new(DEFAULT_THUMBNAIL_CONCURRENCY)),
        }
    }

    /// Bound the number of thumbnail tools running at once
    #[must_use]
    pub fn with_thumbnail_concurrency(mut self, n: usize) -> Self {
        self.thumbnail_permits = Arc::new(Semaphore::new(n.max(1)));
        self
    }

    /// The metadata index
    #[must_use]
    pub fn index(&self) -> &Arc<dyn Index> {
        &self.index
    }

    /// The blob store
    #[must_use]
    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    /// The article file store
    #[must_use]
    pub fn files(&self) -> &Arc<ArticleFileStore> {
        &self.files
    }

    /// Ingest one article: headers already read, body still on the wire
    ///
    /// The headers are written verbatim to the article file, then the body is
    /// parsed with its exact bytes teed into the same file. On success the
    /// article is registered in the index and thumbnail jobs are spawned for
    /// any attachment lacking one. Returns [`NewsError::Duplicate`] when the
    /// file store already holds this message-id; no state changes in that
    /// case.
    pub async fn ingest<R>(&self, headers: HeaderMap, body: R) -> Result<Article>
    where
        R: Read + Send + 'static,
    {
        let message_id = headers.get_or("Message-ID", "").to_string();
        if !valid_message_id(&message_id) {
            return Err(NewsError::InvalidMessageId(message_id));
        }
        let group = headers
            .get("Newsgroups")
            .and_then(|g| g.split(',').next())
            .unwrap_or("")
            .trim()
            .to_string();
        validate_newsgroup(&group)?;

        let files = Arc::clone(&self.files);
        let blobs = Arc::clone(&self.blobs);
        let index = Arc::clone(&self.index);
        let article = task::spawn_blocking(move || -> Result<Article> {
            let Some(mut sink) = files.create(&message_id)? else {
                return Err(NewsError::Duplicate(message_id));
            };
            if let Err(e) = write_headers(&mut sink, &headers, LF) {
                drop(sink);
                let _ = files.delete(&message_id);
                return Err(e);
            }
            let parsed = read_message_body(
                BufReader::new(body),
                headers,
                Some(blobs.as_ref()),
                Some(&mut sink),
                false,
            );
            let article = match parsed {
                Ok(article) => {
                    if let Err(e) = sink.finish() {
                        let _ = files.delete(&message_id);
                        return Err(e);
                    }
                    article
                }
                Err(e) => {
                    warn!("ingest of {} failed: {}", message_id, e);
                    drop(sink);
                    let _ = files.delete(&message_id);
                    return Err(e);
                }
            };

            // index failure is hard: roll the file back
            let registered = match index.register_article(&article) {
                Ok(r) => r,
                Err(e) => {
                    let _ = files.delete(&message_id);
                    return Err(e);
                }
            };
            if registered {
                if article.is_signed() {
                    index.register_signed(&article.message_id, &article.pubkey)?;
                }
                debug!("ingested {} into {}", article.message_id, article.newsgroup);
            }
            Ok(article)
        })
        .await
        .map_err(|e| NewsError::Other(format!("ingest task failed: {}", e)))??;

        for attachment in &article.attachments {
            self.spawn_thumbnail(attachment.storage_filename());
        }
        Ok(article)
    }

    /// Load and re-parse a stored article
    pub fn load_article(&self, message_id: &str) -> Result<Article> {
        let reader = self.files.open_message(message_id)?;
        read_message(BufReader::new(reader))
    }

    /// Load just the headers of a stored article
    pub fn load_headers(&self, message_id: &str) -> Result<HeaderMap> {
        self.files.load_headers(message_id)
    }

    /// Queue thumbnail jobs for every attachment of an article that lacks one
    pub fn thumbnail_article(&self, message_id: &str) -> Result<()> {
        for storage_filename in self.index.attachments_for_article(message_id)? {
            self.spawn_thumbnail(storage_filename);
        }
        Ok(())
    }

    // thumbnailing is a side channel: bounded, detached, never awaited
    fn spawn_thumbnail(&self, storage_filename: String) {
        if self.blobs.has_thumbnail(&storage_filename) {
            return;
        }
        let blobs = Arc::clone(&self.blobs);
        let permits = Arc::clone(&self.thumbnail_permits);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(e) = blobs.make_thumbnail(&storage_filename).await {
                warn!("thumbnail for {} failed: {}", storage_filename, e);
            }
        });
    }
}
