//! Raw article file store
//!
//! Persists whole articles keyed by message-id for replay to peers. Files are
//! optionally gzip-compressed on write; reads sniff the gzip magic and fall
//! back to a raw read, so the compression setting can change at any time
//! without rewriting the store.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use crate::article::{read_header_block, HeaderMap};
use crate::config::StoreConfig;
use crate::validation::valid_message_id;
use crate::{NewsError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Article file store rooted at a directory
#[derive(Debug, Clone)]
pub struct ArticleFileStore {
    dir: PathBuf,
    temp: PathBuf,
    compression: bool,
}

impl ArticleFileStore {
    /// Open the store, creating its directories if needed
    pub fn open(config: &StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.store_dir)?;
        std::fs::create_dir_all(&config.incoming_dir)?;
        Ok(Self {
            dir: config.store_dir.clone(),
            temp: config.incoming_dir.clone(),
            compression: config.compression,
        })
    }

    /// Is gzip compression enabled for new files?
    #[must_use]
    pub fn compression(&self) -> bool {
        self.compression
    }

    /// Filesystem path for a message-id
    ///
    /// Returns the empty path for anything failing the message-id validity
    /// check; no filesystem access happens for such ids.
    #[must_use]
    pub fn filename(&self, message_id: &str) -> PathBuf {
        if !valid_message_id(message_id) {
            warn!("refusing invalid message-id: {:?}", message_id);
            return PathBuf::new();
        }
        self.dir.join(message_id)
    }

    /// Do we have a file for this article?
    #[must_use]
    pub fn has(&self, message_id: &str) -> bool {
        let path = self.filename(message_id);
        !path.as_os_str().is_empty() && path.is_file()
    }

    /// Create the file for a new article
    ///
    /// Returns `None` when a file for this message-id already exists; the
    /// caller must not write. Creation is atomic, so of two concurrent
    /// writers exactly one receives a sink.
    pub fn create(&self, message_id: &str) -> Result<Option<ArticleSink>> {
        let path = self.filename(message_id);
        if path.as_os_str().is_empty() {
            return Err(NewsError::InvalidMessageId(message_id.to_string()));
        }
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("article {} already stored", message_id);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let sink = if self.compression {
            ArticleSink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            ArticleSink::Plain(file)
        };
        Ok(Some(sink))
    }

    /// Open a stored article for reading, decompressing if it is gzipped
    pub fn open_message(&self, message_id: &str) -> Result<ArticleReader> {
        let path = self.filename(message_id);
        if path.as_os_str().is_empty() {
            return Err(NewsError::InvalidMessageId(message_id.to_string()));
        }
        open_sniffed(&path)
    }

    /// Read just the header block of a stored article
    pub fn load_headers(&self, message_id: &str) -> Result<HeaderMap> {
        let reader = self.open_message(message_id)?;
        read_header_block(&mut BufReader::new(reader))
    }

    /// Remove a stored article file, ignoring absence
    pub fn delete(&self, message_id: &str) -> Result<()> {
        let path = self.filename(message_id);
        if path.as_os_str().is_empty() {
            return Err(NewsError::InvalidMessageId(message_id.to_string()));
        }
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of a temp file in the incoming directory
    #[must_use]
    pub fn temp_path(&self, name: &str) -> PathBuf {
        self.temp.join(name)
    }

    /// Open a temp file for reading; temp files are never decompressed
    pub fn open_temp(&self, name: &str) -> Result<File> {
        Ok(File::open(self.temp_path(name))?)
    }
}

fn open_sniffed(path: &Path) -> Result<ArticleReader> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let gzipped = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        // shorter than the magic: raw by definition
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e.into()),
    };
    file.seek(SeekFrom::Start(0))?;
    if gzipped {
        Ok(ArticleReader::Gzip(GzDecoder::new(file)))
    } else {
        Ok(ArticleReader::Plain(file))
    }
}

/// Write sink for a new article file
pub enum ArticleSink {
    /// Uncompressed file
    Plain(File),
    /// Gzip-encoding writer
    Gzip(GzEncoder<File>),
}

impl ArticleSink {
    /// Flush and close the file, finishing the gzip stream if present
    pub fn finish(self) -> Result<()> {
        match self {
            ArticleSink::Plain(mut f) => f.flush()?,
            ArticleSink::Gzip(enc) => {
                enc.finish()?.flush()?;
            }
        }
        Ok(())
    }
}

impl Write for ArticleSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ArticleSink::Plain(f) => f.write(buf),
            ArticleSink::Gzip(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ArticleSink::Plain(f) => f.flush(),
            ArticleSink::Gzip(enc) => enc.flush(),
        }
    }
}

/// Read stream over a stored article
pub enum ArticleReader {
    /// Raw file
    Plain(File),
    /// Transparent gzip decoder
    Gzip(GzDecoder<File>),
}

impl Read for ArticleReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ArticleReader::Plain(f) => f.read(buf),
            ArticleReader::Gzip(d) => d.read(buf),
        }
    }
}
