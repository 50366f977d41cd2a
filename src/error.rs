//! Error types for the ingestion and storage pipeline

use thiserror::Error;

/// Errors produced while ingesting, storing, or indexing articles
#[derive(Error, Debug)]
pub enum NewsError {
    /// IO error from the file store, blob store, or an external tool
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed article: bad MIME structure, unparseable media type, bad date
    #[error("parse error: {0}")]
    Parse(String),

    /// A signed envelope is missing its pubkey or signature header
    #[error("invalid headers on signed envelope")]
    InvalidHeaders,

    /// Ed25519 verification failed
    #[error("invalid signature on {0}")]
    InvalidSignature(String),

    /// An article with this message-id already exists in the file store
    ///
    /// Not an error from the peer's point of view: the article is treated as
    /// accepted, but no further work is done for it.
    #[error("duplicate article: {0}")]
    Duplicate(String),

    /// Message-id fails the syntactic validity check
    #[error("invalid message-id: {0}")]
    InvalidMessageId(String),

    /// Newsgroup name fails validation
    #[error("invalid newsgroup name: {0}")]
    InvalidNewsgroup(String),

    /// Public key is not 32 bytes once decoded
    #[error("invalid pubkey length: {0} bytes")]
    InvalidPubkeyLength(usize),

    /// Signature is not 64 bytes once decoded
    #[error("invalid signature length: {0} bytes")]
    InvalidSignatureLength(usize),

    /// Hex field (pubkey, signature, hash) failed to decode
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Metadata index backend failure
    #[error("index error: {0}")]
    Index(String),

    /// External thumbnail tool exited with a failure status
    #[error("thumbnail tool failed: {0}")]
    Thumbnail(String),

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias using NewsError
pub type Result<T> = std::result::Result<T, NewsError>;

macro_rules! index_error_from {
    ($($ty:ty),+ $(,)?) => {
        $(impl From<$ty> for NewsError {
            fn from(e: $ty) -> Self {
                NewsError::Index(e.to_string())
            }
        })+
    };
}

index_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    bincode::Error,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NewsError::Duplicate("<abc@x>".to_string());
        assert_eq!(err.to_string(), "duplicate article: <abc@x>");

        let err = NewsError::InvalidPubkeyLength(16);
        assert_eq!(err.to_string(), "invalid pubkey length: 16 bytes");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: NewsError = io_err.into();
        assert!(matches!(err, NewsError::Io(_)));
    }
}
