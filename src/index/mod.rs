//! Metadata index
//!
//! The queryable catalog of everything the server knows: article records,
//! thread orderings, attachment cross-references, header-value indices, and
//! the ban/moderator/login records the outer layers consult. The [`Index`]
//! trait is the contract; [`RedbIndex`] is the reference backend. Any backend
//! offering the same per-call atomicity is equally valid.

mod redb;
mod zset;

pub use self::redb::RedbIndex;

use serde::{Deserialize, Serialize};

use crate::article::Article;
use crate::store::{ArticleFileStore, BlobStore};
use crate::Result;

/// Threads shown per page when resolving a thread's page number
pub const THREADS_PER_PAGE: u64 = 10;

/// The group whose moderators hold global permissions
pub const GLOBAL_MOD_GROUP: &str = "overchan";

/// Permission token: may log into the moderation feed
pub const PERM_LOGIN: &str = "login";
/// Permission token: may moderate one group
pub const PERM_DEFAULT: &str = "default";
/// Permission token: may moderate everything
pub const PERM_ALL: &str = "all";

/// Presence record for an article, local or remote-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// The article's message-id
    pub message_id: String,
    /// Hash of the message-id, for short-link lookup
    pub message_id_hash: String,
    /// Canonical newsgroup
    pub newsgroup: String,
    /// Thread root message-id; empty for an OP
    pub reference: String,
    /// When we obtained the article, unix seconds
    pub time_obtained: u64,
}

/// Full local post content and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    /// The article's message-id
    pub message_id: String,
    /// Canonical newsgroup
    pub newsgroup: String,
    /// Thread root message-id; empty for an OP
    pub reference: String,
    /// Poster display name
    pub name: String,
    /// Poster address
    pub email: String,
    /// Subject line
    pub subject: String,
    /// NNTP transit path
    pub path: String,
    /// Post time from the Date header, unix seconds
    pub posted: i64,
    /// Text body
    pub message: String,
    /// Bare content type
    pub content_type: String,
    /// Sage flag
    pub sage: bool,
}

impl PostRecord {
    /// Is this post a thread root?
    #[must_use]
    pub fn is_op(&self) -> bool {
        self.reference.is_empty() || self.reference == self.message_id
    }
}

/// Attachment metadata, keyed by content hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    /// Hex SHA-512 of the blob
    pub sha512_hex: String,
    /// First article that referenced this attachment
    pub message_id: String,
    /// Original upload filename
    pub filename: String,
    /// On-disk name, `<sha512>.<ext>`
    pub storage_filename: String,
    /// Declared media type
    pub mime: String,
}

/// A ban entry with its timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    /// What was banned: group name, message-id, or address
    pub target: String,
    /// When the ban was made, unix seconds
    pub made: u64,
    /// Operator-supplied reason, possibly empty
    pub reason: String,
}

/// A banned address range, stored under its upper endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeBanRecord {
    /// Canonical lower endpoint
    pub start: String,
    /// Canonical upper endpoint
    pub end: String,
    /// When the ban was made, unix seconds
    pub made: u64,
}

/// The index contract
///
/// Every mutation inside [`register_article`](Index::register_article) must
/// appear atomically to readers: an observer that sees the article record
/// must also see the group, thread, and ordering updates. Concurrent
/// registration of the same message-id leaves exactly one record.
pub trait Index: Send + Sync {
    // -- newsgroups ------------------------------------------------------

    /// Make a newsgroup known, scoring it into the group ordering
    fn register_newsgroup(&self, group: &str) -> Result<()>;

    /// Is this newsgroup known?
    fn has_newsgroup(&self, group: &str) -> Result<bool>;

    /// All known newsgroups, most recently written first
    fn all_newsgroups(&self) -> Result<Vec<String>>;

    /// Does the group contain any threads?
    fn group_has_posts(&self, group: &str) -> Result<bool>;

    /// Number of board pages the group currently spans
    fn group_page_count(&self, group: &str) -> Result<u64>;

    /// Destroy a newsgroup: every article, thread, moderator mapping, and
    /// per-group ordering, plus the stored files and blobs
    fn nuke_group(&self, group: &str, files: &ArticleFileStore, blobs: &BlobStore) -> Result<()>;

    // -- articles --------------------------------------------------------

    /// Register a parsed article and all its secondary orderings
    ///
    /// Idempotent on message-id; returns `false` when the article was
    /// already present and nothing was written.
    fn register_article(&self, article: &Article) -> Result<bool>;

    /// Record the pubkey that signed an article
    fn register_signed(&self, message_id: &str, pubkey: &str) -> Result<()>;

    /// Pubkey recorded for an article, if signed
    fn pubkey_for_article(&self, message_id: &str) -> Result<Option<String>>;

    /// Is the article known at all (header record present)?
    fn has_article(&self, message_id: &str) -> Result<bool>;

    /// Is the full local post present?
    fn has_article_post(&self, message_id: &str) -> Result<bool>;

    /// Known but without a local body ("remote-only")
    fn is_expired(&self, message_id: &str) -> Result<bool>;

    /// Number of articles outside the control group
    fn article_count(&self) -> Result<u64>;

    /// Fetch the local post record
    fn get_post(&self, message_id: &str) -> Result<Option<PostRecord>>;

    /// Fetch the presence record
    fn get_article_record(&self, message_id: &str) -> Result<Option<ArticleRecord>>;

    /// Newsgroup of an article
    fn group_for_article(&self, message_id: &str) -> Result<Option<String>>;

    /// Delete one article and cascade its index entries; attachment blobs
    /// are removed once their last referencing article goes
    fn delete_article(&self, message_id: &str, blobs: &BlobStore) -> Result<()>;

    /// Delete a whole thread: all replies, then the root, then the thread
    /// orderings
    fn delete_thread(&self, root: &str, blobs: &BlobStore) -> Result<()>;

    /// Every article message-id outside the control group, oldest first
    fn all_articles(&self) -> Result<Vec<String>>;

    /// Every article in a group, oldest first
    fn articles_in_group(&self, group: &str) -> Result<Vec<String>>;

    /// Posts in the group within the trailing time window (seconds);
    /// zero or negative counts from the beginning
    fn count_posts_in_group(&self, group: &str, window_secs: i64) -> Result<u64>;

    // -- threads ---------------------------------------------------------

    /// Reply message-ids of a thread, oldest first; `limit` > 0 keeps only
    /// the newest `limit`
    fn thread_replies(&self, root: &str, limit: usize) -> Result<Vec<String>>;

    /// Number of replies in a thread
    fn count_thread_replies(&self, root: &str) -> Result<u64>;

    /// Does the thread have any replies?
    fn thread_has_replies(&self, root: &str) -> Result<bool>;

    /// Thread roots of a group in bump order, oldest first
    fn group_threads(&self, group: &str) -> Result<Vec<String>>;

    /// Most recently bumped thread roots; `None` scopes globally
    /// (excluding the control group)
    fn last_bumped_threads(&self, group: Option<&str>, n: usize) -> Result<Vec<String>>;

    /// Board page a thread currently sits on
    fn page_for_thread(&self, root: &str) -> Result<Option<(String, u64)>>;

    /// Thread root, group, and page for any article
    fn info_for_article(&self, message_id: &str) -> Result<Option<(String, String, u64)>>;

    /// Oldest thread roots beyond the retention count, for expiration
    fn roots_for_expiration(&self, group: &str, keep: usize) -> Result<Vec<String>>;

    // -- NNTP numbering --------------------------------------------------

    /// `(last, first)` article numbers for a group; first is always 1,
    /// last is the group's article count (0 when empty)
    fn last_and_first_for_group(&self, group: &str) -> Result<(u64, u64)>;

    /// Message-id for a 1-based NNTP article number
    fn msgid_for_nntp_id(&self, group: &str, n: u64) -> Result<Option<String>>;

    // -- header and hash lookups ----------------------------------------

    /// Message-ids of articles carrying this header name/value pair
    fn msgids_with_header(&self, name: &str, value: &str) -> Result<Vec<String>>;

    /// Message-id for a message-id hash
    fn msgid_for_hash(&self, hash: &str) -> Result<Option<String>>;

    // -- attachments -----------------------------------------------------

    /// Storage filenames of an article's attachments
    fn attachments_for_article(&self, message_id: &str) -> Result<Vec<String>>;

    /// Message-ids referencing an attachment hash
    fn articles_for_attachment(&self, sha512_hex: &str) -> Result<Vec<String>>;

    /// Attachment metadata by content hash
    fn attachment_record(&self, sha512_hex: &str) -> Result<Option<AttachmentRecord>>;

    // -- bans ------------------------------------------------------------

    /// Ban a newsgroup
    fn ban_newsgroup(&self, group: &str) -> Result<()>;
    /// Lift a newsgroup ban
    fn unban_newsgroup(&self, group: &str) -> Result<()>;
    /// Is the newsgroup banned?
    fn newsgroup_banned(&self, group: &str) -> Result<bool>;

    /// Ban an article by message-id
    fn ban_article(&self, message_id: &str, reason: &str) -> Result<()>;
    /// Is the article banned?
    fn article_banned(&self, message_id: &str) -> Result<bool>;

    /// Ban a single address or a CIDR range
    fn ban_addr(&self, spec: &str) -> Result<()>;
    /// Lift an address or range ban
    fn unban_addr(&self, spec: &str) -> Result<()>;
    /// Is the address covered by an individual or range ban?
    fn addr_banned(&self, spec: &str) -> Result<bool>;

    /// Ban an encrypted address token
    fn ban_enc_addr(&self, enc_addr: &str) -> Result<()>;
    /// Is the encrypted address token banned?
    fn enc_addr_banned(&self, enc_addr: &str) -> Result<bool>;

    // -- encrypted addresses --------------------------------------------

    /// Encrypted form of an address, generated and stored on first sight
    fn encrypt_addr(&self, addr: &str) -> Result<String>;
    /// Encryption key behind an encrypted address
    fn enc_key_for(&self, enc_addr: &str) -> Result<Option<String>>;
    /// Plain address behind an encrypted address
    fn addr_for_enc(&self, enc_addr: &str) -> Result<Option<String>>;

    // -- moderators ------------------------------------------------------

    /// Grant a pubkey login permission in the control group
    fn add_mod_pubkey(&self, pubkey: &str) -> Result<()>;
    /// May this pubkey log into the moderation feed?
    fn check_mod_pubkey(&self, pubkey: &str) -> Result<bool>;
    /// Grant global moderation permission
    fn mark_mod_global(&self, pubkey: &str) -> Result<()>;
    /// Revoke global moderation permission
    fn unmark_mod_global(&self, pubkey: &str) -> Result<()>;
    /// Does this pubkey moderate globally?
    fn check_mod_global(&self, pubkey: &str) -> Result<bool>;
    /// Grant moderation permission in one group
    fn mark_mod_group(&self, pubkey: &str, group: &str) -> Result<()>;
    /// Revoke moderation permission in one group
    fn unmark_mod_group(&self, pubkey: &str, group: &str) -> Result<()>;
    /// Does this pubkey moderate the group?
    fn check_mod_group(&self, pubkey: &str, group: &str) -> Result<bool>;

    // -- logins ----------------------------------------------------------

    /// Store salted credentials for an NNTP login
    fn add_login(&self, username: &str, password: &str) -> Result<()>;
    /// Check a username/password pair
    fn check_login(&self, username: &str, password: &str) -> Result<bool>;
    /// Remove a login
    fn remove_login(&self, username: &str) -> Result<()>;
    /// Does the login exist?
    fn login_exists(&self, username: &str) -> Result<bool>;
}
