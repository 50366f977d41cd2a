//! Reference index backend over redb
//!
//! Records live in plain tables with bincode values; the secondary orderings
//! live in the shared scored-set tables (`zset`); unordered memberships use
//! multimap tables. Every mutation in `register_article` happens inside one
//! write transaction, which is what makes the registration atomic to readers.

use std::path::Path;

use chrono::Utc;
use rand::RngCore;
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
};
use sha2::{Digest, Sha512};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::article::Article;
use crate::ipnet::{is_subnet, range_endpoints};
use crate::store::{ArticleFileStore, BlobStore};
use crate::validation::{decode_pubkey, hash_message_id, CONTROL_GROUP};
use crate::{NewsError, Result};

use super::zset::{
    self, zadd, zadd_nx, zadd_xx, zcard, zcount, zdrop, zmembers, znth, zrem, zrevrange,
    zrevrank, zscore, ztail,
};
use super::{
    ArticleRecord, AttachmentRecord, BanRecord, Index, PostRecord, RangeBanRecord,
    GLOBAL_MOD_GROUP, PERM_ALL, PERM_DEFAULT, PERM_LOGIN, THREADS_PER_PAGE,
};

// record tables, values are bincode
const ARTICLES: TableDefinition<&str, &[u8]> = TableDefinition::new("articles");
const ARTICLE_POSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("article_posts");
const ARTICLE_KEYS: TableDefinition<&str, &str> = TableDefinition::new("article_keys");
const HASH_MESSAGE_ID: TableDefinition<&str, &str> = TableDefinition::new("hash_message_id");
const ATTACHMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("attachments");
const BANNED_GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("banned_groups");
const BANNED_ARTICLES: TableDefinition<&str, &[u8]> = TableDefinition::new("banned_articles");
const IP_BANS: TableDefinition<&str, &[u8]> = TableDefinition::new("ip_bans");
const ENC_IP_BANS: TableDefinition<&str, &[u8]> = TableDefinition::new("enc_ip_bans");
// keyed by the canonical upper endpoint; key order is the range-probe order
const IP_RANGE_BANS: TableDefinition<&str, &[u8]> = TableDefinition::new("ip_range_bans");
const NNTP_LOGINS: TableDefinition<&str, &[u8]> = TableDefinition::new("nntp_logins");
const ENC_ADDRS: TableDefinition<&str, &[u8]> = TableDefinition::new("enc_addrs");
const ADDR_ENC_ADDRS: TableDefinition<&str, &str> = TableDefinition::new("addr_enc_addrs");

// membership tables
const HEADER_INDEX: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("header_index");
const ARTICLE_HEADERS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("article_headers");
const ARTICLE_ATTACHMENTS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("article_attachments");
const ATTACHMENT_ARTICLES: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("attachment_articles");
const MOD_PERMS: MultimapTableDefinition<(&str, &str), &str> =
    MultimapTableDefinition::new("mod_perms");
const GROUP_MODS: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("group_mods");

// scored-set names
const GROUP_POSTTIME: &str = "group-posttime";
const ARTICLE_ALL: &str = "article-all";
const THREAD_BUMPTIME_ALL: &str = "thread-bumptime-all";

fn group_articles_set(group: &str) -> String {
    format!("group-article-posttime::{}", group)
}

fn group_thread_posttime_set(group: &str) -> String {
    format!("group-thread-posttime::{}", group)
}

fn group_thread_bumptime_set(group: &str) -> String {
    format!("group-thread-bumptime::{}", group)
}

fn thread_posts_set(root: &str) -> String {
    format!("thread-posts::{}", root)
}

fn header_token(name: &str, value: &str) -> String {
    format!("Name::{}::Value::{}", name, value)
}

fn now_unix() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

#[derive(Serialize, Deserialize)]
struct LoginRecord {
    username: String,
    salt: String,
    hash: String,
}

#[derive(Serialize, Deserialize)]
struct EncAddrRecord {
    enckey: String,
    encaddr: String,
    addr: String,
}

fn cred_hash(password: &str, salt: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn derive_enc_addr(key: &str, addr: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(key.as_bytes());
    hasher.update(addr.as_bytes());
    hex::encode(hasher.finalize())[..32].to_string()
}

/// The redb-backed metadata index
pub struct RedbIndex {
    db: Database,
}

impl RedbIndex {
    /// Open or create the index database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path)?;
        let index = Self { db };
        index.create_tables()?;
        Ok(index)
    }

    // every table must exist before the first read transaction touches it
    fn create_tables(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            txn.open_table(ARTICLES)?;
            txn.open_table(ARTICLE_POSTS)?;
            txn.open_table(ARTICLE_KEYS)?;
            txn.open_table(HASH_MESSAGE_ID)?;
            txn.open_table(ATTACHMENTS)?;
            txn.open_table(BANNED_GROUPS)?;
            txn.open_table(BANNED_ARTICLES)?;
            txn.open_table(IP_BANS)?;
            txn.open_table(ENC_IP_BANS)?;
            txn.open_table(IP_RANGE_BANS)?;
            txn.open_table(NNTP_LOGINS)?;
            txn.open_table(ENC_ADDRS)?;
            txn.open_table(ADDR_ENC_ADDRS)?;
            txn.open_table(zset::ZSET_SCORES)?;
            txn.open_table(zset::ZSET_RANKS)?;
            txn.open_multimap_table(HEADER_INDEX)?;
            txn.open_multimap_table(ARTICLE_HEADERS)?;
            txn.open_multimap_table(ARTICLE_ATTACHMENTS)?;
            txn.open_multimap_table(ATTACHMENT_ARTICLES)?;
            txn.open_multimap_table(MOD_PERMS)?;
            txn.open_multimap_table(GROUP_MODS)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get_record<T: for<'de> Deserialize<'de>>(
        &self,
        def: TableDefinition<&'static str, &'static [u8]>,
        key: &str,
    ) -> Result<Option<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(def)?;
        match table.get(key)? {
            Some(guard) => Ok(Some(bincode::deserialize(guard.value())?)),
            None => Ok(None),
        }
    }

    fn key_exists(
        &self,
        def: TableDefinition<&'static str, &'static [u8]>,
        key: &str,
    ) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(def)?;
        Ok(table.get(key)?.is_some())
    }

    fn put_record<T: Serialize>(
        &self,
        def: TableDefinition<&'static str, &'static [u8]>,
        key: &str,
        record: &T,
    ) -> Result<()> {
        let value = bincode::serialize(record)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(def)?;
            table.insert(key, value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn remove_key(
        &self,
        def: TableDefinition<&'static str, &'static [u8]>,
        key: &str,
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(def)?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn has_perm(&self, pubkey: &str, group: &str, perm: &str) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let perms = txn.open_multimap_table(MOD_PERMS)?;
        for value in perms.get((pubkey, group))? {
            if value?.value() == perm {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Index for RedbIndex {
    fn register_newsgroup(&self, group: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut scores = txn.open_table(zset::ZSET_SCORES)?;
            let mut ranks = txn.open_table(zset::ZSET_RANKS)?;
            if zadd_nx(&mut scores, &mut ranks, GROUP_POSTTIME, group, now_unix())? {
                info!("registered newsgroup {}", group);
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn has_newsgroup(&self, group: &str) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let scores = txn.open_table(zset::ZSET_SCORES)?;
        Ok(zscore(&scores, GROUP_POSTTIME, group)?.is_some())
    }

    fn all_newsgroups(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let ranks = txn.open_table(zset::ZSET_RANKS)?;
        let mut groups = zmembers(&ranks, GROUP_POSTTIME)?;
        groups.reverse();
        Ok(groups)
    }

    fn group_has_posts(&self, group: &str) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let scores = txn.open_table(zset::ZSET_SCORES)?;
        Ok(zcard(&scores, &group_thread_bumptime_set(group))? > 0)
    }

    fn group_page_count(&self, group: &str) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let scores = txn.open_table(zset::ZSET_SCORES)?;
        let count = zcard(&scores, &group_thread_posttime_set(group))?;
        if count > 0 {
            Ok((count - 1) / THREADS_PER_PAGE + 1)
        } else {
            Ok(1)
        }
    }

    fn nuke_group(&self, group: &str, files: &ArticleFileStore, blobs: &BlobStore) -> Result<()> {
        for message_id in self.articles_in_group(group)? {
            debug!("nuke: delete {}", message_id);
            if let Err(e) = files.delete(&message_id) {
                warn!("nuke: failed to delete file for {}: {}", message_id, e);
            }
            for attachment in self.attachments_for_article(&message_id)? {
                if let Err(e) = blobs.remove(&attachment) {
                    warn!("nuke: failed to delete attachment {}: {}", attachment, e);
                }
            }
        }
        for root in self.group_threads(group)? {
            self.delete_thread(&root, blobs)?;
        }
        let txn = self.db.begin_write()?;
        {
            let mut group_mods = txn.open_multimap_table(GROUP_MODS)?;
            let pubkeys: Vec<String> = {
                let mut drained = Vec::new();
                for value in group_mods.remove_all(group)? {
                    drained.push(value?.value().to_string());
                }
                drained
            };
            let mut perms = txn.open_multimap_table(MOD_PERMS)?;
            for pubkey in pubkeys {
                perms.remove((pubkey.as_str(), group), PERM_DEFAULT)?;
            }
            let mut scores = txn.open_table(zset::ZSET_SCORES)?;
            let mut ranks = txn.open_table(zset::ZSET_RANKS)?;
            zdrop(&mut scores, &mut ranks, &group_articles_set(group))?;
            zdrop(&mut scores, &mut ranks, &group_thread_posttime_set(group))?;
            zdrop(&mut scores, &mut ranks, &group_thread_bumptime_set(group))?;
            zrem(&mut scores, &mut ranks, GROUP_POSTTIME, group)?;
        }
        txn.commit()?;
        info!("nuke of {} done", group);
        Ok(())
    }

    fn register_article(&self, article: &Article) -> Result<bool> {
        let message_id = article.message_id.as_str();
        let group = article.newsgroup.as_str();
        let now = now_unix();
        let posted = article.posted.max(0) as u64;

        let txn = self.db.begin_write()?;
        let registered = {
            let mut articles = txn.open_table(ARTICLES)?;
            if articles.get(message_id)?.is_some() {
                false
            } else {
                let mut scores = txn.open_table(zset::ZSET_SCORES)?;
                let mut ranks = txn.open_table(zset::ZSET_RANKS)?;

                // the group ordering learns about new groups and bumps known ones
                zadd(&mut scores, &mut ranks, GROUP_POSTTIME, group, now)?;

                let record = ArticleRecord {
                    message_id: article.message_id.clone(),
                    message_id_hash: hash_message_id(message_id),
                    newsgroup: article.newsgroup.clone(),
                    reference: article.reference.clone(),
                    time_obtained: now,
                };
                articles.insert(message_id, bincode::serialize(&record)?.as_slice())?;
                let mut hashes = txn.open_table(HASH_MESSAGE_ID)?;
                hashes.insert(record.message_id_hash.as_str(), message_id)?;

                let post = PostRecord {
                    message_id: article.message_id.clone(),
                    newsgroup: article.newsgroup.clone(),
                    reference: article.reference.clone(),
                    name: article.name.clone(),
                    email: article.email.clone(),
                    subject: article.subject.clone(),
                    path: article.path.clone(),
                    posted: article.posted,
                    message: article.message.clone(),
                    content_type: article.content_type.clone(),
                    sage: article.sage,
                };
                let mut posts = txn.open_table(ARTICLE_POSTS)?;
                posts.insert(message_id, bincode::serialize(&post)?.as_slice())?;

                zadd_nx(&mut scores, &mut ranks, &group_articles_set(group), message_id, posted)?;
                if group != CONTROL_GROUP {
                    zadd_nx(&mut scores, &mut ranks, ARTICLE_ALL, message_id, now)?;
                }

                if article.is_op() {
                    zadd_nx(
                        &mut scores,
                        &mut ranks,
                        &group_thread_posttime_set(group),
                        message_id,
                        posted,
                    )?;
                    zadd_nx(
                        &mut scores,
                        &mut ranks,
                        &group_thread_bumptime_set(group),
                        message_id,
                        posted,
                    )?;
                    if group != CONTROL_GROUP {
                        zadd_nx(&mut scores, &mut ranks, THREAD_BUMPTIME_ALL, message_id, posted)?;
                    }
                } else {
                    let reference = article.reference.as_str();
                    if !article.sage {
                        zadd_xx(
                            &mut scores,
                            &mut ranks,
                            &group_thread_bumptime_set(group),
                            reference,
                            posted,
                        )?;
                        zadd_xx(&mut scores, &mut ranks, THREAD_BUMPTIME_ALL, reference, posted)?;
                    }
                    zadd_xx(
                        &mut scores,
                        &mut ranks,
                        &group_thread_posttime_set(group),
                        reference,
                        posted,
                    )?;
                    zadd_nx(
                        &mut scores,
                        &mut ranks,
                        &thread_posts_set(reference),
                        message_id,
                        posted,
                    )?;
                }

                let mut header_index = txn.open_multimap_table(HEADER_INDEX)?;
                let mut article_headers = txn.open_multimap_table(ARTICLE_HEADERS)?;
                for (name, values) in article.headers.iter() {
                    for value in values {
                        let token = header_token(name, value);
                        header_index.insert(token.as_str(), message_id)?;
                        article_headers.insert(message_id, token.as_str())?;
                    }
                }

                let mut article_attachments = txn.open_multimap_table(ARTICLE_ATTACHMENTS)?;
                let mut attachment_articles = txn.open_multimap_table(ATTACHMENT_ARTICLES)?;
                let mut attachments = txn.open_table(ATTACHMENTS)?;
                for attachment in &article.attachments {
                    let sha = attachment.sha512_hex.as_str();
                    attachment_articles.insert(sha, message_id)?;
                    article_attachments.insert(message_id, sha)?;
                    if attachments.get(sha)?.is_none() {
                        let record = AttachmentRecord {
                            sha512_hex: attachment.sha512_hex.clone(),
                            message_id: article.message_id.clone(),
                            filename: attachment.filename.clone(),
                            storage_filename: attachment.storage_filename(),
                            mime: attachment.mime.clone(),
                        };
                        attachments.insert(sha, bincode::serialize(&record)?.as_slice())?;
                    }
                }
                true
            }
        };
        if registered {
            txn.commit()?;
            debug!("registered article {}", message_id);
        } else {
            txn.abort()?;
            debug!("article {} already registered", message_id);
        }
        Ok(registered)
    }

    fn register_signed(&self, message_id: &str, pubkey: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut keys = txn.open_table(ARTICLE_KEYS)?;
            keys.insert(message_id, pubkey)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn pubkey_for_article(&self, message_id: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let keys = txn.open_table(ARTICLE_KEYS)?;
        Ok(keys.get(message_id)?.map(|g| g.value().to_string()))
    }

    fn has_article(&self, message_id: &str) -> Result<bool> {
        self.key_exists(ARTICLES, message_id)
    }

    fn has_article_post(&self, message_id: &str) -> Result<bool> {
        self.key_exists(ARTICLE_POSTS, message_id)
    }

    fn is_expired(&self, message_id: &str) -> Result<bool> {
        Ok(self.has_article(message_id)? && !self.has_article_post(message_id)?)
    }

    fn article_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let scores = txn.open_table(zset::ZSET_SCORES)?;
        zcard(&scores, ARTICLE_ALL)
    }

    fn get_post(&self, message_id: &str) -> Result<Option<PostRecord>> {
        self.get_record(ARTICLE_POSTS, message_id)
    }

    fn get_article_record(&self, message_id: &str) -> Result<Option<ArticleRecord>> {
        self.get_record(ARTICLES, message_id)
    }

    fn group_for_article(&self, message_id: &str) -> Result<Option<String>> {
        if let Some(post) = self.get_post(message_id)? {
            return Ok(Some(post.newsgroup));
        }
        Ok(self.get_article_record(message_id)?.map(|r| r.newsgroup))
    }

    fn delete_article(&self, message_id: &str, blobs: &BlobStore) -> Result<()> {
        let post = self.get_post(message_id)?;
        let record = self.get_article_record(message_id)?;
        let (group, reference) = match (&post, &record) {
            (Some(p), _) => (p.newsgroup.clone(), p.reference.clone()),
            (None, Some(r)) => (r.newsgroup.clone(), r.reference.clone()),
            (None, None) => return Ok(()),
        };

        let mut orphaned_blobs: Vec<String> = Vec::new();
        let txn = self.db.begin_write()?;
        {
            let mut scores = txn.open_table(zset::ZSET_SCORES)?;
            let mut ranks = txn.open_table(zset::ZSET_RANKS)?;
            if !reference.is_empty() && reference != message_id {
                zrem(&mut scores, &mut ranks, &thread_posts_set(&reference), message_id)?;
            }
            zrem(&mut scores, &mut ranks, &group_articles_set(&group), message_id)?;
            zrem(&mut scores, &mut ranks, ARTICLE_ALL, message_id)?;

            if let Some(r) = &record {
                let mut hashes = txn.open_table(HASH_MESSAGE_ID)?;
                hashes.remove(r.message_id_hash.as_str())?;
            }
            let mut articles = txn.open_table(ARTICLES)?;
            articles.remove(message_id)?;
            let mut posts = txn.open_table(ARTICLE_POSTS)?;
            posts.remove(message_id)?;
            let mut keys = txn.open_table(ARTICLE_KEYS)?;
            keys.remove(message_id)?;

            let mut article_headers = txn.open_multimap_table(ARTICLE_HEADERS)?;
            let tokens: Vec<String> = {
                let mut drained = Vec::new();
                for value in article_headers.remove_all(message_id)? {
                    drained.push(value?.value().to_string());
                }
                drained
            };
            let mut header_index = txn.open_multimap_table(HEADER_INDEX)?;
            for token in tokens {
                header_index.remove(token.as_str(), message_id)?;
            }

            let mut article_attachments = txn.open_multimap_table(ARTICLE_ATTACHMENTS)?;
            let shas: Vec<String> = {
                let mut drained = Vec::new();
                for value in article_attachments.remove_all(message_id)? {
                    drained.push(value?.value().to_string());
                }
                drained
            };
            let mut attachment_articles = txn.open_multimap_table(ATTACHMENT_ARTICLES)?;
            let mut attachments = txn.open_table(ATTACHMENTS)?;
            for sha in shas {
                attachment_articles.remove(sha.as_str(), message_id)?;
                let unreferenced = attachment_articles.get(sha.as_str())?.next().is_none();
                if unreferenced {
                    if let Some(guard) = attachments.remove(sha.as_str())? {
                        let rec: AttachmentRecord = bincode::deserialize(guard.value())?;
                        orphaned_blobs.push(rec.storage_filename);
                    }
                }
            }
        }
        txn.commit()?;

        for storage_filename in orphaned_blobs {
            if let Err(e) = blobs.remove(&storage_filename) {
                warn!("failed to remove orphaned blob {}: {}", storage_filename, e);
            }
        }
        debug!("deleted article {}", message_id);
        Ok(())
    }

    fn delete_thread(&self, root: &str, blobs: &BlobStore) -> Result<()> {
        for reply in self.thread_replies(root, 0)? {
            self.delete_article(&reply, blobs)?;
        }
        let group = self.group_for_article(root)?;
        let txn = self.db.begin_write()?;
        {
            let mut scores = txn.open_table(zset::ZSET_SCORES)?;
            let mut ranks = txn.open_table(zset::ZSET_RANKS)?;
            if let Some(group) = &group {
                zrem(&mut scores, &mut ranks, &group_thread_posttime_set(group), root)?;
                zrem(&mut scores, &mut ranks, &group_thread_bumptime_set(group), root)?;
            }
            zrem(&mut scores, &mut ranks, THREAD_BUMPTIME_ALL, root)?;
            zdrop(&mut scores, &mut ranks, &thread_posts_set(root))?;
        }
        txn.commit()?;
        self.delete_article(root, blobs)?;
        debug!("deleted thread {}", root);
        Ok(())
    }

    fn all_articles(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let ranks = txn.open_table(zset::ZSET_RANKS)?;
        zmembers(&ranks, ARTICLE_ALL)
    }

    fn articles_in_group(&self, group: &str) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let ranks = txn.open_table(zset::ZSET_RANKS)?;
        zmembers(&ranks, &group_articles_set(group))
    }

    fn count_posts_in_group(&self, group: &str, window_secs: i64) -> Result<u64> {
        let now = now_unix();
        let min = if window_secs > 0 {
            now.saturating_sub(window_secs as u64)
        } else {
            0
        };
        let txn = self.db.begin_read()?;
        let ranks = txn.open_table(zset::ZSET_RANKS)?;
        zcount(&ranks, &group_articles_set(group), min, now)
    }

    fn thread_replies(&self, root: &str, limit: usize) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let ranks = txn.open_table(zset::ZSET_RANKS)?;
        let set = thread_posts_set(root);
        if limit == 0 {
            zmembers(&ranks, &set)
        } else {
            ztail(&ranks, &set, limit)
        }
    }

    fn count_thread_replies(&self, root: &str) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let scores = txn.open_table(zset::ZSET_SCORES)?;
        zcard(&scores, &thread_posts_set(root))
    }

    fn thread_has_replies(&self, root: &str) -> Result<bool> {
        Ok(self.count_thread_replies(root)? > 0)
    }

    fn group_threads(&self, group: &str) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let ranks = txn.open_table(zset::ZSET_RANKS)?;
        zmembers(&ranks, &group_thread_bumptime_set(group))
    }

    fn last_bumped_threads(&self, group: Option<&str>, n: usize) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let ranks = txn.open_table(zset::ZSET_RANKS)?;
        match group {
            Some(group) => zrevrange(&ranks, &group_thread_bumptime_set(group), n),
            None => zrevrange(&ranks, THREAD_BUMPTIME_ALL, n),
        }
    }

    fn page_for_thread(&self, root: &str) -> Result<Option<(String, u64)>> {
        let Some(group) = self.group_for_article(root)? else {
            return Ok(None);
        };
        let txn = self.db.begin_read()?;
        let scores = txn.open_table(zset::ZSET_SCORES)?;
        let ranks = txn.open_table(zset::ZSET_RANKS)?;
        let Some(rank) = zrevrank(&scores, &ranks, &group_thread_bumptime_set(&group), root)?
        else {
            return Ok(None);
        };
        Ok(Some((group, rank / THREADS_PER_PAGE)))
    }

    fn info_for_article(&self, message_id: &str) -> Result<Option<(String, String, u64)>> {
        let Some(record) = self.get_article_record(message_id)? else {
            return Ok(None);
        };
        let root = if record.reference.is_empty() {
            message_id.to_string()
        } else {
            record.reference
        };
        match self.page_for_thread(&root)? {
            Some((group, page)) => Ok(Some((root, group, page))),
            None => Ok(None),
        }
    }

    fn roots_for_expiration(&self, group: &str, keep: usize) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let ranks = txn.open_table(zset::ZSET_RANKS)?;
        let mut roots = zmembers(&ranks, &group_thread_posttime_set(group))?;
        let cutoff = roots.len().saturating_sub(keep);
        roots.truncate(cutoff);
        Ok(roots)
    }

    fn last_and_first_for_group(&self, group: &str) -> Result<(u64, u64)> {
        let txn = self.db.begin_read()?;
        let scores = txn.open_table(zset::ZSET_SCORES)?;
        let last = zcard(&scores, &group_articles_set(group))?;
        Ok((last, 1))
    }

    fn msgid_for_nntp_id(&self, group: &str, n: u64) -> Result<Option<String>> {
        let n = n.max(1);
        let txn = self.db.begin_read()?;
        let ranks = txn.open_table(zset::ZSET_RANKS)?;
        znth(&ranks, &group_articles_set(group), n - 1)
    }

    fn msgids_with_header(&self, name: &str, value: &str) -> Result<Vec<String>> {
        let token = header_token(name, value);
        let txn = self.db.begin_read()?;
        let index = txn.open_multimap_table(HEADER_INDEX)?;
        let mut out = Vec::new();
        for entry in index.get(token.as_str())? {
            out.push(entry?.value().to_string());
        }
        Ok(out)
    }

    fn msgid_for_hash(&self, hash: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let hashes = txn.open_table(HASH_MESSAGE_ID)?;
        Ok(hashes.get(hash)?.map(|g| g.value().to_string()))
    }

    fn attachments_for_article(&self, message_id: &str) -> Result<Vec<String>> {
        let shas: Vec<String> = {
            let txn = self.db.begin_read()?;
            let table = txn.open_multimap_table(ARTICLE_ATTACHMENTS)?;
            let mut out = Vec::new();
            for entry in table.get(message_id)? {
                out.push(entry?.value().to_string());
            }
            out
        };
        let mut filenames = Vec::with_capacity(shas.len());
        for sha in shas {
            if let Some(record) = self.attachment_record(&sha)? {
                filenames.push(record.storage_filename);
            }
        }
        Ok(filenames)
    }

    fn articles_for_attachment(&self, sha512_hex: &str) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(ATTACHMENT_ARTICLES)?;
        let mut out = Vec::new();
        for entry in table.get(sha512_hex)? {
            out.push(entry?.value().to_string());
        }
        Ok(out)
    }

    fn attachment_record(&self, sha512_hex: &str) -> Result<Option<AttachmentRecord>> {
        self.get_record(ATTACHMENTS, sha512_hex)
    }

    fn ban_newsgroup(&self, group: &str) -> Result<()> {
        let record = BanRecord {
            target: group.to_string(),
            made: now_unix(),
            reason: String::new(),
        };
        self.put_record(BANNED_GROUPS, group, &record)
    }

    fn unban_newsgroup(&self, group: &str) -> Result<()> {
        self.remove_key(BANNED_GROUPS, group)
    }

    fn newsgroup_banned(&self, group: &str) -> Result<bool> {
        self.key_exists(BANNED_GROUPS, group)
    }

    fn ban_article(&self, message_id: &str, reason: &str) -> Result<()> {
        if self.article_banned(message_id)? {
            debug!("{} already banned", message_id);
            return Ok(());
        }
        let record = BanRecord {
            target: message_id.to_string(),
            made: now_unix(),
            reason: reason.to_string(),
        };
        self.put_record(BANNED_ARTICLES, message_id, &record)
    }

    fn article_banned(&self, message_id: &str) -> Result<bool> {
        self.key_exists(BANNED_ARTICLES, message_id)
    }

    fn ban_addr(&self, spec: &str) -> Result<()> {
        if !is_subnet(spec) {
            let record = BanRecord {
                target: spec.to_string(),
                made: now_unix(),
                reason: String::new(),
            };
            return self.put_record(IP_BANS, spec, &record);
        }
        if self.addr_banned(spec)? {
            return Ok(());
        }
        let (min, max) = range_endpoints(spec)?;
        let txn = self.db.begin_write()?;
        {
            let mut ranges = txn.open_table(IP_RANGE_BANS)?;
            // drop every banned range this one swallows
            let contained: Vec<String> = {
                let mut keys = Vec::new();
                for entry in ranges.range(min.as_str()..=max.as_str())? {
                    let (key, _) = entry?;
                    if key.value() > min.as_str() {
                        keys.push(key.value().to_string());
                    }
                }
                keys
            };
            for key in contained {
                ranges.remove(key.as_str())?;
            }
            let record = RangeBanRecord {
                start: min.clone(),
                end: max.clone(),
                made: now_unix(),
            };
            ranges.insert(max.as_str(), bincode::serialize(&record)?.as_slice())?;
        }
        txn.commit()?;
        info!("banned range {}", spec);
        Ok(())
    }

    fn unban_addr(&self, spec: &str) -> Result<()> {
        if !is_subnet(spec) {
            return self.remove_key(IP_BANS, spec);
        }
        let (min, max) = range_endpoints(spec)?;
        let covering: Option<(String, String)> = {
            let txn = self.db.begin_read()?;
            let ranges = txn.open_table(IP_RANGE_BANS)?;
            let mut found = None;
            for entry in ranges.range(max.as_str()..)? {
                let (key, value) = entry?;
                let record: RangeBanRecord = bincode::deserialize(value.value())?;
                found = Some((key.value().to_string(), record.start));
                break;
            }
            found
        };
        if let Some((end, start)) = covering {
            if min.as_str() >= start.as_str() {
                let txn = self.db.begin_write()?;
                {
                    let mut ranges = txn.open_table(IP_RANGE_BANS)?;
                    ranges.remove(end.as_str())?;
                }
                txn.commit()?;
            }
        }
        Ok(())
    }

    fn addr_banned(&self, spec: &str) -> Result<bool> {
        if self.key_exists(IP_BANS, spec)? {
            return Ok(true);
        }
        let (min, max) = range_endpoints(spec)?;
        let txn = self.db.begin_read()?;
        let ranges = txn.open_table(IP_RANGE_BANS)?;
        for entry in ranges.range(max.as_str()..)? {
            let (_, value) = entry?;
            let record: RangeBanRecord = bincode::deserialize(value.value())?;
            return Ok(min.as_str() >= record.start.as_str());
        }
        Ok(false)
    }

    fn ban_enc_addr(&self, enc_addr: &str) -> Result<()> {
        let record = BanRecord {
            target: enc_addr.to_string(),
            made: now_unix(),
            reason: String::new(),
        };
        self.put_record(ENC_IP_BANS, enc_addr, &record)
    }

    fn enc_addr_banned(&self, enc_addr: &str) -> Result<bool> {
        self.key_exists(ENC_IP_BANS, enc_addr)
    }

    fn encrypt_addr(&self, addr: &str) -> Result<String> {
        let txn = self.db.begin_write()?;
        let encaddr = {
            let mut forward = txn.open_table(ADDR_ENC_ADDRS)?;
            let existing = forward.get(addr)?.map(|g| g.value().to_string());
            match existing {
                Some(encaddr) => encaddr,
                None => {
                    let enckey = random_hex(32);
                    let encaddr = derive_enc_addr(&enckey, addr);
                    forward.insert(addr, encaddr.as_str())?;
                    let record = EncAddrRecord {
                        enckey,
                        encaddr: encaddr.clone(),
                        addr: addr.to_string(),
                    };
                    let mut reverse = txn.open_table(ENC_ADDRS)?;
                    reverse.insert(encaddr.as_str(), bincode::serialize(&record)?.as_slice())?;
                    encaddr
                }
            }
        };
        txn.commit()?;
        Ok(encaddr)
    }

    fn enc_key_for(&self, enc_addr: &str) -> Result<Option<String>> {
        Ok(self
            .get_record::<EncAddrRecord>(ENC_ADDRS, enc_addr)?
            .map(|r| r.enckey))
    }

    fn addr_for_enc(&self, enc_addr: &str) -> Result<Option<String>> {
        Ok(self
            .get_record::<EncAddrRecord>(ENC_ADDRS, enc_addr)?
            .map(|r| r.addr))
    }

    fn add_mod_pubkey(&self, pubkey: &str) -> Result<()> {
        if self.check_mod_pubkey(pubkey)? {
            debug!("pubkey {} already has login permission", pubkey);
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut perms = txn.open_multimap_table(MOD_PERMS)?;
            perms.insert((pubkey, CONTROL_GROUP), PERM_LOGIN)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn check_mod_pubkey(&self, pubkey: &str) -> Result<bool> {
        self.has_perm(pubkey, CONTROL_GROUP, PERM_LOGIN)
    }

    fn mark_mod_global(&self, pubkey: &str) -> Result<()> {
        decode_pubkey(pubkey)?;
        if self.check_mod_global(pubkey)? {
            debug!("pubkey {} already global", pubkey);
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut perms = txn.open_multimap_table(MOD_PERMS)?;
            perms.insert((pubkey, GLOBAL_MOD_GROUP), PERM_ALL)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn unmark_mod_global(&self, pubkey: &str) -> Result<()> {
        if !self.check_mod_global(pubkey)? {
            return Err(NewsError::Other(format!(
                "pubkey {} not marked as global",
                pubkey
            )));
        }
        let txn = self.db.begin_write()?;
        {
            let mut perms = txn.open_multimap_table(MOD_PERMS)?;
            perms.remove((pubkey, GLOBAL_MOD_GROUP), PERM_ALL)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn check_mod_global(&self, pubkey: &str) -> Result<bool> {
        self.has_perm(pubkey, GLOBAL_MOD_GROUP, PERM_ALL)
    }

    fn mark_mod_group(&self, pubkey: &str, group: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut perms = txn.open_multimap_table(MOD_PERMS)?;
            perms.insert((pubkey, group), PERM_DEFAULT)?;
            let mut group_mods = txn.open_multimap_table(GROUP_MODS)?;
            group_mods.insert(group, pubkey)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn unmark_mod_group(&self, pubkey: &str, group: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut perms = txn.open_multimap_table(MOD_PERMS)?;
            perms.remove((pubkey, group), PERM_DEFAULT)?;
            let mut group_mods = txn.open_multimap_table(GROUP_MODS)?;
            group_mods.remove(group, pubkey)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn check_mod_group(&self, pubkey: &str, group: &str) -> Result<bool> {
        self.has_perm(pubkey, group, PERM_DEFAULT)
    }

    fn add_login(&self, username: &str, password: &str) -> Result<()> {
        let salt = random_hex(16);
        let record = LoginRecord {
            username: username.to_string(),
            hash: cred_hash(password, &salt),
            salt,
        };
        self.put_record(NNTP_LOGINS, username, &record)
    }

    fn check_login(&self, username: &str, password: &str) -> Result<bool> {
        match self.get_record::<LoginRecord>(NNTP_LOGINS, username)? {
            Some(record) => Ok(cred_hash(password, &record.salt) == record.hash),
            None => Ok(false),
        }
    }

    fn remove_login(&self, username: &str) -> Result<()> {
        self.remove_key(NNTP_LOGINS, username)
    }

    fn login_exists(&self, username: &str) -> Result<bool> {
        self.key_exists(NNTP_LOGINS, username)
    }
}
