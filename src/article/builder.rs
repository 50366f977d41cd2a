//! Builder for constructing articles in memory

use chrono::Utc;
use rand::RngCore;

use crate::validation::{is_sage_subject, validate_newsgroup};
use crate::{NewsError, Result};

use super::types::{Article, Attachment};

/// Builder for locally originated articles
///
/// Fills in the generated fields (message-id, date) a poster does not supply.
///
/// # Example
///
/// ```
/// use newsd::ArticleBuilder;
///
/// let article = ArticleBuilder::new("overchan.test")
///     .subject("hello")
///     .name("Anon")
///     .email("anon@node.tld")
///     .message("first post")
///     .build()
///     .unwrap();
/// assert!(article.is_op());
/// assert!(article.message_id.starts_with('<'));
/// ```
#[must_use]
#[derive(Debug, Clone)]
pub struct ArticleBuilder {
    newsgroup: String,
    subject: String,
    name: String,
    email: String,
    path: String,
    message: String,
    message_id: Option<String>,
    reference: String,
    posted: Option<i64>,
    sage: bool,
    attachments: Vec<Attachment>,
}

impl ArticleBuilder {
    /// Start building an article for the given newsgroup
    pub fn new(newsgroup: impl Into<String>) -> Self {
        Self {
            newsgroup: newsgroup.into(),
            subject: "None".to_string(),
            name: "Anonymous".to_string(),
            email: String::new(),
            path: "newsd.local".to_string(),
            message: String::new(),
            message_id: None,
            reference: String::new(),
            posted: None,
            sage: false,
            attachments: Vec::new(),
        }
    }

    /// Set the subject line
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the poster display name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the poster address
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    /// Set the instance path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the text body
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set an explicit message-id (generated if not provided)
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Make this a reply to the given thread root
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    /// Set the post time (defaults to now)
    pub fn posted(mut self, posted: i64) -> Self {
        self.posted = Some(posted);
        self
    }

    /// Mark the reply as sage
    pub fn sage(mut self) -> Self {
        self.sage = true;
        self
    }

    /// Attach a file
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Build the article, validating the newsgroup and generated message-id
    pub fn build(self) -> Result<Article> {
        validate_newsgroup(&self.newsgroup)?;
        let posted = self.posted.unwrap_or_else(|| Utc::now().timestamp());
        let message_id = match self.message_id {
            Some(id) => {
                if !crate::validation::valid_message_id(&id) {
                    return Err(NewsError::InvalidMessageId(id));
                }
                id
            }
            None => generate_message_id(&self.path),
        };
        let sage = self.sage || is_sage_subject(&self.subject);
        let content_type = if self.attachments.is_empty() {
            "text/plain".to_string()
        } else {
            "multipart/mixed".to_string()
        };
        Ok(Article {
            message_id,
            newsgroup: self.newsgroup,
            reference: self.reference,
            subject: self.subject,
            name: self.name,
            email: self.email,
            path: self.path,
            posted,
            content_type,
            message: self.message,
            sage,
            attachments: self.attachments,
            ..Default::default()
        })
    }
}

fn generate_message_id(path: &str) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let domain = if path.is_empty() { "newsd.local" } else { path };
    format!("<{}@{}>", hex::encode(bytes), domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_defaults() {
        let a = ArticleBuilder::new("overchan.test").build().unwrap();
        assert_eq!(a.newsgroup, "overchan.test");
        assert_eq!(a.subject, "None");
        assert_eq!(a.name, "Anonymous");
        assert!(crate::validation::valid_message_id(&a.message_id));
        assert!(a.posted > 0);
        assert!(a.is_op());
        assert_eq!(a.content_type, "text/plain");
    }

    #[test]
    fn test_build_reply() {
        let a = ArticleBuilder::new("overchan.test")
            .reference("<root@x>")
            .message("reply")
            .build()
            .unwrap();
        assert!(!a.is_op());
        assert_eq!(a.thread_root(), "<root@x>");
    }

    #[test]
    fn test_build_sage_from_subject() {
        let a = ArticleBuilder::new("overchan.test")
            .subject("sage thread necromancy")
            .build()
            .unwrap();
        assert!(a.sage);
    }

    #[test]
    fn test_build_rejects_bad_newsgroup() {
        assert!(ArticleBuilder::new("Bad/Group").build().is_err());
    }

    #[test]
    fn test_build_rejects_bad_message_id() {
        let res = ArticleBuilder::new("overchan.test")
            .message_id("no-brackets@x")
            .build();
        assert!(matches!(res, Err(NewsError::InvalidMessageId(_))));
    }

    #[test]
    fn test_build_with_attachment_sets_multipart() {
        let att = Attachment::from_bytes(vec![1, 2, 3], "image/png", "a.png");
        let a = ArticleBuilder::new("overchan.test").attachment(att).build().unwrap();
        assert_eq!(a.content_type, "multipart/mixed");
        assert_eq!(a.attachments.len(), 1);
    }
}
