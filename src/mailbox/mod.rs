//! Mailbox collaborators: where messages come from and where actions land.

pub mod imap;

use async_trait::async_trait;

use crate::error::MailboxError;
use crate::rules::types::Message;

pub use imap::ImapMailbox;

/// Supplies messages to evaluate. Pure I/O, no rule logic.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch up to `limit` of the newest messages, oldest first.
    ///
    /// Must not change message flags; marking read is a rule action.
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<Message>, MailboxError>;
}
