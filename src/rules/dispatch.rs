//! Action dispatch through an explicit mailbox-control capability.
//!
//! The dispatcher owns no session. Callers hand it a `MailboxControl` for the
//! duration of a call, and every action attempt is isolated: a failed or
//! skipped action never stops the ones after it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::error::{MailboxError, RuleError};
use crate::rules::types::Action;

/// A folder (or label) that messages can be filed into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Identifier passed back to `add_to_folder`.
    pub id: String,
    /// Display name, matched case-insensitively against rule actions.
    pub name: String,
}

impl Folder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Operations the dispatcher may apply to a real mailbox.
///
/// Implementations must tolerate whatever concurrency the host picks; the
/// dispatcher itself calls them sequentially.
#[async_trait]
pub trait MailboxControl: Send + Sync {
    /// Clear the unread state of a message.
    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError>;

    /// List the folders available for filing.
    async fn list_folders(&self) -> Result<Vec<Folder>, MailboxError>;

    /// File a message into a folder.
    async fn add_to_folder(&self, message_id: &str, folder_id: &str) -> Result<(), MailboxError>;
}

/// What happened to a single action.
#[derive(Debug)]
pub enum ActionOutcome {
    /// The mailbox accepted the change.
    Applied,
    /// The target folder does not exist. Nothing was changed.
    FolderNotFound { folder: String },
    /// The mailbox call failed.
    Failed(RuleError),
}

impl ActionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Result of dispatching one action.
#[derive(Debug)]
pub struct ActionResult {
    pub action: Action,
    pub outcome: ActionOutcome,
}

/// A `MailboxControl` that lists folders once and reuses the result.
///
/// Folders created after the first `list_folders` call are not seen. A
/// failed listing is not cached.
pub struct CachedFolders<'a> {
    inner: &'a dyn MailboxControl,
    folders: OnceCell<Vec<Folder>>,
}

impl<'a> CachedFolders<'a> {
    pub fn new(inner: &'a dyn MailboxControl) -> Self {
        Self {
            inner,
            folders: OnceCell::new(),
        }
    }
}

#[async_trait]
impl<'a> MailboxControl for CachedFolders<'a> {
    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
        self.inner.mark_read(message_id).await
    }

    async fn list_folders(&self) -> Result<Vec<Folder>, MailboxError> {
        let folders = self
            .folders
            .get_or_try_init(|| self.inner.list_folders())
            .await?;
        Ok(folders.clone())
    }

    async fn add_to_folder(&self, message_id: &str, folder_id: &str) -> Result<(), MailboxError> {
        self.inner.add_to_folder(message_id, folder_id).await
    }
}

/// Find a folder by name, ignoring case.
pub fn find_folder<'f>(folders: &'f [Folder], name: &str) -> Option<&'f Folder> {
    let wanted = name.to_lowercase();
    folders.iter().find(|f| f.name.to_lowercase() == wanted)
}

/// Apply `actions` to `message_id`, in order.
///
/// Never fails as a whole; per-action failures are returned in the results
/// and logged.
pub async fn dispatch(
    message_id: &str,
    actions: &[Action],
    mailbox: &dyn MailboxControl,
) -> Vec<ActionResult> {
    let mut results = Vec::with_capacity(actions.len());

    for action in actions {
        let outcome = match apply(message_id, action, mailbox).await {
            Ok(outcome) => outcome,
            Err(source) => {
                let err = RuleError::ActionDispatch {
                    action: action.to_string(),
                    message_id: message_id.to_string(),
                    source,
                };
                error!(message_id, action = %action, error = %err, "Action failed");
                ActionOutcome::Failed(err)
            }
        };
        results.push(ActionResult {
            action: action.clone(),
            outcome,
        });
    }

    results
}

async fn apply(
    message_id: &str,
    action: &Action,
    mailbox: &dyn MailboxControl,
) -> Result<ActionOutcome, MailboxError> {
    match action {
        Action::MarkAsRead => {
            mailbox.mark_read(message_id).await?;
            info!(message_id, "Message marked as read");
            Ok(ActionOutcome::Applied)
        }
        Action::MoveToFolder { folder } => {
            let folders = mailbox.list_folders().await?;
            match find_folder(&folders, folder) {
                Some(target) => {
                    mailbox.add_to_folder(message_id, &target.id).await?;
                    info!(message_id, folder = %target.name, "Message moved to folder");
                    Ok(ActionOutcome::Applied)
                }
                None => {
                    warn!(message_id, folder = %folder, "Folder not found, skipping move");
                    Ok(ActionOutcome::FolderNotFound {
                        folder: folder.clone(),
                    })
                }
            }
        }
    }
}
