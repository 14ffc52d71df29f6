//! Mailbox poller: fetch, persist, evaluate, dispatch.
//!
//! Each poll cycle:
//! 1. Fetches the newest messages from the `MessageSource`
//! 2. Persists them (already-processed ones are skipped unless `reprocess_seen`)
//! 3. Runs the rule set over the new ones, dispatching through `MailboxControl`
//! 4. Marks them processed in the DB

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::mailbox::MessageSource;
use crate::rules::dispatch::MailboxControl;
use crate::rules::engine::{BatchReport, RulesEngine};
use crate::store::Database;

/// Everything a poll cycle needs.
#[derive(Clone)]
pub struct PollContext {
    pub source: Arc<dyn MessageSource>,
    pub mailbox: Arc<dyn MailboxControl>,
    pub db: Arc<dyn Database>,
    pub engine: Arc<RulesEngine>,
    /// Newest messages to fetch per cycle.
    pub fetch_limit: usize,
    /// Evaluate messages that an earlier cycle already stored.
    pub reprocess_seen: bool,
}

/// Spawn a background task that polls on `interval`.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_poller(ctx: PollContext, interval: Duration) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            rules = ctx.engine.rules().len(),
            "Poller started"
        );

        let mut tick = tokio::time::interval(interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Poller shutting down");
                return;
            }

            poll_once(&ctx).await;
        }
    });

    (handle, shutdown_flag)
}

/// Run a single poll cycle.
///
/// Returns `None` when the fetch failed or there was nothing to evaluate.
pub async fn poll_once(ctx: &PollContext) -> Option<BatchReport> {
    let fetched = match ctx.source.fetch_recent(ctx.fetch_limit).await {
        Ok(msgs) => msgs,
        Err(e) => {
            error!("Mailbox fetch failed: {e}");
            return None;
        }
    };

    if fetched.is_empty() {
        debug!("No messages fetched");
        return None;
    }

    debug!("Fetched {} message(s)", fetched.len());

    let mut to_evaluate = Vec::with_capacity(fetched.len());
    for message in fetched {
        match ctx.db.insert_message(&message).await {
            Ok(true) => to_evaluate.push(message),
            Ok(false) if ctx.reprocess_seen => to_evaluate.push(message),
            Ok(false) => {
                if is_unprocessed(ctx.db.as_ref(), &message.id).await {
                    debug!(message_id = %message.id, "Stored but never processed, evaluating");
                    to_evaluate.push(message);
                } else {
                    debug!(message_id = %message.id, "Already seen, skipping");
                }
            }
            Err(e) => {
                // Evaluate anyway. It isn't stored, so a later poll sees it as new again.
                error!(message_id = %message.id, error = %e, "Failed to persist message");
                to_evaluate.push(message);
            }
        }
    }

    if to_evaluate.is_empty() {
        return None;
    }

    let report = ctx
        .engine
        .process_batch(&to_evaluate, ctx.mailbox.as_ref())
        .await;

    for message in &report.messages {
        if let Err(e) = ctx.db.mark_processed(&message.message_id).await {
            warn!(message_id = %message.message_id, error = %e, "Failed to mark message processed");
        }
    }

    Some(report)
}

/// Stored by an earlier cycle that stopped before the rules ran.
async fn is_unprocessed(db: &dyn Database, id: &str) -> bool {
    match db.get_message(id).await {
        Ok(Some(stored)) => stored.processed_at.is_none(),
        Ok(None) => true,
        Err(e) => {
            warn!(message_id = %id, error = %e, "Failed to read stored message, skipping");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::MailboxError;
    use crate::rules::dispatch::Folder;
    use crate::rules::types::{Action, Combinator, Condition, Field, Message, Predicate, Rule};
    use crate::store::LibSqlBackend;

    struct FixedSource {
        messages: Vec<Message>,
        fail: bool,
    }

    #[async_trait]
    impl MessageSource for FixedSource {
        async fn fetch_recent(&self, limit: usize) -> Result<Vec<Message>, MailboxError> {
            if self.fail {
                return Err(MailboxError::Closed);
            }
            let start = self.messages.len().saturating_sub(limit);
            Ok(self.messages[start..].to_vec())
        }
    }

    #[derive(Default)]
    struct CountingMailbox {
        marked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailboxControl for CountingMailbox {
        async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
            self.marked.lock().unwrap().push(message_id.to_string());
            Ok(())
        }

        async fn list_folders(&self) -> Result<Vec<Folder>, MailboxError> {
            Ok(Vec::new())
        }

        async fn add_to_folder(&self, _message_id: &str, _folder_id: &str) -> Result<(), MailboxError> {
            Ok(())
        }
    }

    async fn context(
        messages: Vec<Message>,
        reprocess_seen: bool,
    ) -> (PollContext, Arc<CountingMailbox>, Arc<LibSqlBackend>) {
        let mailbox = Arc::new(CountingMailbox::default());
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let rule = Rule::new("read-tests", Combinator::All)
            .with_condition(Condition::new(Field::Subject, Predicate::Contains, "test"))
            .with_action(Action::MarkAsRead);
        let ctx = PollContext {
            source: Arc::new(FixedSource {
                messages,
                fail: false,
            }),
            mailbox: mailbox.clone(),
            db: db.clone(),
            engine: Arc::new(RulesEngine::new(vec![rule])),
            fetch_limit: 10,
            reprocess_seen,
        };
        (ctx, mailbox, db)
    }

    fn inbox() -> Vec<Message> {
        vec![
            Message::new("1", "a@x.com", "Test one", ""),
            Message::new("2", "b@x.com", "Hello", ""),
        ]
    }

    #[tokio::test]
    async fn first_poll_stores_and_evaluates() {
        let (ctx, mailbox, db) = context(inbox(), false).await;

        let report = poll_once(&ctx).await.unwrap();

        assert_eq!(report.messages.len(), 2);
        assert_eq!(*mailbox.marked.lock().unwrap(), vec!["1".to_string()]);
        assert_eq!(db.count_messages().await.unwrap(), 2);
        assert!(db.get_message("2").await.unwrap().unwrap().processed_at.is_some());
    }

    #[tokio::test]
    async fn second_poll_skips_seen_messages() {
        let (ctx, mailbox, _db) = context(inbox(), false).await;

        poll_once(&ctx).await.unwrap();
        assert!(poll_once(&ctx).await.is_none());
        assert_eq!(mailbox.marked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stored_but_unprocessed_message_is_evaluated() {
        let (ctx, mailbox, db) = context(inbox(), false).await;
        db.insert_message(&inbox()[0]).await.unwrap();

        let report = poll_once(&ctx).await.unwrap();

        assert_eq!(report.messages.len(), 2);
        assert_eq!(*mailbox.marked.lock().unwrap(), vec!["1".to_string()]);
        assert!(db.get_message("1").await.unwrap().unwrap().processed_at.is_some());
        assert!(poll_once(&ctx).await.is_none());
    }

    #[tokio::test]
    async fn reprocess_seen_evaluates_again() {
        let (ctx, mailbox, _db) = context(inbox(), true).await;

        poll_once(&ctx).await.unwrap();
        let report = poll_once(&ctx).await.unwrap();
        assert_eq!(report.messages.len(), 2);
        assert_eq!(mailbox.marked.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_returns_none() {
        let (mut ctx, mailbox, db) = context(inbox(), false).await;
        ctx.source = Arc::new(FixedSource {
            messages: Vec::new(),
            fail: true,
        });

        assert!(poll_once(&ctx).await.is_none());
        assert!(mailbox.marked.lock().unwrap().is_empty());
        assert_eq!(db.count_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fetch_limit_is_respected() {
        let (mut ctx, _mailbox, db) = context(inbox(), false).await;
        ctx.fetch_limit = 1;

        let report = poll_once(&ctx).await.unwrap();
        assert_eq!(report.messages.len(), 1);
        assert_eq!(report.messages[0].message_id, "2");
        assert_eq!(db.count_messages().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn spawned_poller_stops_on_shutdown() {
        let (ctx, mailbox, _db) = context(inbox(), false).await;
        let (handle, shutdown) = spawn_poller(ctx, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller did not stop")
            .unwrap();

        assert_eq!(*mailbox.marked.lock().unwrap(), vec!["1".to_string()]);
    }
}
