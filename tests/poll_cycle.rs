//! Integration tests for the poll cycle.
//!
//! A scripted `MessageSource` feeds messages into a real libSQL database on
//! disk, the rules come from a `rules.json` file, and actions land on a stub
//! mailbox.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use mail_rules::error::MailboxError;
use mail_rules::mailbox::MessageSource;
use mail_rules::poller::{PollContext, poll_once};
use mail_rules::rules::{Folder, MailboxControl, Message, RulesEngine, load_rules};
use mail_rules::store::{Database, LibSqlBackend};

const RULES: &str = r#"{
  "rules": [
    {
      "name": "file-invoices",
      "conditions": [
        { "field": "From", "predicate": "contains", "value": "billing@" },
        { "field": "Subject", "predicate": "contains", "value": "invoice" }
      ],
      "condition_type": "Any",
      "actions": ["move_to_folder:finance", "mark_as_read"]
    },
    {
      "name": "stale",
      "conditions": [
        { "field": "Received Date", "predicate": "less_than", "value": "1" }
      ],
      "condition_type": "All",
      "actions": ["mark_as_read"]
    }
  ]
}"#;

/// Source whose inbox can grow between polls.
#[derive(Default)]
struct ScriptedSource {
    inbox: Mutex<Vec<Message>>,
}

impl ScriptedSource {
    fn deliver(&self, message: Message) {
        self.inbox.lock().unwrap().push(message);
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<Message>, MailboxError> {
        let inbox = self.inbox.lock().unwrap();
        let start = inbox.len().saturating_sub(limit);
        Ok(inbox[start..].to_vec())
    }
}

#[derive(Default)]
struct StubMailbox {
    read: Mutex<Vec<String>>,
    filed: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MailboxControl for StubMailbox {
    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
        self.read.lock().unwrap().push(message_id.to_string());
        Ok(())
    }

    async fn list_folders(&self) -> Result<Vec<Folder>, MailboxError> {
        Ok(vec![
            Folder::new("INBOX", "INBOX"),
            Folder::new("Finance", "Finance"),
        ])
    }

    async fn add_to_folder(&self, message_id: &str, folder_id: &str) -> Result<(), MailboxError> {
        self.filed
            .lock()
            .unwrap()
            .push((message_id.to_string(), folder_id.to_string()));
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    source: Arc<ScriptedSource>,
    mailbox: Arc<StubMailbox>,
    db: Arc<LibSqlBackend>,
    ctx: PollContext,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let rules_path = dir.path().join("rules.json");
    std::fs::write(&rules_path, RULES).unwrap();

    let source = Arc::new(ScriptedSource::default());
    let mailbox = Arc::new(StubMailbox::default());
    let db = Arc::new(
        LibSqlBackend::new_local(&dir.path().join("data").join("mail.db"))
            .await
            .unwrap(),
    );
    let engine = RulesEngine::from_rule_set(load_rules(&rules_path).unwrap());

    let ctx = PollContext {
        source: source.clone(),
        mailbox: mailbox.clone(),
        db: db.clone(),
        engine: Arc::new(engine),
        fetch_limit: 10,
        reprocess_seen: false,
    };

    Harness {
        _dir: dir,
        source,
        mailbox,
        db,
        ctx,
    }
}

#[tokio::test]
async fn poll_applies_rules_and_persists() {
    let h = harness().await;
    let now = Utc::now();
    h.source.deliver(
        Message::new("100", "billing@shop.example", "Your receipt", "")
            .with_received_at(now - Duration::days(3)),
    );
    h.source.deliver(
        Message::new("101", "friend@example.com", "Lunch", "").with_received_at(now),
    );

    let report = poll_once(&h.ctx).await.unwrap();

    assert_eq!(report.messages.len(), 2);
    assert_eq!(report.messages[0].fired_rule_names(), vec!["file-invoices"]);
    assert_eq!(report.messages[1].fired_rule_names(), vec!["stale"]);
    assert_eq!(
        *h.mailbox.filed.lock().unwrap(),
        vec![("100".to_string(), "Finance".to_string())]
    );
    assert_eq!(
        *h.mailbox.read.lock().unwrap(),
        vec!["100".to_string(), "101".to_string()]
    );

    assert_eq!(h.db.count_messages().await.unwrap(), 2);
    let stored = h.db.get_message("100").await.unwrap().unwrap();
    assert_eq!(stored.message.sender, "billing@shop.example");
    assert!(stored.processed_at.is_some());
}

#[tokio::test]
async fn later_polls_only_evaluate_new_mail() {
    let h = harness().await;
    h.source
        .deliver(Message::new("1", "billing@shop.example", "March invoice", ""));

    poll_once(&h.ctx).await.unwrap();
    assert!(poll_once(&h.ctx).await.is_none());

    h.source
        .deliver(Message::new("2", "someone@example.com", "Invoice #9", ""));
    let report = poll_once(&h.ctx).await.unwrap();

    assert_eq!(report.messages.len(), 1);
    assert_eq!(report.messages[0].message_id, "2");
    assert_eq!(h.mailbox.filed.lock().unwrap().len(), 2);
    assert_eq!(h.db.count_messages().await.unwrap(), 2);
}

#[tokio::test]
async fn reprocess_seen_runs_rules_again() {
    let mut h = harness().await;
    h.ctx.reprocess_seen = true;
    h.source
        .deliver(Message::new("1", "billing@shop.example", "hello", ""));

    poll_once(&h.ctx).await.unwrap();
    let report = poll_once(&h.ctx).await.unwrap();

    assert_eq!(report.messages.len(), 1);
    assert_eq!(h.mailbox.filed.lock().unwrap().len(), 2);
    assert_eq!(h.db.count_messages().await.unwrap(), 1);
}
