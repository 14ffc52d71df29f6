//! `Database` trait: async interface for message persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::rules::types::Message;

/// A persisted message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message: Message,
    /// When this process first saw the message.
    pub stored_at: DateTime<Utc>,
    /// When the rule set last ran over it.
    pub processed_at: Option<DateTime<Utc>>,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Store a message. Returns `false` if a message with the same ID exists.
    async fn insert_message(&self, message: &Message) -> Result<bool, DatabaseError>;

    /// Get a message by ID.
    async fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, DatabaseError>;

    /// Record that the rule set ran over a message.
    async fn mark_processed(&self, id: &str) -> Result<(), DatabaseError>;

    /// Total number of stored messages.
    async fn count_messages(&self) -> Result<usize, DatabaseError>;
}
