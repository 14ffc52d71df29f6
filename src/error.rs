//! Error types for mail-rules.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Errors raised by the mailbox collaborator (IMAP transport).
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication failed for {username}")]
    AuthFailed { username: String },

    #[error("Command {command} failed: {response}")]
    CommandFailed { command: String, response: String },

    #[error("Connection closed by server")]
    Closed,

    #[error("Failed to parse message {uid}")]
    Parse { uid: String },

    #[error("Mailbox task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rule loading, evaluation and dispatch errors.
///
/// None of these abort a processing run. The engine records them in its
/// reports and keeps going with sibling conditions, actions, rules and messages.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Malformed rule {rule}: {reason}")]
    MalformedRule { rule: String, reason: String },

    #[error("Invalid argument {value:?} for predicate {predicate}: {reason}")]
    InvalidPredicateArgument {
        predicate: String,
        value: String,
        reason: String,
    },

    #[error("Action {action} failed for message {message_id}: {source}")]
    ActionDispatch {
        action: String,
        message_id: String,
        #[source]
        source: MailboxError,
    },

    #[error("Failed to parse rule set: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn load(json: &str) -> Result<usize> {
        let set = crate::rules::RuleSet::from_json_str(json)?;
        Ok(set.rules.len())
    }

    #[test]
    fn rule_errors_convert_to_top_level() {
        let err = load("not json").unwrap_err();
        assert!(matches!(err, Error::Rule(RuleError::Parse(_))));
        assert!(err.to_string().starts_with("Rule error: Failed to parse rule set"));
    }

    #[test]
    fn dispatch_error_keeps_its_source() {
        let err = RuleError::ActionDispatch {
            action: "mark_as_read".into(),
            message_id: "12".into(),
            source: MailboxError::Closed,
        };
        assert_eq!(
            err.to_string(),
            "Action mark_as_read failed for message 12: Connection closed by server"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "Connection closed by server");
    }
}
