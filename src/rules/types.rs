//! Rule data model: messages, conditions, combinators and actions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Message ─────────────────────────────────────────────────────────

/// A fetched mail item, as seen by the rules engine.
///
/// Built by the message source before evaluation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique ID within the mailbox (the IMAP UID for the IMAP source).
    pub id: String,
    /// `From` address.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// When the message was received, if the source could tell.
    pub received_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: None,
        }
    }

    /// Set the receive timestamp.
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }
}

// ── Field ───────────────────────────────────────────────────────────

/// Which message attribute a condition reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Sender,
    Subject,
    Body,
    ReceivedAt,
    /// Anything we don't recognize. Resolves to an empty value.
    Unknown(String),
}

impl Field {
    /// Parse a field name from a rule definition.
    ///
    /// Names are normalized first (trimmed, lower-cased, spaces to
    /// underscores), so `"Received At"` and `"received_at"` are the same field.
    pub fn parse(name: &str) -> Self {
        let normalized = normalize_name(name);
        match normalized.as_str() {
            "sender" | "from" => Self::Sender,
            "subject" => Self::Subject,
            "body" | "message" => Self::Body,
            "received_at" | "received_date" | "date_received" => Self::ReceivedAt,
            _ => Self::Unknown(normalized),
        }
    }

    /// Normalized identifier, for logs.
    pub fn label(&self) -> &str {
        match self {
            Self::Sender => "sender",
            Self::Subject => "subject",
            Self::Body => "body",
            Self::ReceivedAt => "received_at",
            Self::Unknown(name) => name,
        }
    }
}

// ── Predicate ───────────────────────────────────────────────────────

/// How a condition compares the resolved field with its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Case-insensitive substring test.
    Contains,
    /// Case-insensitive equality.
    Equals,
    /// Message is younger than N whole days.
    LessThanDays,
    /// Not understood by this version. Never matches.
    Unknown(String),
}

impl Predicate {
    pub fn parse(name: &str) -> Self {
        let normalized = normalize_name(name);
        match normalized.as_str() {
            "contains" => Self::Contains,
            "equals" => Self::Equals,
            "less_than" | "less_than_days" => Self::LessThanDays,
            _ => Self::Unknown(normalized),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Contains => "contains",
            Self::Equals => "equals",
            Self::LessThanDays => "less_than_days",
            Self::Unknown(name) => name,
        }
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

// ── Condition ───────────────────────────────────────────────────────

/// A single `(field, predicate, value)` test against a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field: Field,
    pub predicate: Predicate,
    pub value: String,
}

impl Condition {
    pub fn new(field: Field, predicate: Predicate, value: impl Into<String>) -> Self {
        Self {
            field,
            predicate,
            value: value.into(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:?}",
            self.field.label(),
            self.predicate.label(),
            self.value
        )
    }
}

// ── Combinator ──────────────────────────────────────────────────────

/// How a rule folds its condition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// Every condition must hold.
    All,
    /// At least one condition must hold.
    Any,
}

impl Combinator {
    /// Parse `All` / `Any` (case-insensitive). `None` for anything else.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "all" => Some(Self::All),
            "any" => Some(Self::Any),
            _ => None,
        }
    }
}

// ── Action ──────────────────────────────────────────────────────────

/// A side effect requested when a rule fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    MarkAsRead,
    MoveToFolder { folder: String },
}

/// Prefix used by the persisted encoding of folder moves.
const MOVE_TO_FOLDER_PREFIX: &str = "move_to_folder:";

impl Action {
    /// Decode the persisted string form: `mark_as_read` or `move_to_folder:<name>`.
    pub fn decode(encoded: &str) -> Result<Self, String> {
        let trimmed = encoded.trim();
        if trimmed.eq_ignore_ascii_case("mark_as_read") {
            return Ok(Self::MarkAsRead);
        }

        let prefix_len = MOVE_TO_FOLDER_PREFIX.len();
        if trimmed.len() >= prefix_len
            && trimmed.is_char_boundary(prefix_len)
            && trimmed[..prefix_len].eq_ignore_ascii_case(MOVE_TO_FOLDER_PREFIX)
        {
            let folder = trimmed[prefix_len..].trim();
            if folder.is_empty() {
                return Err(format!("action {encoded:?} names no folder"));
            }
            return Ok(Self::MoveToFolder {
                folder: folder.to_string(),
            });
        }

        Err(format!("unknown action {encoded:?}"))
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MarkAsRead => "mark_as_read",
            Self::MoveToFolder { .. } => "move_to_folder",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkAsRead => f.write_str("mark_as_read"),
            Self::MoveToFolder { folder } => write!(f, "{MOVE_TO_FOLDER_PREFIX}{folder}"),
        }
    }
}

// ── Rule ────────────────────────────────────────────────────────────

/// A named set of conditions, a combinator, and the actions to run on a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub conditions: Vec<Condition>,
    pub combinator: Combinator,
    pub actions: Vec<Action>,
}

impl Rule {
    pub fn new(name: impl Into<String>, combinator: Combinator) -> Self {
        Self {
            name: name.into(),
            conditions: Vec::new(),
            combinator,
            actions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_are_normalized() {
        assert_eq!(Field::parse("Subject"), Field::Subject);
        assert_eq!(Field::parse("  SENDER "), Field::Sender);
        assert_eq!(Field::parse("Received At"), Field::ReceivedAt);
        assert_eq!(Field::parse("received_date"), Field::ReceivedAt);
        assert_eq!(Field::parse("From"), Field::Sender);
    }

    #[test]
    fn unknown_field_keeps_normalized_name() {
        assert_eq!(
            Field::parse("Reply To"),
            Field::Unknown("reply_to".to_string())
        );
        assert_eq!(Field::parse("Reply To").label(), "reply_to");
    }

    #[test]
    fn predicate_parsing() {
        assert_eq!(Predicate::parse("contains"), Predicate::Contains);
        assert_eq!(Predicate::parse("Equals"), Predicate::Equals);
        assert_eq!(Predicate::parse("less_than"), Predicate::LessThanDays);
        assert_eq!(Predicate::parse("Less Than Days"), Predicate::LessThanDays);
        assert_eq!(
            Predicate::parse("matches"),
            Predicate::Unknown("matches".to_string())
        );
    }

    #[test]
    fn combinator_parsing() {
        assert_eq!(Combinator::parse("All"), Some(Combinator::All));
        assert_eq!(Combinator::parse("any"), Some(Combinator::Any));
        assert_eq!(Combinator::parse("Most"), None);
        assert_eq!(Combinator::parse(""), None);
    }

    #[test]
    fn decode_mark_as_read() {
        assert_eq!(Action::decode("mark_as_read"), Ok(Action::MarkAsRead));
        assert_eq!(Action::decode(" Mark_As_Read "), Ok(Action::MarkAsRead));
    }

    #[test]
    fn decode_move_to_folder() {
        assert_eq!(
            Action::decode("move_to_folder:Archive"),
            Ok(Action::MoveToFolder {
                folder: "Archive".into()
            })
        );
        // Folder names may themselves contain colons
        assert_eq!(
            Action::decode("move_to_folder:Work: Clients"),
            Ok(Action::MoveToFolder {
                folder: "Work: Clients".into()
            })
        );
    }

    #[test]
    fn decode_rejects_unknown_and_empty_folder() {
        assert!(Action::decode("teleport").is_err());
        assert!(Action::decode("move_to_folder:").is_err());
        assert!(Action::decode("move_to_folder:   ").is_err());
        assert!(Action::decode("").is_err());
    }

    #[test]
    fn action_display_matches_encoding() {
        let action = Action::MoveToFolder {
            folder: "Receipts".into(),
        };
        assert_eq!(action.to_string(), "move_to_folder:Receipts");
        assert_eq!(Action::decode(&action.to_string()), Ok(action));
        assert_eq!(Action::MarkAsRead.label(), "mark_as_read");
    }

    #[test]
    fn condition_display() {
        let cond = Condition::new(Field::Subject, Predicate::Contains, "invoice");
        assert_eq!(cond.to_string(), r#"subject contains "invoice""#);
    }
}
