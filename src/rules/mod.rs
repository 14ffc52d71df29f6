//! Declarative mail rules.
//!
//! Every message flows through:
//! 1. `resolver::resolve()`: field name → message value
//! 2. `predicate::evaluate()`: one condition → bool
//! 3. `matcher::matches()`: conditions folded with ALL / ANY
//! 4. `dispatch::dispatch()`: fired rule's actions → `MailboxControl`
//!
//! `engine::RulesEngine` drives the above over a batch, `loader` builds the
//! rule set from `rules.json`.

pub mod dispatch;
pub mod engine;
pub mod loader;
pub mod matcher;
pub mod predicate;
pub mod resolver;
pub mod types;

pub use dispatch::{ActionOutcome, ActionResult, CachedFolders, Folder, MailboxControl, dispatch};
pub use engine::{BatchReport, FiredRule, MessageReport, RulesEngine};
pub use loader::{RuleSet, load_rules};
pub use matcher::{RuleMatch, matches};
pub use types::{Action, Combinator, Condition, Field, Message, Predicate, Rule};
