//! Mail Rules: rule-driven IMAP mailbox automation.

pub mod config;
pub mod error;
pub mod mailbox;
pub mod poller;
pub mod rules;
pub mod store;
