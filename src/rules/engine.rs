//! Rules engine: runs every rule against every message of a batch.
//!
//! Per message: match each rule (pure), then dispatch the actions of every
//! rule that fired. Nothing in here returns early; failures are collected in
//! the reports so a batch always runs to completion.

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RuleError;
use crate::rules::dispatch::{
    ActionOutcome, ActionResult, CachedFolders, MailboxControl, dispatch,
};
use crate::rules::loader::RuleSet;
use crate::rules::matcher::{RuleMatch, matches};
use crate::rules::types::{Message, Rule};

/// A rule that fired for a message, with what its actions did.
#[derive(Debug)]
pub struct FiredRule {
    pub rule: String,
    pub actions: Vec<ActionResult>,
}

/// Everything that happened to one message.
#[derive(Debug)]
pub struct MessageReport {
    pub message_id: String,
    /// One entry per rule, in rule order.
    pub matches: Vec<RuleMatch>,
    /// Rules that fired, in rule order.
    pub fired: Vec<FiredRule>,
}

impl MessageReport {
    /// Condition errors and failed actions for this message.
    pub fn errors(&self) -> impl Iterator<Item = &RuleError> {
        let condition_errors = self.matches.iter().flat_map(|m| m.errors.iter());
        let action_errors = self
            .fired
            .iter()
            .flat_map(|f| f.actions.iter())
            .filter_map(|a| match &a.outcome {
                ActionOutcome::Failed(e) => Some(e),
                _ => None,
            });
        condition_errors.chain(action_errors)
    }

    pub fn fired_rule_names(&self) -> Vec<&str> {
        self.fired.iter().map(|f| f.rule.as_str()).collect()
    }
}

/// Outcome of a batch run.
#[derive(Debug)]
pub struct BatchReport {
    pub run_id: Uuid,
    /// Rules rejected at load time, rendered for the report.
    pub rejected_rules: Vec<String>,
    /// One report per input message, in input order.
    pub messages: Vec<MessageReport>,
}

impl BatchReport {
    /// Number of (message, rule) pairs that fired.
    pub fn fired_count(&self) -> usize {
        self.messages.iter().map(|m| m.fired.len()).sum()
    }

    /// Number of condition and action failures across the batch.
    pub fn error_count(&self) -> usize {
        self.messages.iter().map(|m| m.errors().count()).sum()
    }
}

/// Rules engine for one processing run.
pub struct RulesEngine {
    rules: Vec<Rule>,
    rejected: Vec<RuleError>,
}

impl RulesEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            rejected: Vec::new(),
        }
    }

    /// Build from a loaded rule set, keeping its rejections for reporting.
    pub fn from_rule_set(set: RuleSet) -> Self {
        Self {
            rules: set.rules,
            rejected: set.rejected,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Load-time rejections carried by this engine.
    pub fn rejected(&self) -> &[RuleError] {
        &self.rejected
    }

    /// Match every rule against `message`. No side effects.
    pub fn evaluate(&self, message: &Message, now: DateTime<Utc>) -> Vec<RuleMatch> {
        self.rules
            .iter()
            .map(|rule| matches(rule, message, now))
            .collect()
    }

    /// Match every rule against `message` and dispatch the ones that fire.
    pub async fn process(
        &self,
        message: &Message,
        mailbox: &dyn MailboxControl,
        now: DateTime<Utc>,
    ) -> MessageReport {
        let matches = self.evaluate(message, now);
        let mut fired = Vec::new();

        for (rule, result) in self.rules.iter().zip(&matches) {
            if !result.matched {
                continue;
            }
            info!(rule = %rule.name, message_id = %message.id, "Rule fired");
            let actions = dispatch(&message.id, &rule.actions, mailbox).await;
            fired.push(FiredRule {
                rule: rule.name.clone(),
                actions,
            });
        }

        MessageReport {
            message_id: message.id.clone(),
            matches,
            fired,
        }
    }

    /// Process a batch of messages against the rule set.
    ///
    /// All messages share one evaluation time and one folder listing. Returns
    /// a report for every message, whatever failed along the way.
    pub async fn process_batch(
        &self,
        messages: &[Message],
        mailbox: &dyn MailboxControl,
    ) -> BatchReport {
        let run_id = Uuid::new_v4();
        let now = Utc::now();

        let mailbox = CachedFolders::new(mailbox);

        let mut reports = Vec::with_capacity(messages.len());
        for message in messages {
            reports.push(self.process(message, &mailbox, now).await);
        }

        let report = BatchReport {
            run_id,
            rejected_rules: self.rejected.iter().map(|e| e.to_string()).collect(),
            messages: reports,
        };

        if !report.rejected_rules.is_empty() {
            warn!(
                %run_id,
                rejected = report.rejected_rules.len(),
                "Some rules were skipped as malformed"
            );
        }
        info!(
            %run_id,
            messages = report.messages.len(),
            rules = self.rules.len(),
            fired = report.fired_count(),
            errors = report.error_count(),
            "Batch processed"
        );

        report
    }
}
