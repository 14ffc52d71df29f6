//! Rule matching: fold condition results with the rule's combinator.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::RuleError;
use crate::rules::predicate::evaluate;
use crate::rules::types::{Combinator, Message, Rule};

/// Outcome of matching one rule against one message.
#[derive(Debug)]
pub struct RuleMatch {
    /// Name of the rule.
    pub rule: String,
    /// Whether the rule fires.
    pub matched: bool,
    /// Per-condition results, in declaration order.
    pub results: Vec<bool>,
    /// Conditions that could not be evaluated (counted as `false` in `results`).
    pub errors: Vec<RuleError>,
}

/// Match `rule` against `message` as of `now`.
///
/// Every condition is evaluated, in order. Under `All` an empty condition
/// list matches (vacuous truth); under `Any` it does not.
pub fn matches(rule: &Rule, message: &Message, now: DateTime<Utc>) -> RuleMatch {
    let mut results = Vec::with_capacity(rule.conditions.len());
    let mut errors = Vec::new();

    for condition in &rule.conditions {
        match evaluate(condition, message, now) {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!(
                    rule = %rule.name,
                    message_id = %message.id,
                    condition = %condition,
                    error = %e,
                    "Condition could not be evaluated, treating as non-matching"
                );
                results.push(false);
                errors.push(e);
            }
        }
    }

    let matched = match rule.combinator {
        Combinator::All => results.iter().all(|r| *r),
        Combinator::Any => results.iter().any(|r| *r),
    };

    debug!(
        rule = %rule.name,
        message_id = %message.id,
        matched,
        ?results,
        "Rule evaluated"
    );

    RuleMatch {
        rule: rule.name.clone(),
        matched,
        results,
        errors,
    }
}
