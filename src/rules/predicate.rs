//! Predicate evaluation for a single condition.

use chrono::{DateTime, Utc};

use crate::error::RuleError;
use crate::rules::resolver::resolve;
use crate::rules::types::{Condition, Message, Predicate};

const SECONDS_PER_DAY: i64 = 86_400;

/// Evaluate one condition against a message as of `now`.
///
/// Returns `Err(InvalidPredicateArgument)` when a `LessThanDays` value is not
/// an integer. Unknown predicates evaluate to `Ok(false)`.
pub fn evaluate(
    condition: &Condition,
    message: &Message,
    now: DateTime<Utc>,
) -> Result<bool, RuleError> {
    match &condition.predicate {
        Predicate::Contains => {
            let needle = condition.value.to_lowercase();
            Ok(resolve(message, &condition.field)
                .to_lowercase()
                .contains(&needle))
        }
        Predicate::Equals => Ok(resolve(message, &condition.field).to_lowercase()
            == condition.value.to_lowercase()),
        Predicate::LessThanDays => {
            let Some(received_at) = message.received_at else {
                return Ok(false);
            };
            let max_days = parse_days(condition)?;
            Ok(days_old(received_at, now) < max_days)
        }
        Predicate::Unknown(_) => Ok(false),
    }
}

/// Whole days elapsed between `received_at` and `now`, rounded down.
pub fn days_old(received_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(received_at)
        .num_seconds()
        .div_euclid(SECONDS_PER_DAY)
}

fn parse_days(condition: &Condition) -> Result<i64, RuleError> {
    condition
        .value
        .trim()
        .parse::<i64>()
        .map_err(|e| RuleError::InvalidPredicateArgument {
            predicate: condition.predicate.label().to_string(),
            value: condition.value.clone(),
            reason: e.to_string(),
        })
}
