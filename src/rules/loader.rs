//! Rule set loader: decodes `rules.json` into typed rules.
//!
//! Document shape:
//!
//! ```json
//! {
//!   "rules": [
//!     {
//!       "name": "archive-newsletters",
//!       "conditions": [{ "field": "Subject", "predicate": "contains", "value": "newsletter" }],
//!       "condition_type": "All",
//!       "actions": ["mark_as_read", "move_to_folder:Archive"]
//!     }
//!   ]
//! }
//! ```
//!
//! Each rule is decoded on its own. A rule that fails to decode is rejected
//! with `RuleError::MalformedRule` and the rest still load. Only a document
//! that isn't JSON, or has no `rules` list, fails the whole load.

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::RuleError;
use crate::rules::types::{Action, Combinator, Condition, Field, Predicate, Rule};

#[derive(Debug, Deserialize)]
struct RuleDocument {
    rules: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RuleDefinition {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    conditions: Vec<ConditionDefinition>,
    condition_type: String,
    #[serde(default)]
    actions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConditionDefinition {
    field: String,
    predicate: String,
    #[serde(default)]
    value: String,
}

/// Rules loaded for one processing run, plus the ones that were rejected.
#[derive(Debug, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    pub rejected: Vec<RuleError>,
}

impl RuleSet {
    /// Decode a rule document from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, RuleError> {
        let document: RuleDocument = serde_json::from_str(json)?;
        let mut set = RuleSet::default();

        for (index, value) in document.rules.into_iter().enumerate() {
            let fallback_name = value
                .get("name")
                .and_then(|n| n.as_str())
                .map(String::from)
                .unwrap_or_else(|| default_name(index));

            let decoded = serde_json::from_value::<RuleDefinition>(value)
                .map_err(|e| RuleError::MalformedRule {
                    rule: fallback_name,
                    reason: e.to_string(),
                })
                .and_then(|def| decode_rule(index, def));

            match decoded {
                Ok(rule) => set.rules.push(rule),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed rule");
                    set.rejected.push(e);
                }
            }
        }

        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Load the rule set from a JSON file.
pub fn load_rules(path: &Path) -> Result<RuleSet, RuleError> {
    let json = std::fs::read_to_string(path)?;
    let set = RuleSet::from_json_str(&json)?;
    info!(
        path = %path.display(),
        loaded = set.rules.len(),
        rejected = set.rejected.len(),
        "Rules loaded"
    );
    Ok(set)
}

fn default_name(index: usize) -> String {
    format!("rule-{}", index + 1)
}

fn decode_rule(index: usize, def: RuleDefinition) -> Result<Rule, RuleError> {
    let name = def.name.unwrap_or_else(|| default_name(index));
    let malformed = |reason: String| RuleError::MalformedRule {
        rule: name.clone(),
        reason,
    };

    let combinator = Combinator::parse(&def.condition_type).ok_or_else(|| {
        malformed(format!(
            "unknown condition_type {:?} (expected All or Any)",
            def.condition_type
        ))
    })?;

    if def.conditions.is_empty() {
        return Err(malformed("rule has no conditions".to_string()));
    }

    let actions = def
        .actions
        .iter()
        .map(|a| Action::decode(a))
        .collect::<Result<Vec<_>, _>>()
        .map_err(malformed)?;

    let conditions = def
        .conditions
        .into_iter()
        .map(|c| Condition::new(Field::parse(&c.field), Predicate::parse(&c.predicate), c.value))
        .collect();

    Ok(Rule {
        name,
        conditions,
        combinator,
        actions,
    })
}
