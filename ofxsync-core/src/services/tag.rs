//! Tagging policies for downloaded transactions

use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::config::TaggingSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{Account, Transaction};
use crate::ports::TaggingPolicy;

/// Same fixed tags on every transaction
#[derive(Debug, Clone, Default)]
pub struct DefaultTags {
    tags: Vec<String>,
}

impl DefaultTags {
    pub fn new(tags: &[String]) -> Self {
        Self {
            tags: Transaction::normalize_tags(tags),
        }
    }
}

impl TaggingPolicy for DefaultTags {
    fn tags_for(&self, _account: &Account, _transaction: &Transaction) -> Vec<String> {
        self.tags.clone()
    }
}

#[derive(Debug, Clone)]
struct TagRule {
    pattern: Regex,
    tags: Vec<String>,
}

/// Description rules on top of the default tags
///
/// Rules are additive: every matching rule contributes its tags, not just the
/// first one.
#[derive(Debug, Clone)]
pub struct RuleTagPolicy {
    defaults: DefaultTags,
    rules: Vec<TagRule>,
}

impl RuleTagPolicy {
    /// Compile rules; an invalid pattern is a configuration error
    pub fn new(settings: &TaggingSettings) -> Result<Self> {
        let rules = settings
            .rules
            .iter()
            .map(|rule| {
                let pattern = RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        Error::config(format!("invalid tag rule pattern '{}': {}", rule.pattern, e))
                    })?;
                Ok(TagRule {
                    pattern,
                    tags: Transaction::normalize_tags(&rule.tags),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            defaults: DefaultTags::new(&settings.default_tags),
            rules,
        })
    }
}

impl TaggingPolicy for RuleTagPolicy {
    fn tags_for(&self, account: &Account, transaction: &Transaction) -> Vec<String> {
        let mut tags = self.defaults.tags_for(account, transaction);
        for rule in &self.rules {
            if rule.pattern.is_match(&transaction.description) {
                tags.extend(rule.tags.iter().cloned());
            }
        }
        Transaction::normalize_tags(&tags)
    }
}

/// Policy described by the tagging settings
pub fn policy_from_settings(settings: &TaggingSettings) -> Result<Arc<dyn TaggingPolicy>> {
    if settings.rules.is_empty() {
        Ok(Arc::new(DefaultTags::new(&settings.default_tags)))
    } else {
        Ok(Arc::new(RuleTagPolicy::new(settings)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TagRuleSettings;
    use crate::domain::{AccountType, Bank};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn account() -> Account {
        Account::new(
            Uuid::new_v4(),
            "Card",
            "4111",
            AccountType::Credit,
            Bank::new(Uuid::new_v4(), "MYBANK", "https://ofx.mybank.test"),
        )
    }

    fn transaction(description: &str) -> Transaction {
        let posted = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut tx = Transaction::new(Uuid::new_v4(), Uuid::new_v4(), Decimal::ONE, posted);
        tx.description = description.to_string();
        tx
    }

    fn rule(pattern: &str, tags: &[&str]) -> TagRuleSettings {
        TagRuleSettings {
            pattern: pattern.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn settings(defaults: &[&str], rules: Vec<TagRuleSettings>) -> TaggingSettings {
        TaggingSettings {
            default_tags: defaults.iter().map(|t| t.to_string()).collect(),
            rules,
        }
    }

    #[test]
    fn test_default_tags() {
        let policy = DefaultTags::new(&["ofx".to_string(), " new ".to_string(), "ofx".to_string()]);
        assert_eq!(policy.tags_for(&account(), &transaction("anything")), vec!["ofx", "new"]);
    }

    #[test]
    fn test_rules_are_additive() {
        let policy = RuleTagPolicy::new(&settings(
            &["ofx"],
            vec![
                rule("^amzn", &["shopping"]),
                rule("order", &["online", "shopping"]),
                rule("payroll", &["income"]),
            ],
        ))
        .unwrap();

        let tags = policy.tags_for(&account(), &transaction("AMZNORDER123"));
        assert_eq!(tags, vec!["ofx", "shopping", "online"]);

        let tags = policy.tags_for(&account(), &transaction("Coffee"));
        assert_eq!(tags, vec!["ofx"]);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = RuleTagPolicy::new(&settings(&[], vec![rule("(unclosed", &["x"])])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(policy_from_settings(&settings(&[], vec![rule("[", &["x"])])).is_err());
    }

    #[test]
    fn test_policy_from_settings() {
        let policy = policy_from_settings(&settings(&["a"], vec![])).unwrap();
        assert_eq!(policy.tags_for(&account(), &transaction("x")), vec!["a"]);

        let policy = policy_from_settings(&settings(&[], vec![rule("x", &["b"])])).unwrap();
        assert_eq!(policy.tags_for(&account(), &transaction("X")), vec!["b"]);
    }
}
