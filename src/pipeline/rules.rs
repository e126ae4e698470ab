//! Filter engine: decides which fetched messages get a row.
//!
//! A rule is a `(field, operator, value)` triple. A message qualifies only if
//! every rule holds; an empty rule set lets everything through.
//! Comparisons ignore case unless the rule set is built case-sensitive.
//!
//! Rules are validated once, when the set is built from configuration, so
//! evaluation itself cannot fail.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::pipeline::normalize::to_plain_text;
use crate::pipeline::types::Message;

/// Which message field a rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    Sender,
    SenderDomain,
    Subject,
    /// Plain-text rendering of the body.
    Body,
    Date,
}

impl RuleField {
    fn label(&self) -> &'static str {
        match self {
            Self::Sender => "Sender",
            Self::SenderDomain => "Domain",
            Self::Subject => "Subject",
            Self::Body => "Body",
            Self::Date => "Date",
        }
    }
}

/// How a rule compares the field against its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    Contains,
    NotContains,
    /// Strictly earlier than the value. `date` only.
    Before,
    /// At or after the value. `date` only.
    After,
}

impl RuleOperator {
    fn label(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::Contains => "contains",
            Self::NotContains => "not contains",
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

/// A single configured rule, as it appears in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub field: RuleField,
    pub operator: RuleOperator,
    pub value: String,
}

impl FilterRule {
    pub fn new(field: RuleField, operator: RuleOperator, value: impl Into<String>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
        }
    }
}

/// A date rule value: midnight UTC for `YYYY-MM-DD`, or an exact instant.
#[derive(Debug, Clone, Copy)]
struct DateBound {
    instant: DateTime<Utc>,
    whole_day: bool,
}

impl DateBound {
    fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            return date.and_hms_opt(0, 0, 0).map(|dt| Self {
                instant: dt.and_utc(),
                whole_day: true,
            });
        }
        DateTime::parse_from_rfc3339(value).ok().map(|dt| Self {
            instant: dt.with_timezone(&Utc),
            whole_day: false,
        })
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: FilterRule,
    /// Comparison value, lowercased for case-insensitive sets.
    needle: String,
    date: Option<DateBound>,
}

/// A validated rule set.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    case_sensitive: bool,
}

impl RuleSet {
    /// Build a rule set, rejecting operator/field combinations that cannot hold.
    pub fn new(rules: Vec<FilterRule>, case_sensitive: bool) -> Result<Self, ConfigError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (index, rule) in rules.into_iter().enumerate() {
            let key = format!("filter_rules[{index}]");
            let date = match (rule.field, rule.operator) {
                (RuleField::Date, RuleOperator::Equals | RuleOperator::Before | RuleOperator::After) => {
                    Some(DateBound::parse(&rule.value).ok_or_else(|| ConfigError::InvalidValue {
                        key: key.clone(),
                        message: format!(
                            "'{}' is not a YYYY-MM-DD date or RFC 3339 timestamp",
                            rule.value
                        ),
                    })?)
                }
                (RuleField::Date, op) => {
                    return Err(ConfigError::InvalidValue {
                        key,
                        message: format!("operator '{}' does not apply to date", op.label()),
                    });
                }
                (field, op @ (RuleOperator::Before | RuleOperator::After)) => {
                    return Err(ConfigError::InvalidValue {
                        key,
                        message: format!(
                            "operator '{}' only applies to date, not {}",
                            op.label(),
                            field.label().to_lowercase()
                        ),
                    });
                }
                _ => None,
            };
            let needle = if case_sensitive {
                rule.value.clone()
            } else {
                rule.value.to_lowercase()
            };
            compiled.push(CompiledRule { rule, needle, date });
        }
        Ok(Self {
            rules: compiled,
            case_sensitive,
        })
    }

    /// A rule set that matches every message.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True iff every rule holds for `message`.
    pub fn matches(&self, message: &Message) -> bool {
        let body = self.body_text(message);
        self.all_hold(message, body.as_deref())
    }

    /// [`RuleSet::matches`] with the body already rendered as plain text.
    pub fn matches_text(&self, message: &Message, body_text: &str) -> bool {
        self.all_hold(message, Some(body_text))
    }

    /// Labels of the rules that hold, e.g. `Subject contains invoice`.
    pub fn matched_labels(&self, message: &Message) -> Vec<String> {
        let body = self.body_text(message);
        self.labels_holding(message, body.as_deref())
    }

    /// [`RuleSet::matched_labels`] with the body already rendered as plain text.
    pub fn matched_labels_text(&self, message: &Message, body_text: &str) -> Vec<String> {
        self.labels_holding(message, Some(body_text))
    }

    fn all_hold(&self, message: &Message, body: Option<&str>) -> bool {
        let ok = self.rules.iter().all(|rule| self.holds(rule, message, body));
        if !ok {
            debug!(id = %message.id, sender = %message.sender, "Message rejected by filter rules");
        }
        ok
    }

    fn labels_holding(&self, message: &Message, body: Option<&str>) -> Vec<String> {
        self.rules
            .iter()
            .filter(|rule| self.holds(rule, message, body))
            .map(|rule| {
                format!(
                    "{} {} {}",
                    rule.rule.field.label(),
                    rule.rule.operator.label(),
                    rule.rule.value
                )
            })
            .collect()
    }

    /// Plain-text body, computed only when some rule looks at it.
    fn body_text(&self, message: &Message) -> Option<String> {
        self.rules
            .iter()
            .any(|r| r.rule.field == RuleField::Body)
            .then(|| to_plain_text(&message.body, message.content_type))
    }

    fn holds(&self, rule: &CompiledRule, message: &Message, body: Option<&str>) -> bool {
        if let Some(bound) = rule.date {
            return date_holds(rule.rule.operator, bound, message.timestamp);
        }

        let haystack = match rule.rule.field {
            RuleField::Sender => message.sender.as_str(),
            RuleField::SenderDomain => message.sender_domain(),
            RuleField::Subject => message.subject.as_str(),
            RuleField::Body => body.unwrap_or(""),
            // Date rules always carry a bound.
            RuleField::Date => return false,
        };
        let haystack = if self.case_sensitive {
            haystack.to_string()
        } else {
            haystack.to_lowercase()
        };

        match rule.rule.operator {
            RuleOperator::Equals => haystack.trim() == rule.needle.trim(),
            RuleOperator::Contains => haystack.contains(&rule.needle),
            RuleOperator::NotContains => !haystack.contains(&rule.needle),
            RuleOperator::Before | RuleOperator::After => false,
        }
    }
}

fn date_holds(op: RuleOperator, bound: DateBound, timestamp: DateTime<Utc>) -> bool {
    match op {
        RuleOperator::Before => timestamp < bound.instant,
        RuleOperator::After => timestamp >= bound.instant,
        RuleOperator::Equals if bound.whole_day => {
            timestamp.date_naive() == bound.instant.date_naive()
        }
        RuleOperator::Equals => timestamp == bound.instant,
        _ => false,
    }
}

/// Pure predicate: does `message` satisfy every rule in `rules`?
pub fn matches(message: &Message, rules: &RuleSet) -> bool {
    rules.matches(message)
}
