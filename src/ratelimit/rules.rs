//! Rate limit policy configuration.
//!
//! This module holds the policy vocabulary (topics, time windows, rules and
//! shared rule groups) and the declarative policy format. A policy is an
//! ordered list of [`PolicyEntry`] values, loaded from YAML or JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SendLimitError};

/// Longest window a rule may use (100 years).
const MAX_WINDOW_SECS: u64 = 100 * 365 * 86_400;

/// A notification topic.
///
/// Topics are case-insensitive; the canonical form is uppercase and every
/// constructor normalizes to it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self::new(&name)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<&Topic> for Topic {
    fn from(topic: &Topic) -> Self {
        topic.clone()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Time unit used to express rule windows in policy files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeUnit {
    #[serde(alias = "seconds", alias = "second", alias = "SECOND")]
    Seconds,
    #[serde(alias = "minutes", alias = "minute", alias = "MINUTE")]
    Minutes,
    #[serde(alias = "hours", alias = "hour", alias = "HOUR")]
    Hours,
    #[serde(alias = "days", alias = "day", alias = "DAY")]
    Days,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Minutes => 60,
            TimeUnit::Hours => 3_600,
            TimeUnit::Days => 86_400,
        }
    }

    fn label(&self, plural: bool) -> &'static str {
        match (self, plural) {
            (TimeUnit::Seconds, false) => "second",
            (TimeUnit::Seconds, true) => "seconds",
            (TimeUnit::Minutes, false) => "minute",
            (TimeUnit::Minutes, true) => "minutes",
            (TimeUnit::Hours, false) => "hour",
            (TimeUnit::Hours, true) => "hours",
            (TimeUnit::Days, false) => "day",
            (TimeUnit::Days, true) => "days",
        }
    }
}

/// Wire form of a time window: `{ size: 2, timeUnit: DAYS }`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct WindowSpec {
    size: u64,
    #[serde(rename = "timeUnit")]
    time_unit: TimeUnit,
}

/// The length of a sliding window, in whole seconds.
///
/// Windows compare by length, so `1 day` and `24 hours` are the same window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "WindowSpec", into = "WindowSpec")]
pub struct TimeWindow {
    secs: u64,
}

impl TimeWindow {
    pub fn new(size: u64, unit: TimeUnit) -> Self {
        Self {
            secs: size.saturating_mul(unit.seconds()),
        }
    }

    pub fn seconds(n: u64) -> Self {
        Self::new(n, TimeUnit::Seconds)
    }

    pub fn minutes(n: u64) -> Self {
        Self::new(n, TimeUnit::Minutes)
    }

    pub fn hours(n: u64) -> Self {
        Self::new(n, TimeUnit::Hours)
    }

    pub fn days(n: u64) -> Self {
        Self::new(n, TimeUnit::Days)
    }

    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.secs)
    }

    /// The window as a signed offset for timestamp arithmetic.
    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.secs.min(MAX_WINDOW_SECS) as i64)
    }

    pub fn as_secs(&self) -> u64 {
        self.secs
    }

    /// Largest unit that expresses this window exactly.
    fn largest_exact_unit(&self) -> TimeUnit {
        [TimeUnit::Days, TimeUnit::Hours, TimeUnit::Minutes]
            .into_iter()
            .find(|unit| self.secs > 0 && self.secs % unit.seconds() == 0)
            .unwrap_or(TimeUnit::Seconds)
    }
}

impl TryFrom<WindowSpec> for TimeWindow {
    type Error = String;

    fn try_from(spec: WindowSpec) -> std::result::Result<Self, Self::Error> {
        spec.size
            .checked_mul(spec.time_unit.seconds())
            .map(|secs| TimeWindow { secs })
            .ok_or_else(|| format!("time window of {} {:?} is too large", spec.size, spec.time_unit))
    }
}

impl From<TimeWindow> for WindowSpec {
    fn from(window: TimeWindow) -> Self {
        let time_unit = window.largest_exact_unit();
        WindowSpec {
            size: window.secs / time_unit.seconds(),
            time_unit,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spec = WindowSpec::from(*self);
        write!(f, "{} {}", spec.size, spec.time_unit.label(spec.size != 1))
    }
}

/// A rate limit rule: at most `limit` sends within `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rule {
    /// Number of sends allowed per window
    pub limit: u32,
    /// The sliding window the limit applies to
    #[serde(rename = "timeWindow")]
    pub window: TimeWindow,
}

impl Rule {
    /// `Rule::every(2, TimeWindow::days(1))` allows two sends per day.
    pub fn every(limit: u32, window: TimeWindow) -> Self {
        Self { limit, window }
    }

    /// Check the rule invariants: `limit >= 1` and a positive, bounded window.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(SendLimitError::Config(format!(
                "rule `{self}` must allow at least one send"
            )));
        }
        if self.window.secs == 0 {
            return Err(SendLimitError::Config(format!(
                "rule `{self}` must have a positive time window"
            )));
        }
        if self.window.secs > MAX_WINDOW_SECS {
            return Err(SendLimitError::Config(format!(
                "rule `{self}` exceeds the maximum time window"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} every {}", self.limit, self.window)
    }
}

/// Rules whose count is pooled across every topic in the group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SharedRuleGroup {
    pub topics: BTreeSet<Topic>,
    pub rules: BTreeSet<Rule>,
}

impl SharedRuleGroup {
    pub fn new(topics: BTreeSet<Topic>, rules: BTreeSet<Rule>) -> Self {
        Self { topics, rules }
    }

    pub fn covers(&self, topic: &Topic) -> bool {
        self.topics.contains(topic)
    }
}

/// How a policy entry treats its topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    /// Rules apply to each topic's own sends
    Regular,
    /// Rules apply to the combined sends of all listed topics
    Shared,
    /// Never rate limited
    Unlimited,
    /// Always blocked
    Prohibited,
}

/// One entry of a declarative rate limit policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub topics: Vec<Topic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,
}

impl PolicyEntry {
    pub fn regular(topics: Vec<Topic>, rules: Vec<Rule>) -> Self {
        Self {
            entry_type: EntryType::Regular,
            topics,
            rules: Some(rules),
        }
    }

    pub fn shared(topics: Vec<Topic>, rules: Vec<Rule>) -> Self {
        Self {
            entry_type: EntryType::Shared,
            topics,
            rules: Some(rules),
        }
    }

    pub fn unlimited(topics: Vec<Topic>) -> Self {
        Self {
            entry_type: EntryType::Unlimited,
            topics,
            rules: None,
        }
    }

    pub fn prohibited(topics: Vec<Topic>) -> Self {
        Self {
            entry_type: EntryType::Prohibited,
            topics,
            rules: None,
        }
    }

    /// The entry's rules, or an error if a rule-based entry has none.
    pub fn required_rules(&self) -> Result<&[Rule]> {
        match self.rules.as_deref() {
            Some(rules) if !rules.is_empty() => Ok(rules),
            _ => Err(SendLimitError::Config(format!(
                "{:?} entry for [{}] requires at least one rule",
                self.entry_type,
                self.topic_list()
            ))),
        }
    }

    /// Validate the entry shape and every rule it carries.
    pub fn validate(&self) -> Result<()> {
        if self.topics.is_empty() {
            return Err(SendLimitError::Config(format!(
                "{:?} entry must name at least one topic",
                self.entry_type
            )));
        }

        match self.entry_type {
            EntryType::Regular | EntryType::Shared => {
                for rule in self.required_rules()? {
                    rule.validate()?;
                }
            }
            EntryType::Unlimited | EntryType::Prohibited => {}
        }

        Ok(())
    }

    fn topic_list(&self) -> String {
        self.topics
            .iter()
            .map(Topic::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A declarative policy: an ordered list of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyConfig {
    pub entries: Vec<PolicyEntry>,
}

/// Alternate document shape with the list under a `policies` key.
#[derive(Deserialize)]
struct PolicyDocument {
    policies: Vec<PolicyEntry>,
}

impl PolicyConfig {
    pub fn new(entries: Vec<PolicyEntry>) -> Self {
        Self { entries }
    }

    /// Load a policy file. `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policy");

        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json(&contents)
        } else {
            Self::from_yaml(&contents)
        }
    }

    /// Load a policy from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(policy_parse_error)?;

        // A top-level list is the plain form, anything else must carry a `policies` key
        if document.is_sequence() {
            serde_yaml::from_str::<Vec<PolicyEntry>>(yaml)
                .map(Self::new)
                .map_err(policy_parse_error)
        } else {
            serde_yaml::from_str::<PolicyDocument>(yaml)
                .map(|doc| Self::new(doc.policies))
                .map_err(policy_parse_error)
        }
    }

    /// Load a policy from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(policy_parse_error)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| SendLimitError::Config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SendLimitError::Config(e.to_string()))
    }
}

fn policy_parse_error(err: impl fmt::Display) -> SendLimitError {
    SendLimitError::Config(format!("Failed to parse rate limit policy: {err}"))
}
