//! Resolved rate limit policy.
//!
//! A [`PolicyIndex`] folds an ordered list of [`PolicyEntry`] values into a
//! per-topic classification. Classification order is prohibited, then
//! unlimited, then regular; topics with no entry at all are unconfigured and
//! treated as prohibited by the provider.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::rules::{EntryType, PolicyEntry, Rule, SharedRuleGroup, Topic};
use crate::error::{Result, SendLimitError};

/// How construction treats topics of the known universe that no entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Fail construction
    Strict,
    /// Treat them as prohibited
    #[default]
    Lenient,
}

/// The resolved treatment of one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Always blocked
    Prohibited,
    /// Never blocked
    Unlimited,
    /// Governed by the topic's own rules and the shared groups it belongs to
    Regular {
        isolated_rules: BTreeSet<Rule>,
        shared_groups: BTreeSet<SharedRuleGroup>,
    },
    /// No entry names this topic
    Unconfigured,
}

/// Immutable per-topic policy, built once from configuration entries.
#[derive(Debug, Clone)]
pub struct PolicyIndex {
    entries: Vec<PolicyEntry>,
    prohibited: BTreeSet<Topic>,
    unlimited: BTreeSet<Topic>,
    isolated_rules: BTreeMap<Topic, BTreeSet<Rule>>,
    shared_groups: BTreeMap<Topic, BTreeSet<SharedRuleGroup>>,
}

impl PolicyIndex {
    /// Build a lenient index: unconfigured topics fall back to prohibited.
    pub fn new(entries: Vec<PolicyEntry>) -> Result<Self> {
        Self::build(entries, ValidationMode::Lenient, &[])
    }

    /// Build an index that must classify every topic in `known_topics`.
    pub fn strict(entries: Vec<PolicyEntry>, known_topics: &[Topic]) -> Result<Self> {
        Self::build(entries, ValidationMode::Strict, known_topics)
    }

    /// Build an index, checking `known_topics` according to `mode`.
    pub fn build(entries: Vec<PolicyEntry>, mode: ValidationMode, known_topics: &[Topic]) -> Result<Self> {
        let mut prohibited = BTreeSet::new();
        let mut unlimited = BTreeSet::new();
        let mut isolated_rules: BTreeMap<Topic, BTreeSet<Rule>> = BTreeMap::new();
        let mut shared_groups: BTreeMap<Topic, BTreeSet<SharedRuleGroup>> = BTreeMap::new();

        for entry in &entries {
            entry.validate()?;

            match entry.entry_type {
                EntryType::Prohibited => {
                    prohibited.extend(entry.topics.iter().cloned());
                }
                EntryType::Unlimited => {
                    unlimited.extend(entry.topics.iter().cloned());
                }
                EntryType::Regular => {
                    let rules = entry.required_rules()?;
                    for topic in &entry.topics {
                        isolated_rules
                            .entry(topic.clone())
                            .or_default()
                            .extend(rules.iter().copied());
                    }
                }
                EntryType::Shared => {
                    let group = SharedRuleGroup::new(
                        entry.topics.iter().cloned().collect(),
                        entry.required_rules()?.iter().copied().collect(),
                    );
                    for topic in &group.topics {
                        shared_groups
                            .entry(topic.clone())
                            .or_default()
                            .insert(group.clone());
                    }
                }
            }
        }

        let index = Self {
            entries,
            prohibited,
            unlimited,
            isolated_rules,
            shared_groups,
        };

        let missing = index.unclassified(known_topics);
        if !missing.is_empty() {
            match mode {
                ValidationMode::Strict => return Err(SendLimitError::UnclassifiedTopics(missing)),
                // The provider warns once per topic when it first falls back.
                ValidationMode::Lenient => {
                    debug!(topics = ?missing, "Known topics left unclassified");
                }
            }
        }

        debug!(
            entries = index.entries.len(),
            prohibited = index.prohibited.len(),
            unlimited = index.unlimited.len(),
            regular = index.regular_topics().len(),
            "Built rate limit policy index"
        );

        Ok(index)
    }

    /// Resolve the treatment of `topic`.
    pub fn classify(&self, topic: &Topic) -> Classification {
        if self.prohibited.contains(topic) {
            return Classification::Prohibited;
        }
        if self.unlimited.contains(topic) {
            return Classification::Unlimited;
        }

        let isolated_rules = self.isolated_rules.get(topic);
        let shared_groups = self.shared_groups.get(topic);
        if isolated_rules.is_none() && shared_groups.is_none() {
            return Classification::Unconfigured;
        }

        Classification::Regular {
            isolated_rules: isolated_rules.cloned().unwrap_or_default(),
            shared_groups: shared_groups.cloned().unwrap_or_default(),
        }
    }

    /// Whether any entry names `topic`.
    pub fn is_configured(&self, topic: &Topic) -> bool {
        self.prohibited.contains(topic)
            || self.unlimited.contains(topic)
            || self.isolated_rules.contains_key(topic)
            || self.shared_groups.contains_key(topic)
    }

    /// Topics from `universe` that no entry names, sorted and deduplicated.
    pub fn unclassified(&self, universe: &[Topic]) -> Vec<Topic> {
        universe
            .iter()
            .filter(|topic| !self.is_configured(topic))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every topic named by at least one entry.
    pub fn topics(&self) -> BTreeSet<Topic> {
        self.prohibited
            .iter()
            .chain(&self.unlimited)
            .chain(self.isolated_rules.keys())
            .chain(self.shared_groups.keys())
            .cloned()
            .collect()
    }

    fn regular_topics(&self) -> BTreeSet<&Topic> {
        self.isolated_rules
            .keys()
            .chain(self.shared_groups.keys())
            .filter(|topic| !self.prohibited.contains(*topic) && !self.unlimited.contains(*topic))
            .collect()
    }

    /// The entries this index was built from, in their original order.
    pub fn source_entries(&self) -> &[PolicyEntry] {
        &self.entries
    }
}

/// Two indexes are equal when they classify every topic the same way,
/// regardless of how the entries were ordered or split.
impl PartialEq for PolicyIndex {
    fn eq(&self, other: &Self) -> bool {
        self.prohibited == other.prohibited
            && self.unlimited == other.unlimited
            && self.isolated_rules == other.isolated_rules
            && self.shared_groups == other.shared_groups
    }
}

impl Eq for PolicyIndex {}
