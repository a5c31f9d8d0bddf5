//! Programmatic policy construction.
//!
//! ```
//! use sendlimit::ratelimit::{PolicyBuilder, Rule, TimeWindow};
//!
//! let index = PolicyBuilder::new()
//!     .limit(["news"], [Rule::every(1, TimeWindow::days(2)), Rule::every(3, TimeWindow::days(7))])
//!     .shared_limit(["news", "marketing", "status"], [Rule::every(1, TimeWindow::hours(3))])
//!     .unlimited(["security"])
//!     .build()
//!     .unwrap();
//! ```

use super::policy::{PolicyIndex, ValidationMode};
use super::rules::{PolicyConfig, PolicyEntry, Rule, Topic};
use crate::error::Result;

/// Collects policy entries in order and folds them into a [`PolicyIndex`].
///
/// The builder produces the same entries a policy file would, so both
/// sources resolve identically.
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    entries: Vec<PolicyEntry>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `rules` to each topic independently.
    ///
    /// For rules pooled across topics, see [`PolicyBuilder::shared_limit`].
    pub fn limit<T, R>(mut self, topics: T, rules: R) -> Self
    where
        T: IntoIterator,
        T::Item: Into<Topic>,
        R: IntoIterator<Item = Rule>,
    {
        self.entries.push(PolicyEntry::regular(
            collect_topics(topics),
            rules.into_iter().collect(),
        ));
        self
    }

    /// Apply `rules` to the combined sends of all `topics`.
    ///
    /// With topics A, B and C sharing `1 every 1 hour`, a send of A at 00:00
    /// blocks A, B and C until 01:00.
    pub fn shared_limit<T, R>(mut self, topics: T, rules: R) -> Self
    where
        T: IntoIterator,
        T::Item: Into<Topic>,
        R: IntoIterator<Item = Rule>,
    {
        self.entries.push(PolicyEntry::shared(
            collect_topics(topics),
            rules.into_iter().collect(),
        ));
        self
    }

    /// These topics are never rate limited.
    pub fn unlimited<T>(mut self, topics: T) -> Self
    where
        T: IntoIterator,
        T::Item: Into<Topic>,
    {
        self.entries.push(PolicyEntry::unlimited(collect_topics(topics)));
        self
    }

    /// These topics are always blocked.
    pub fn prohibited<T>(mut self, topics: T) -> Self
    where
        T: IntoIterator,
        T::Item: Into<Topic>,
    {
        self.entries.push(PolicyEntry::prohibited(collect_topics(topics)));
        self
    }

    pub fn entries(&self) -> &[PolicyEntry] {
        &self.entries
    }

    pub fn into_config(self) -> PolicyConfig {
        PolicyConfig::new(self.entries)
    }

    /// Build a lenient index.
    pub fn build(self) -> Result<PolicyIndex> {
        PolicyIndex::new(self.entries)
    }

    /// Build an index that must classify every topic in `known_topics`.
    pub fn build_strict(self, known_topics: &[Topic]) -> Result<PolicyIndex> {
        PolicyIndex::build(self.entries, ValidationMode::Strict, known_topics)
    }
}

fn collect_topics<T>(topics: T) -> Vec<Topic>
where
    T: IntoIterator,
    T::Item: Into<Topic>,
{
    topics.into_iter().map(Into::into).collect()
}
