//! Topic to rate limiter resolution.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use super::limiter::{ProhibitedRateLimiter, RateLimiter, RegularRateLimiter, UnlimitedRateLimiter};
use super::policy::{Classification, PolicyIndex};
use super::rules::Topic;
use crate::clock::Clock;
use crate::delivery::OutboundStore;

/// Hands out the rate limiter for each topic.
///
/// Limiters are built lazily on first use and cached for the lifetime of the
/// provider. The provider is tied to one policy; a policy change needs a new
/// provider.
pub struct RateLimiterProvider {
    index: Arc<PolicyIndex>,
    store: Arc<dyn OutboundStore>,
    clock: Arc<dyn Clock>,
    /// Limiters indexed by normalized topic
    limiters: DashMap<Topic, Arc<dyn RateLimiter>>,
    /// Topics that fell back to prohibited for lack of configuration
    fallback_topics: DashSet<Topic>,
}

impl RateLimiterProvider {
    pub fn new(index: PolicyIndex, store: Arc<dyn OutboundStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            index: Arc::new(index),
            store,
            clock,
            limiters: DashMap::new(),
            fallback_topics: DashSet::new(),
        }
    }

    /// Get the limiter for `topic`, creating and caching it on first use.
    ///
    /// Topic names are case-insensitive, so `news` and `NEWS` share a limiter.
    pub fn for_topic(&self, topic: impl Into<Topic>) -> Arc<dyn RateLimiter> {
        let topic = topic.into();

        if let Some(limiter) = self.limiters.get(&topic) {
            return Arc::clone(limiter.value());
        }

        let limiter = self
            .limiters
            .entry(topic.clone())
            .or_insert_with(|| self.build_limiter(&topic));
        Arc::clone(limiter.value())
    }

    fn build_limiter(&self, topic: &Topic) -> Arc<dyn RateLimiter> {
        match self.index.classify(topic) {
            Classification::Prohibited => {
                debug!(topic = %topic, "Creating prohibited rate limiter");
                Arc::new(ProhibitedRateLimiter::new())
            }
            Classification::Unlimited => {
                debug!(topic = %topic, "Creating unlimited rate limiter");
                Arc::new(UnlimitedRateLimiter)
            }
            Classification::Regular {
                isolated_rules,
                shared_groups,
            } => {
                debug!(
                    topic = %topic,
                    isolated_rules = isolated_rules.len(),
                    shared_groups = shared_groups.len(),
                    "Creating regular rate limiter"
                );
                Arc::new(RegularRateLimiter::new(
                    topic.clone(),
                    isolated_rules,
                    shared_groups,
                    Arc::clone(&self.store),
                    Arc::clone(&self.clock),
                ))
            }
            Classification::Unconfigured => {
                warn!(topic = %topic, "No rate limit configuration for topic, treating it as prohibited");
                self.fallback_topics.insert(topic.clone());
                Arc::new(ProhibitedRateLimiter::unconfigured())
            }
        }
    }

    /// Topics that have fallen back to prohibited so far.
    pub fn fallback_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.fallback_topics.iter().map(|topic| topic.key().clone()).collect();
        topics.sort();
        topics
    }

    pub fn policy(&self) -> &PolicyIndex {
        &self.index
    }

    /// Number of limiters built so far.
    pub fn cached_count(&self) -> usize {
        self.limiters.len()
    }
}

impl std::fmt::Debug for RateLimiterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterProvider")
            .field("index", &self.index)
            .field("cached", &self.limiters.len())
            .finish_non_exhaustive()
    }
}
