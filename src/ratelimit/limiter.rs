//! Rate limiter implementations.
//!
//! Every topic resolves to one [`RateLimiter`]: prohibited topics always
//! block, unlimited topics never block, and regular topics count the user's
//! recent sends against their rules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::counter::{window_start, WindowCounts};
use super::rules::{Rule, SharedRuleGroup, TimeWindow, Topic};
use crate::clock::Clock;
use crate::delivery::{OutboundStore, UserId};
use crate::error::Result;

/// Why a send was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The topic is configured as prohibited
    Prohibited,
    /// The topic has no configuration and falls back to prohibited
    Unconfigured,
    /// A rule on the topic's own sends is exhausted
    IsolatedRule(Rule),
    /// A rule pooled across a shared group is exhausted
    SharedRule(Rule),
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Prohibited => f.write_str("topic is prohibited"),
            BlockReason::Unconfigured => f.write_str("topic has no rate limit configuration"),
            BlockReason::IsolatedRule(rule) => write!(f, "limit of {rule} reached"),
            BlockReason::SharedRule(rule) => write!(f, "shared limit of {rule} reached"),
        }
    }
}

/// Outcome of evaluating a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block(BlockReason),
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Decision::Block(_))
    }
}

/// The kind of limiter a topic resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterKind {
    Prohibited,
    Unlimited,
    Regular,
}

/// Decides whether a send must be suppressed.
#[async_trait]
pub trait RateLimiter: Send + Sync + fmt::Debug {
    /// Evaluate a send of `topic` to `user_id` at the current time.
    async fn evaluate(&self, user_id: UserId, topic: &Topic) -> Result<Decision>;

    fn kind(&self) -> LimiterKind;
}

/// Blocks every send.
#[derive(Debug, Clone, Default)]
pub struct ProhibitedRateLimiter {
    unconfigured: bool,
}

impl ProhibitedRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A prohibited limiter standing in for a topic with no configuration.
    pub fn unconfigured() -> Self {
        Self { unconfigured: true }
    }
}

#[async_trait]
impl RateLimiter for ProhibitedRateLimiter {
    async fn evaluate(&self, user_id: UserId, topic: &Topic) -> Result<Decision> {
        let reason = if self.unconfigured {
            info!(topic = %topic, user_id, "Blocking send - topic has no rate limit configuration");
            BlockReason::Unconfigured
        } else {
            info!(topic = %topic, user_id, "Blocking send - topic configured as prohibited");
            BlockReason::Prohibited
        };
        Ok(Decision::Block(reason))
    }

    fn kind(&self) -> LimiterKind {
        LimiterKind::Prohibited
    }
}

/// Allows every send.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedRateLimiter;

#[async_trait]
impl RateLimiter for UnlimitedRateLimiter {
    async fn evaluate(&self, user_id: UserId, topic: &Topic) -> Result<Decision> {
        info!(topic = %topic, user_id, "Skipping rate limit - topic configured as unlimited");
        Ok(Decision::Allow)
    }

    fn kind(&self) -> LimiterKind {
        LimiterKind::Unlimited
    }
}

/// Sliding-window limiter for a regular topic.
///
/// Counts the user's recent sends of this topic, and of every topic sharing
/// a group with it, then checks isolated rules before shared rules. A count
/// equal to a rule's limit blocks the next send.
pub struct RegularRateLimiter {
    topic: Topic,
    isolated_rules: BTreeSet<Rule>,
    shared_groups: BTreeSet<SharedRuleGroup>,
    /// Every distinct rule window, shortest first
    windows: BTreeSet<TimeWindow>,
    /// This topic plus every topic in its shared groups
    counted_topics: BTreeSet<Topic>,
    store: Arc<dyn OutboundStore>,
    clock: Arc<dyn Clock>,
}

impl RegularRateLimiter {
    pub fn new(
        topic: Topic,
        isolated_rules: BTreeSet<Rule>,
        shared_groups: BTreeSet<SharedRuleGroup>,
        store: Arc<dyn OutboundStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let windows = isolated_rules
            .iter()
            .chain(shared_groups.iter().flat_map(|group| &group.rules))
            .map(|rule| rule.window)
            .collect();

        let mut counted_topics: BTreeSet<Topic> = shared_groups
            .iter()
            .flat_map(|group| group.topics.iter().cloned())
            .collect();
        counted_topics.insert(topic.clone());

        Self {
            topic,
            isolated_rules,
            shared_groups,
            windows,
            counted_topics,
            store,
            clock,
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn isolated_rules(&self) -> &BTreeSet<Rule> {
        &self.isolated_rules
    }

    pub fn shared_groups(&self) -> &BTreeSet<SharedRuleGroup> {
        &self.shared_groups
    }

    /// The longest window among all rules, if there are any rules.
    pub fn largest_window(&self) -> Option<TimeWindow> {
        self.windows.last().copied()
    }

    /// Evaluate a send to `user_id` as of `now`.
    pub async fn evaluate_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Decision> {
        let Some(largest_window) = self.largest_window() else {
            trace!(topic = %self.topic, "No rules configured, allowing send");
            return Ok(Decision::Allow);
        };

        let after = window_start(now, largest_window);
        let records = self
            .store
            .fetch_since(user_id, &self.counted_topics, after)
            .await?;

        trace!(
            topic = %self.topic,
            user_id,
            records = records.len(),
            since = %after,
            "Fetched recent sends"
        );

        let counts = WindowCounts::tally(&records, &self.windows, now);
        let decision = self.decide(&counts);

        if let Decision::Block(reason) = decision {
            info!(topic = %self.topic, user_id, reason = %reason, "Rate limited send");
        }

        Ok(decision)
    }

    fn decide(&self, counts: &WindowCounts) -> Decision {
        for rule in &self.isolated_rules {
            let sent = counts.count(rule.window, &self.topic);
            if sent >= rule.limit {
                debug!(topic = %self.topic, rule = %rule, sent, "Isolated rule exhausted");
                return Decision::Block(BlockReason::IsolatedRule(*rule));
            }
        }

        for group in &self.shared_groups {
            for rule in &group.rules {
                let sent = counts.total(rule.window, &group.topics);
                if sent >= rule.limit {
                    debug!(
                        topic = %self.topic,
                        group = ?group.topics,
                        rule = %rule,
                        sent,
                        "Shared rule exhausted"
                    );
                    return Decision::Block(BlockReason::SharedRule(*rule));
                }
            }
        }

        Decision::Allow
    }
}

impl fmt::Debug for RegularRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegularRateLimiter")
            .field("topic", &self.topic)
            .field("isolated_rules", &self.isolated_rules)
            .field("shared_groups", &self.shared_groups)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RateLimiter for RegularRateLimiter {
    async fn evaluate(&self, user_id: UserId, _topic: &Topic) -> Result<Decision> {
        self.evaluate_at(user_id, self.clock.now()).await
    }

    fn kind(&self) -> LimiterKind {
        LimiterKind::Regular
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::delivery::{InMemoryOutboundStore, OutboundRecord};
    use crate::error::SendLimitError;
    use chrono::{Duration, TimeZone};
    use tracing_test::traced_test;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn rules(list: &[Rule]) -> BTreeSet<Rule> {
        list.iter().copied().collect()
    }

    fn group(topics: &[&str], list: &[Rule]) -> SharedRuleGroup {
        SharedRuleGroup::new(topics.iter().map(|t| Topic::new(t)).collect(), rules(list))
    }

    fn limiter(
        topic: &str,
        isolated: &[Rule],
        shared: Vec<SharedRuleGroup>,
        store: Arc<InMemoryOutboundStore>,
    ) -> RegularRateLimiter {
        RegularRateLimiter::new(
            Topic::new(topic),
            rules(isolated),
            shared.into_iter().collect(),
            store,
            Arc::new(MockClock::new(t0())),
        )
    }

    #[derive(Debug)]
    struct UnavailableStore;

    #[async_trait]
    impl OutboundStore for UnavailableStore {
        async fn fetch_since(
            &self,
            _user_id: UserId,
            _topics: &BTreeSet<Topic>,
            _after: DateTime<Utc>,
        ) -> Result<Vec<OutboundRecord>> {
            Err(SendLimitError::storage("database unavailable"))
        }

        async fn record(&self, _record: OutboundRecord) -> Result<()> {
            Err(SendLimitError::storage("database unavailable"))
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_prohibited_block_logs_its_cause() {
        ProhibitedRateLimiter::new().evaluate(1, &Topic::new("spam")).await.unwrap();
        assert!(logs_contain("topic configured as prohibited"));
        assert!(!logs_contain("has no rate limit configuration"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fallback_block_logs_missing_configuration() {
        ProhibitedRateLimiter::unconfigured()
            .evaluate(1, &Topic::new("topic"))
            .await
            .unwrap();
        assert!(logs_contain("topic has no rate limit configuration"));
        assert!(!logs_contain("configured as prohibited"));
    }

    #[tokio::test]
    async fn test_prohibited_always_blocks() {
        let limiter = ProhibitedRateLimiter::new();
        let decision = limiter.evaluate(1, &Topic::new("spam")).await.unwrap();

        assert_eq!(decision, Decision::Block(BlockReason::Prohibited));
        assert_eq!(limiter.kind(), LimiterKind::Prohibited);

        let fallback = ProhibitedRateLimiter::unconfigured();
        let decision = fallback.evaluate(1, &Topic::new("spam")).await.unwrap();
        assert_eq!(decision, Decision::Block(BlockReason::Unconfigured));
    }

    #[tokio::test]
    async fn test_unlimited_never_blocks() {
        let limiter = UnlimitedRateLimiter;
        for _ in 0..5 {
            let decision = limiter.evaluate(1, &Topic::new("security")).await.unwrap();
            assert_eq!(decision, Decision::Allow);
        }
        assert_eq!(limiter.kind(), LimiterKind::Unlimited);
    }

    #[tokio::test]
    async fn test_limit_reached_blocks_next_send() {
        let store = Arc::new(InMemoryOutboundStore::with_records(vec![
            OutboundRecord::new(1, Topic::new("news"), t0()),
            OutboundRecord::new(1, Topic::new("news"), t0() + Duration::minutes(1)),
        ]));
        let limiter = limiter("news", &[Rule::every(3, TimeWindow::hours(1))], vec![], store.clone());

        let now = t0() + Duration::minutes(2);
        assert_eq!(limiter.evaluate_at(1, now).await.unwrap(), Decision::Allow);

        store
            .record(OutboundRecord::new(1, Topic::new("news"), now))
            .await
            .unwrap();
        assert_eq!(
            limiter.evaluate_at(1, now).await.unwrap(),
            Decision::Block(BlockReason::IsolatedRule(Rule::every(3, TimeWindow::hours(1))))
        );
    }

    #[tokio::test]
    async fn test_window_lower_bound_is_closed() {
        let store = Arc::new(InMemoryOutboundStore::with_records(vec![OutboundRecord::new(
            1,
            Topic::new("news"),
            t0(),
        )]));
        let limiter = limiter("news", &[Rule::every(1, TimeWindow::hours(1))], vec![], store);

        let at_boundary = limiter.evaluate_at(1, t0() + Duration::hours(1)).await.unwrap();
        assert!(at_boundary.is_blocked());

        let past_boundary = limiter
            .evaluate_at(1, t0() + Duration::hours(1) + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(past_boundary, Decision::Allow);
    }

    #[tokio::test]
    async fn test_other_topics_ignored_without_shared_groups() {
        let store = Arc::new(InMemoryOutboundStore::with_records(vec![
            OutboundRecord::new(1, Topic::new("marketing"), t0()),
            OutboundRecord::new(2, Topic::new("news"), t0()),
        ]));
        let limiter = limiter("news", &[Rule::every(1, TimeWindow::days(1))], vec![], store);

        assert_eq!(limiter.evaluate_at(1, t0()).await.unwrap(), Decision::Allow);
    }

    #[tokio::test]
    async fn test_shared_rule_pools_group_topics() {
        let store = Arc::new(InMemoryOutboundStore::with_records(vec![
            OutboundRecord::new(1, Topic::new("marketing"), t0()),
            OutboundRecord::new(1, Topic::new("status"), t0()),
        ]));
        let shared_rule = Rule::every(2, TimeWindow::hours(3));
        let limiter = limiter(
            "news",
            &[Rule::every(1, TimeWindow::hours(3))],
            vec![group(&["news", "marketing", "status"], &[shared_rule])],
            store,
        );

        assert_eq!(
            limiter.evaluate_at(1, t0() + Duration::hours(1)).await.unwrap(),
            Decision::Block(BlockReason::SharedRule(shared_rule))
        );
        assert_eq!(
            limiter.evaluate_at(1, t0() + Duration::hours(4)).await.unwrap(),
            Decision::Allow
        );
    }

    #[tokio::test]
    async fn test_isolated_rules_reported_before_shared() {
        let store = Arc::new(InMemoryOutboundStore::with_records(vec![OutboundRecord::new(
            1,
            Topic::new("news"),
            t0(),
        )]));
        let isolated_rule = Rule::every(1, TimeWindow::days(1));
        let limiter = limiter(
            "news",
            &[isolated_rule],
            vec![group(&["news", "marketing"], &[Rule::every(1, TimeWindow::hours(1))])],
            store,
        );

        assert_eq!(
            limiter.evaluate_at(1, t0()).await.unwrap(),
            Decision::Block(BlockReason::IsolatedRule(isolated_rule))
        );
    }

    #[tokio::test]
    async fn test_largest_window_and_counted_topics() {
        let store = Arc::new(InMemoryOutboundStore::new());
        let limiter = limiter(
            "news",
            &[Rule::every(1, TimeWindow::days(2))],
            vec![group(&["news", "status"], &[Rule::every(3, TimeWindow::days(7))])],
            store,
        );

        assert_eq!(limiter.largest_window(), Some(TimeWindow::days(7)));
        assert_eq!(limiter.counted_topics.len(), 2);
        assert_eq!(limiter.windows.len(), 2);
    }

    #[tokio::test]
    async fn test_no_rules_allows_without_reading_store() {
        let limiter = RegularRateLimiter::new(
            Topic::new("news"),
            BTreeSet::new(),
            BTreeSet::new(),
            Arc::new(UnavailableStore),
            Arc::new(MockClock::new(t0())),
        );

        assert_eq!(limiter.evaluate(1, &Topic::new("news")).await.unwrap(), Decision::Allow);
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let limiter = RegularRateLimiter::new(
            Topic::new("news"),
            rules(&[Rule::every(1, TimeWindow::hours(1))]),
            BTreeSet::new(),
            Arc::new(UnavailableStore),
            Arc::new(MockClock::new(t0())),
        );

        let result = limiter.evaluate(1, &Topic::new("news")).await;
        assert!(matches!(result, Err(SendLimitError::Storage(_))));
    }

    #[tokio::test]
    async fn test_evaluate_reads_clock() {
        let store = Arc::new(InMemoryOutboundStore::with_records(vec![OutboundRecord::new(
            1,
            Topic::new("news"),
            t0(),
        )]));
        let clock = MockClock::new(t0() + Duration::minutes(59));
        let limiter = RegularRateLimiter::new(
            Topic::new("news"),
            rules(&[Rule::every(1, TimeWindow::hours(1))]),
            BTreeSet::new(),
            store,
            Arc::new(clock.clone()),
        );

        assert!(limiter.evaluate(1, &Topic::new("news")).await.unwrap().is_blocked());

        clock.advance(Duration::minutes(2));
        assert_eq!(limiter.evaluate(1, &Topic::new("news")).await.unwrap(), Decision::Allow);
    }
}
