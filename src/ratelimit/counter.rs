//! Per-window send counts.
//!
//! Counts are built from a user's send history in a single pass: records come
//! newest first and windows are visited shortest first, so every window's
//! counts are the previous window's counts plus the records that only the
//! larger window reaches.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::rules::{TimeWindow, Topic};
use crate::delivery::OutboundRecord;

/// Send counts by topic, for every window a limiter evaluates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowCounts {
    buckets: BTreeMap<TimeWindow, HashMap<Topic, u32>>,
}

impl WindowCounts {
    /// Bucket `records` (ordered newest first) into each of `windows`.
    ///
    /// A record counts toward a window when it was sent at or after
    /// `now - window`.
    pub fn tally(records: &[OutboundRecord], windows: &BTreeSet<TimeWindow>, now: DateTime<Utc>) -> Self {
        debug_assert!(
            records.windows(2).all(|pair| pair[0].sent_at >= pair[1].sent_at),
            "outbound records must be ordered newest first"
        );

        let mut buckets = BTreeMap::new();
        let mut running: HashMap<Topic, u32> = HashMap::new();
        let mut remaining = records.iter().peekable();

        for window in windows {
            let cutoff = window_start(now, *window);

            while let Some(record) = remaining.next_if(|record| record.sent_at >= cutoff) {
                *running.entry(record.topic.clone()).or_insert(0) += 1;
            }

            buckets.insert(*window, running.clone());
        }

        Self { buckets }
    }

    /// Sends of `topic` within `window`.
    pub fn count(&self, window: TimeWindow, topic: &Topic) -> u32 {
        self.buckets
            .get(&window)
            .and_then(|counts| counts.get(topic))
            .copied()
            .unwrap_or(0)
    }

    /// Combined sends of all `topics` within `window`.
    pub fn total<'a, I>(&self, window: TimeWindow, topics: I) -> u32
    where
        I: IntoIterator<Item = &'a Topic>,
    {
        topics
            .into_iter()
            .map(|topic| self.count(window, topic))
            .fold(0u32, u32::saturating_add)
    }

    pub fn windows(&self) -> impl Iterator<Item = &TimeWindow> {
        self.buckets.keys()
    }
}

/// The earliest send time that still falls inside `window`.
pub fn window_start(now: DateTime<Utc>, window: TimeWindow) -> DateTime<Utc> {
    now.checked_sub_signed(window.as_chrono())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
