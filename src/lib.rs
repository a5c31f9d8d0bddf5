//! Sendlimit - Topic-Scoped Rate Limiting for Outbound Notifications
//!
//! This crate decides whether an outbound notification must be suppressed
//! because of per-topic rate limit policy. Policies classify each topic as
//! prohibited, unlimited or regular; regular topics are checked against the
//! recipient's recent sends over sliding time windows, either per topic or
//! pooled across groups of topics.

pub mod clock;
pub mod config;
pub mod delivery;
pub mod error;
pub mod ratelimit;
