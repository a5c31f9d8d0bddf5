//! Rate limiting policy and decision logic.

mod builder;
mod counter;
mod limiter;
mod policy;
mod provider;
mod rules;

pub use builder::PolicyBuilder;
pub use counter::{window_start, WindowCounts};
pub use limiter::{
    BlockReason, Decision, LimiterKind, ProhibitedRateLimiter, RateLimiter, RegularRateLimiter,
    UnlimitedRateLimiter,
};
pub use policy::{Classification, PolicyIndex, ValidationMode};
pub use provider::RateLimiterProvider;
pub use rules::{EntryType, PolicyConfig, PolicyEntry, Rule, SharedRuleGroup, TimeUnit, TimeWindow, Topic};
