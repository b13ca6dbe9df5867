//! Core functionality for the keystroke engine.
//!
//! This module contains:
//! - The durable aggregate and its hour/day bucketing
//! - The aggregator that serializes all mutations
//! - Range analytics for presentation
//! - Key-name lookup

pub mod aggregator;
pub mod analytics;
pub mod keynames;
pub mod stats;

// Re-export commonly used types
pub use aggregator::{create_shared_aggregator, SharedAggregator, StatAggregator};
pub use analytics::{DateRange, RangeSummary};
pub use keynames::{display_name, key_name};
pub use stats::{day_bucket, hour_bucket, AggregateStats, DayBucket, HourBucket};
