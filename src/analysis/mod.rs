//! Analysis modules.
//!
//! Aggregation of scanned-page counts into commit and repository totals.

pub mod aggregator;

pub use aggregator::*;
