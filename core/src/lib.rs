//! Fee simulation core.
//!
//! Computed fees are derived per row from formula rules, materialized in a
//! versioned cache, and fed into scenario engines that apply ordered
//! policies cumulatively and report a waterfall of totals, dataset-wide or
//! per producer.

pub mod cache;
pub mod calculator;
pub mod condition;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod fields;
pub mod formula;
pub mod model;
pub mod resolver;
pub mod scenario;
pub mod store;
pub mod totals;
pub mod types;
