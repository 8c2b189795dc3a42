//! Scenario engines.
//!
//! All three engines share the planning in [`plan`] and the cumulative
//! step in [`step`]; they differ only in where step inputs come from:
//!   - `aggregate`: one SUM query per step over the filtered dataset
//!   - `producer`:  grouped SUM queries fetched once per step up front
//!   - `reference`: in-memory rows, used as the test oracle

pub mod aggregate;
pub mod plan;
pub mod producer;
pub mod reference;
pub mod step;

pub use aggregate::AggregateEngine;
pub use producer::{
    summary_histogram, BreakdownMode, GroupResults, GroupSummary, HistogramBin, ProducerBreakdown,
    ProducerBreakdownEngine, ProducerGroup,
};
pub use reference::RowLevelEngine;
