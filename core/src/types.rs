//! Shared primitive types used across the fee core.

/// Identity of one fact row in the backing store.
pub type RowId = i64;

/// Identity of a computed fee rule. Also names its cache column.
pub type RuleId = i64;

pub type PolicyId = i64;

pub type ScenarioId = i64;

/// Producer identity, the grouping key of the per-group breakdown.
pub type Pid = String;
