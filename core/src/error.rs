use crate::types::{Pid, RuleId, ScenarioId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeeError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Circular dependency detected at computed fee rule {rule_id}")]
    CircularDependency { rule_id: RuleId },

    #[error("Scenario {scenario_id} not found")]
    UnknownScenario { scenario_id: ScenarioId },

    #[error("Producer '{pid}' has no rows under the current filter")]
    UnknownProducer { pid: Pid },

    #[error("'{field}' is not a raw fee field")]
    UnknownField { field: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type FeeResult<T> = Result<T, FeeError>;

/// Per-row formula failures. These never leave the row evaluator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("invalid expression `{expr}`: {reason}")]
    InvalidExpression { expr: String, reason: String },

    #[error("unresolved reference `{name}`")]
    UnresolvedReference { name: String },

    #[error("expression produced a non-finite value")]
    NonFinite,
}
