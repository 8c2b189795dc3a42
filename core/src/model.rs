//! Records the core reads from the store and the results it produces.

use crate::{
    condition::Condition,
    fields::{Attribute, RAW_FEE_COUNT},
    types::{Pid, PolicyId, RowId, RuleId},
};
use serde::{Deserialize, Serialize};

/// One immutable fact row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    pub row_id:        RowId,
    pub pid:           Pid,
    pub producer_name: String,
    #[serde(rename = "type")]
    pub row_type:      String,
    pub subtype:       String,
    pub category:      String,
    pub region:        String,
    pub quantity:      f64,
    pub fees:          [f64; RAW_FEE_COUNT],
}

impl DataRow {
    pub fn empty(row_id: RowId, pid: &str) -> Self {
        Self {
            row_id,
            pid:           pid.to_string(),
            producer_name: String::new(),
            row_type:      String::new(),
            subtype:       String::new(),
            category:      String::new(),
            region:        String::new(),
            quantity:      0.0,
            fees:          [0.0; RAW_FEE_COUNT],
        }
    }

    pub fn attribute(&self, attr: Attribute) -> &str {
        match attr {
            Attribute::Pid          => &self.pid,
            Attribute::ProducerName => &self.producer_name,
            Attribute::Type         => &self.row_type,
            Attribute::Subtype      => &self.subtype,
            Attribute::Category     => &self.category,
            Attribute::Region       => &self.region,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedFeeRule {
    pub id:        RuleId,
    pub name:      String,
    pub priority:  i64,
    pub active:    bool,
    pub formula:   String,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub group_id:  Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    ReducePercentage,
    SetValue,
    /// Stored type text this core does not know. Applied as a no-op.
    #[serde(other)]
    Unsupported,
}

impl PolicyType {
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "reduce_percentage" => PolicyType::ReducePercentage,
            "set_value"         => PolicyType::SetValue,
            _                   => PolicyType::Unsupported,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyType::ReducePercentage => "reduce_percentage",
            PolicyType::SetValue         => "set_value",
            PolicyType::Unsupported      => "unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id:              PolicyId,
    pub name:            String,
    pub policy_type:     PolicyType,
    /// Target raw fee.
    pub field:           String,
    #[serde(default)]
    pub condition:       Condition,
    #[serde(default)]
    pub affects_direct:  Vec<String>,
    #[serde(default)]
    pub affects_inverse: Vec<String>,
    #[serde(default)]
    pub default_value:   f64,
    #[serde(default)]
    pub group_id:        Option<i64>,
}

/// Split a stored comma-separated field list.
pub fn parse_field_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// A policy as it runs inside one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPolicyBinding {
    pub policy: Policy,
    pub value:  f64,
    pub order:  i64,
}

impl ScenarioPolicyBinding {
    pub fn new(policy: Policy, value: f64, order: i64) -> Self {
        Self { policy, value, order }
    }
}

/// Equality-set filter applied to every query of a calculation.
/// An empty list leaves that attribute unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFilter {
    #[serde(default)]
    pub pids:       Vec<String>,
    #[serde(default)]
    pub types:      Vec<String>,
    #[serde(default)]
    pub subtypes:   Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub regions:    Vec<String>,
}

impl ScenarioFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Non-empty constraints in attribute order.
    pub fn constraints(&self) -> Vec<(Attribute, &[String])> {
        [
            (Attribute::Pid, self.pids.as_slice()),
            (Attribute::Type, self.types.as_slice()),
            (Attribute::Subtype, self.subtypes.as_slice()),
            (Attribute::Category, self.categories.as_slice()),
            (Attribute::Region, self.regions.as_slice()),
        ]
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .collect()
    }

    pub fn matches(&self, row: &DataRow) -> bool {
        self.constraints()
            .iter()
            .all(|(attr, values)| values.iter().any(|v| v == row.attribute(*attr)))
    }
}
