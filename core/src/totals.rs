//! Running totals and the waterfall rows built from them.

use crate::{
    condition::Condition,
    fields::{raw_fee_index, FieldRef, RAW_FEE_COUNT},
    model::{DataRow, PolicyType, ScenarioPolicyBinding},
    types::{PolicyId, RuleId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTotals {
    pub row_count: i64,
    /// Indexed like `fields::RAW_FEES`.
    pub raw:       [f64; RAW_FEE_COUNT],
    pub computed:  BTreeMap<RuleId, f64>,
}

impl FeeTotals {
    pub fn zero(rule_ids: &[RuleId]) -> Self {
        Self {
            row_count: 0,
            raw:       [0.0; RAW_FEE_COUNT],
            computed:  rule_ids.iter().map(|id| (*id, 0.0)).collect(),
        }
    }

    pub fn add_row(&mut self, row: &DataRow) {
        self.row_count += 1;
        for (total, fee) in self.raw.iter_mut().zip(row.fees.iter()) {
            *total += fee;
        }
    }

    pub fn raw_total(&self, name: &str) -> Option<f64> {
        raw_fee_index(name).map(|i| self.raw[i])
    }

    pub fn computed_total(&self, id: RuleId) -> f64 {
        self.computed.get(&id).copied().unwrap_or(0.0)
    }

    /// Total of a raw fee or a `computed_fee<ID>` by name.
    pub fn field_total(&self, name: &str) -> Option<f64> {
        match FieldRef::parse(name)? {
            FieldRef::Raw(i) => Some(self.raw[i]),
            FieldRef::Computed(id) => self.computed.get(&id).copied(),
            FieldRef::Quantity | FieldRef::Pid => None,
        }
    }
}

/// What produced a non-baseline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedPolicy {
    pub policy_id:       PolicyId,
    pub name:            String,
    pub policy_type:     PolicyType,
    pub field:           String,
    pub value:           f64,
    pub condition:       Condition,
    pub affects_direct:  Vec<String>,
    pub affects_inverse: Vec<String>,
    pub group_id:        Option<i64>,
    /// Set when the step was a no-op, e.g. an unknown target field.
    pub skipped:         Option<String>,
}

impl AppliedPolicy {
    pub fn from_binding(binding: &ScenarioPolicyBinding, skipped: Option<String>) -> Self {
        let p = &binding.policy;
        Self {
            policy_id:       p.id,
            name:            p.name.clone(),
            policy_type:     p.policy_type,
            field:           p.field.clone(),
            value:           binding.value,
            condition:       p.condition.clone(),
            affects_direct:  p.affects_direct.clone(),
            affects_inverse: p.affects_inverse.clone(),
            group_id:        p.group_id,
            skipped,
        }
    }
}

/// One row of the waterfall. `results[0]` is always the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step:       usize,
    pub policy:     Option<AppliedPolicy>,
    /// Target-field delta against the previous step; 0 for the baseline.
    pub net_effect: f64,
    pub totals:     FeeTotals,
}

impl StepResult {
    pub fn baseline(totals: FeeTotals) -> Self {
        Self { step: 0, policy: None, net_effect: 0.0, totals }
    }

    pub fn is_baseline(&self) -> bool {
        self.policy.is_none()
    }
}
