//! Per-row evaluation of computed fee rules.

use crate::{
    error::FormulaError,
    fields::FieldRef,
    model::DataRow,
    resolver::{CompiledRule, CompiledRuleSet},
    types::RuleId,
};
use std::collections::{BTreeMap, HashMap};

/// Evaluates an ordered rule set against single rows.
///
/// Never fails: an inactive rule, a condition mismatch or any formula error
/// contributes 0 for that rule on that row.
pub struct RowEvaluator<'a> {
    rules: &'a CompiledRuleSet,
}

impl<'a> RowEvaluator<'a> {
    pub fn new(rules: &'a CompiledRuleSet) -> Self {
        Self { rules }
    }

    /// Values for every rule of the set, in evaluation order.
    pub fn row_values(&self, row: &DataRow) -> Vec<(RuleId, f64)> {
        let mut computed: HashMap<RuleId, f64> = HashMap::with_capacity(self.rules.rules().len());
        let mut out = Vec::with_capacity(self.rules.rules().len());
        for compiled in self.rules.rules() {
            let value = match evaluate_rule(compiled, row, &computed) {
                Ok(v) => v,
                Err(e) => {
                    log::trace!("Row {} rule {}: {e}; contributing 0", row.row_id, compiled.rule.id);
                    0.0
                }
            };
            computed.insert(compiled.rule.id, value);
            out.push((compiled.rule.id, value));
        }
        out
    }

    /// Add this row's values into `totals`, one entry per rule.
    pub fn evaluate_row(&self, row: &DataRow, totals: &mut BTreeMap<RuleId, f64>) {
        for (id, value) in self.row_values(row) {
            *totals.entry(id).or_insert(0.0) += value;
        }
    }
}

fn evaluate_rule(
    compiled: &CompiledRule,
    row: &DataRow,
    computed: &HashMap<RuleId, f64>,
) -> Result<f64, FormulaError> {
    let rule = &compiled.rule;
    if !rule.active || !rule.condition.matches(row) {
        return Ok(0.0);
    }
    let formula = compiled.formula.as_ref().ok_or_else(|| FormulaError::InvalidExpression {
        expr:   rule.formula.clone(),
        reason: "formula did not compile".into(),
    })?;
    formula.evaluate(|name| match FieldRef::parse(name)? {
        FieldRef::Raw(i) => Some(row.fees[i]),
        FieldRef::Quantity => Some(row.quantity),
        FieldRef::Pid => row.pid.trim().parse::<f64>().ok(),
        FieldRef::Computed(id) => Some(computed.get(&id).copied().unwrap_or(0.0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{condition::Condition, model::ComputedFeeRule};

    fn rule(id: RuleId, priority: i64, formula: &str, condition: Condition) -> ComputedFeeRule {
        ComputedFeeRule {
            id,
            name: format!("rule {id}"),
            priority,
            active: true,
            formula: formula.into(),
            condition,
            group_id: None,
        }
    }

    fn sample_row() -> DataRow {
        let mut row = DataRow::empty(1, "42");
        row.row_type = "X".into();
        row.quantity = 3.0;
        row.fees[0] = 100.0;
        row.fees[1] = 20.0;
        row
    }

    #[test]
    fn siblings_see_values_from_the_same_pass() {
        let set = CompiledRuleSet::compile(&[
            rule(2, 2, "computed_fee1 - fee2", Condition::always()),
            rule(1, 1, "fee1 * 0.1", Condition::always()),
        ])
        .unwrap();
        let values = RowEvaluator::new(&set).row_values(&sample_row());
        assert_eq!(values, vec![(1, 10.0), (2, -10.0)]);
    }

    #[test]
    fn negative_sibling_values_subtract_correctly() {
        let set = CompiledRuleSet::compile(&[
            rule(1, 1, "0 - fee1", Condition::always()),
            rule(2, 2, "fee2 - computed_fee1", Condition::always()),
        ])
        .unwrap();
        let values = RowEvaluator::new(&set).row_values(&sample_row());
        assert_eq!(values[1], (2, 120.0));
    }

    #[test]
    fn literals_quantity_and_pid_resolve() {
        let set = CompiledRuleSet::compile(&[rule(1, 1, "quantity * pid", Condition::always())]).unwrap();
        assert_eq!(RowEvaluator::new(&set).row_values(&sample_row()), vec![(1, 126.0)]);

        let mut row = sample_row();
        row.pid = "P-1".into();
        assert_eq!(RowEvaluator::new(&set).row_values(&row), vec![(1, 0.0)]);
    }

    #[test]
    fn mismatches_and_errors_contribute_zero() {
        let mut inactive = rule(3, 3, "fee1", Condition::always());
        inactive.active = false;
        let set = CompiledRuleSet::compile(&[
            rule(1, 1, "fee1", Condition::from_pairs(&[("type", "Y")])),
            rule(2, 2, "fee1 / (fee3)", Condition::always()),
            inactive,
            rule(4, 4, "fee1 * unknown_rate", Condition::always()),
            rule(5, 5, "fee1 +", Condition::always()),
        ])
        .unwrap();
        let values = RowEvaluator::new(&set).row_values(&sample_row());
        assert!(values.iter().all(|(_, v)| *v == 0.0), "{values:?}");
    }

    #[test]
    fn running_totals_accumulate_per_rule() {
        let set = CompiledRuleSet::compile(&[rule(1, 1, "fee1 * 0.1", Condition::always())]).unwrap();
        let eval = RowEvaluator::new(&set);
        let mut totals = BTreeMap::new();
        eval.evaluate_row(&sample_row(), &mut totals);
        eval.evaluate_row(&sample_row(), &mut totals);
        assert_eq!(totals.get(&1).copied(), Some(20.0));
    }
}
