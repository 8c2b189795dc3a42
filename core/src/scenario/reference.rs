//! Row-level reference engine.
//!
//! Loads every filtered row, evaluates computed fees directly with the
//! row evaluator and applies each policy to the rows themselves. Slow by
//! construction; it exists to check the aggregate engines.

use super::{
    plan::{plan, StepKind},
    step::finish_step,
};
use crate::{
    error::FeeResult,
    evaluator::RowEvaluator,
    model::{ScenarioFilter, ScenarioPolicyBinding},
    resolver::CompiledRuleSet,
    store::FeeStore,
    totals::{FeeTotals, StepResult},
};

pub struct RowLevelEngine<'a> {
    store: &'a FeeStore,
    rules: &'a CompiledRuleSet,
}

impl<'a> RowLevelEngine<'a> {
    pub fn new(store: &'a FeeStore, rules: &'a CompiledRuleSet) -> Self {
        Self { store, rules }
    }

    pub fn run(
        &self,
        bindings: &[ScenarioPolicyBinding],
        filter: &ScenarioFilter,
    ) -> FeeResult<Vec<StepResult>> {
        let mut rows = self.store.rows_matching(filter)?;
        let rule_ids = self.rules.rule_ids();
        let evaluator = RowEvaluator::new(self.rules);

        let mut totals = FeeTotals::zero(&rule_ids);
        for row in &rows {
            totals.add_row(row);
            evaluator.evaluate_row(row, &mut totals.computed);
        }
        log::info!("Row-level scenario: {} rows, {} policies", rows.len(), bindings.len());

        let steps = plan(bindings, &rule_ids);
        let mut results = Vec::with_capacity(steps.len() + 1);
        results.push(StepResult::baseline(totals));
        for (i, step) in steps.iter().enumerate() {
            let new_target = match &step.kind {
                StepKind::Skip(_) => 0.0,
                StepKind::Apply { field, adjustment, .. } => {
                    for row in rows.iter_mut() {
                        let hit = adjustment.condition().map(|c| c.matches(row)).unwrap_or(true);
                        if hit {
                            row.fees[*field] = adjustment.apply(row.fees[*field], row.quantity);
                        }
                    }
                    rows.iter().map(|r| r.fees[*field]).sum()
                }
            };
            let next = finish_step(&results[results.len() - 1], i + 1, step, new_target);
            results.push(next);
        }
        Ok(results)
    }
}
