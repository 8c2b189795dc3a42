//! Dataset-wide scenario waterfall computed from aggregates.

use super::{
    plan::{plan, PlannedStep, StepInputs, StepKind},
    step::run_cumulative,
};
use crate::{
    condition::Condition,
    error::{FeeError, FeeResult},
    model::{ScenarioFilter, ScenarioPolicyBinding},
    store::{sql::{field_expr, SqlFragment}, FeeStore},
    totals::StepResult,
    types::RuleId,
};

pub struct AggregateEngine<'a> {
    store:    &'a FeeStore,
    rule_ids: Vec<RuleId>,
}

impl<'a> AggregateEngine<'a> {
    /// `rule_ids`: the active computed fees, in evaluation order.
    pub fn new(store: &'a FeeStore, rule_ids: Vec<RuleId>) -> Self {
        Self { store, rule_ids }
    }

    pub fn baseline(&self, filter: &ScenarioFilter) -> FeeResult<StepResult> {
        let totals = self.store.aggregate_totals(filter, &self.rule_ids)?;
        Ok(StepResult::baseline(totals))
    }

    /// Baseline followed by one result per binding, applied cumulatively.
    pub fn run(
        &self,
        bindings: &[ScenarioPolicyBinding],
        filter: &ScenarioFilter,
    ) -> FeeResult<Vec<StepResult>> {
        let baseline = self.baseline(filter)?;
        let steps = plan(bindings, &self.rule_ids);
        log::info!(
            "Aggregate scenario: {} rows, {} policies",
            baseline.totals.row_count,
            steps.len()
        );
        run_cumulative::<_, FeeError>(baseline, &steps, |_, step| self.step_inputs(step, filter))
    }

    fn step_inputs(&self, step: &PlannedStep, filter: &ScenarioFilter) -> FeeResult<StepInputs> {
        let StepKind::Apply { field, prior, .. } = &step.kind else {
            return Ok(StepInputs::default());
        };
        let needs = step.needs();
        let scope = step.scope();
        let mut inputs = StepInputs::default();
        if needs.matching {
            inputs.matching = self.store.sum_where(filter, &scope, &field_expr(*field, prior))?;
        }
        if needs.quantity {
            let scope = if needs.matching { scope } else { Condition::always() };
            inputs.quantity = self.store.sum_where(filter, &scope, &SqlFragment::new("r.quantity"))?;
        }
        Ok(inputs)
    }
}
