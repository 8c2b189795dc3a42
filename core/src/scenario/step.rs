//! The cumulative step shared by every engine.
//!
//! Net effect is always `new target total - previous target total`, and
//! that exact figure is what moves into the propagation targets.

use super::plan::{FieldAdjustment, PlannedStep, StepInputs, StepKind};
use crate::totals::{AppliedPolicy, FeeTotals, StepResult};

/// New target total from aggregate figures alone.
pub fn target_total(previous: f64, adjustment: &FieldAdjustment, inputs: &StepInputs) -> f64 {
    match adjustment {
        FieldAdjustment::Scale { condition: None, factor } => previous * factor,
        FieldAdjustment::Scale { condition: Some(_), factor } => {
            // matching part scaled, the rest untouched
            inputs.matching * factor + (previous - inputs.matching)
        }
        FieldAdjustment::PerUnit { condition: None, value } => inputs.quantity * value,
        FieldAdjustment::PerUnit { condition: Some(_), value } => {
            inputs.quantity * value + (previous - inputs.matching)
        }
    }
}

/// Build step `index` from the previous step and the target's new total.
/// `new_target` is ignored for skipped steps.
pub fn finish_step(previous: &StepResult, index: usize, step: &PlannedStep, new_target: f64) -> StepResult {
    let mut totals: FeeTotals = previous.totals.clone();
    let (net_effect, skipped) = match &step.kind {
        StepKind::Skip(reason) => (0.0, Some(reason.clone())),
        StepKind::Apply { field, .. } => {
            let net = new_target - totals.raw[*field];
            totals.raw[*field] = new_target;
            for id in &step.direct {
                *totals.computed.entry(*id).or_insert(0.0) += net;
            }
            for id in &step.inverse {
                *totals.computed.entry(*id).or_insert(0.0) -= net;
            }
            (net, None)
        }
    };
    StepResult {
        step: index,
        policy: Some(AppliedPolicy::from_binding(&step.binding, skipped)),
        net_effect,
        totals,
    }
}

/// Run the whole plan from `baseline`, fetching inputs per step.
pub fn run_cumulative<F, E>(baseline: StepResult, steps: &[PlannedStep], mut inputs_for: F) -> Result<Vec<StepResult>, E>
where
    F: FnMut(usize, &PlannedStep) -> Result<StepInputs, E>,
{
    let mut results = Vec::with_capacity(steps.len() + 1);
    results.push(baseline);
    for (i, step) in steps.iter().enumerate() {
        let previous = &results[results.len() - 1];
        let new_target = match &step.kind {
            StepKind::Skip(_) => 0.0,
            StepKind::Apply { field, adjustment, .. } => {
                let inputs = inputs_for(i, step)?;
                target_total(previous.totals.raw[*field], adjustment, &inputs)
            }
        };
        let next = finish_step(previous, i + 1, step, new_target);
        results.push(next);
    }
    Ok(results)
}
