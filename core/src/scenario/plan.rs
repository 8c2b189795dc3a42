//! Turning an ordered policy list into executable steps.
//!
//! Planning is pure: it validates each binding, resolves propagation
//! targets against the active rules and records, per raw field, which
//! earlier steps already changed it. The engines then only need numbers.

use crate::{
    condition::Condition,
    fields::{computed_fee_id, raw_fee_index},
    model::{PolicyType, ScenarioPolicyBinding},
    types::RuleId,
};

/// One effective change to a raw field, in application order.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldAdjustment {
    /// `value * factor` on matching rows.
    Scale { condition: Option<Condition>, factor: f64 },
    /// `quantity * value` on matching rows.
    PerUnit { condition: Option<Condition>, value: f64 },
}

impl FieldAdjustment {
    pub fn condition(&self) -> Option<&Condition> {
        match self {
            FieldAdjustment::Scale { condition, .. } | FieldAdjustment::PerUnit { condition, .. } => {
                condition.as_ref()
            }
        }
    }

    /// Apply to one row's current value.
    pub fn apply(&self, current: f64, quantity: f64) -> f64 {
        match self {
            FieldAdjustment::Scale { factor, .. } => current * factor,
            FieldAdjustment::PerUnit { value, .. } => quantity * value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// The policy changes nothing; the reason is reported on the step.
    Skip(String),
    Apply {
        field:      usize,
        adjustment: FieldAdjustment,
        /// Earlier effective adjustments of the same field.
        prior:      Vec<FieldAdjustment>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub binding: ScenarioPolicyBinding,
    pub kind:    StepKind,
    pub direct:  Vec<RuleId>,
    pub inverse: Vec<RuleId>,
}

/// Figures a step needs from the dataset (or one producer's slice of it).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepInputs {
    /// Current value of the target field summed over matching rows.
    pub matching: f64,
    /// Quantity summed over matching rows.
    pub quantity: f64,
}

/// Which aggregate figures a step needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputNeeds {
    pub matching: bool,
    pub quantity: bool,
}

impl PlannedStep {
    pub fn needs(&self) -> InputNeeds {
        match &self.kind {
            StepKind::Skip(_) => InputNeeds { matching: false, quantity: false },
            StepKind::Apply { adjustment, .. } => {
                let conditioned = adjustment.condition().is_some();
                InputNeeds {
                    matching: conditioned,
                    quantity: matches!(adjustment, FieldAdjustment::PerUnit { .. }),
                }
            }
        }
    }

    /// The step's condition, unconstrained when it has none.
    pub fn scope(&self) -> Condition {
        match &self.kind {
            StepKind::Apply { adjustment, .. } => adjustment.condition().cloned().unwrap_or_default(),
            StepKind::Skip(_) => Condition::always(),
        }
    }
}

/// Plan `bindings` (sorted by execution order) against the active rules.
pub fn plan(bindings: &[ScenarioPolicyBinding], active: &[RuleId]) -> Vec<PlannedStep> {
    let mut sorted: Vec<&ScenarioPolicyBinding> = bindings.iter().collect();
    sorted.sort_by_key(|b| b.order);

    let mut lineage: Vec<Vec<FieldAdjustment>> = vec![Vec::new(); crate::fields::RAW_FEE_COUNT];
    let mut steps = Vec::with_capacity(sorted.len());
    for binding in sorted {
        let kind = match classify(binding) {
            Ok((field, adjustment)) => {
                let prior = lineage[field].clone();
                lineage[field].push(adjustment.clone());
                StepKind::Apply { field, adjustment, prior }
            }
            Err(reason) => {
                log::debug!("Policy {} ({}) is a no-op: {reason}", binding.policy.id, binding.policy.name);
                StepKind::Skip(reason)
            }
        };
        let skipped = matches!(kind, StepKind::Skip(_));
        let (direct, inverse) = if skipped {
            (Vec::new(), Vec::new())
        } else {
            (
                targets(&binding.policy.affects_direct, active),
                targets(&binding.policy.affects_inverse, active),
            )
        };
        steps.push(PlannedStep { binding: binding.clone(), kind, direct, inverse });
    }
    steps
}

fn classify(binding: &ScenarioPolicyBinding) -> Result<(usize, FieldAdjustment), String> {
    let policy = &binding.policy;
    let field = raw_fee_index(&policy.field)
        .ok_or_else(|| format!("'{}' is not a raw fee field", policy.field))?;
    if let Condition::Malformed { raw } = &policy.condition {
        return Err(format!("condition does not parse: {raw}"));
    }
    if !binding.value.is_finite() {
        return Err(format!("value {} is not a finite number", binding.value));
    }
    let condition = if policy.condition.is_unconstrained() {
        None
    } else {
        Some(policy.condition.clone())
    };
    let adjustment = match policy.policy_type {
        PolicyType::ReducePercentage => FieldAdjustment::Scale {
            condition,
            factor: 1.0 - binding.value / 100.0,
        },
        PolicyType::SetValue => FieldAdjustment::PerUnit { condition, value: binding.value },
        PolicyType::Unsupported => return Err("unsupported policy type".into()),
    };
    Ok((field, adjustment))
}

fn targets(names: &[String], active: &[RuleId]) -> Vec<RuleId> {
    names
        .iter()
        .filter_map(|name| match computed_fee_id(name) {
            Some(id) if active.contains(&id) => Some(id),
            _ => {
                log::debug!("Propagation target '{name}' is not an active computed fee; skipped");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Policy;

    fn binding(id: i64, kind: PolicyType, field: &str, value: f64, order: i64) -> ScenarioPolicyBinding {
        ScenarioPolicyBinding::new(
            Policy {
                id,
                name: format!("policy {id}"),
                policy_type: kind,
                field: field.into(),
                condition: Condition::always(),
                affects_direct: vec!["computed_fee1".into(), "computed_fee9".into()],
                affects_inverse: vec!["fee2".into()],
                default_value: 0.0,
                group_id: None,
            },
            value,
            order,
        )
    }

    #[test]
    fn steps_follow_execution_order() {
        let steps = plan(
            &[
                binding(1, PolicyType::ReducePercentage, "fee1", 10.0, 2),
                binding(2, PolicyType::SetValue, "fee1", 3.0, 1),
            ],
            &[1],
        );
        assert_eq!(steps[0].binding.policy.id, 2);
        assert_eq!(steps[1].binding.policy.id, 1);
        match &steps[1].kind {
            StepKind::Apply { prior, adjustment, .. } => {
                assert_eq!(prior.len(), 1);
                assert_eq!(*adjustment, FieldAdjustment::Scale { condition: None, factor: 0.9 });
            }
            other => panic!("expected an applied step, got {other:?}"),
        }
    }

    #[test]
    fn invalid_targets_are_skipped() {
        let mut malformed = binding(3, PolicyType::ReducePercentage, "fee1", 10.0, 3);
        malformed.policy.condition = Condition::parse(Some("{bad json"));
        let steps = plan(
            &[
                binding(1, PolicyType::ReducePercentage, "computed_fee1", 10.0, 1),
                binding(2, PolicyType::Unsupported, "fee1", 10.0, 2),
                malformed,
            ],
            &[1],
        );
        assert!(steps.iter().all(|s| matches!(s.kind, StepKind::Skip(_))));
        assert!(steps.iter().all(|s| s.direct.is_empty() && s.inverse.is_empty()));
    }

    #[test]
    fn only_active_computed_fees_receive_effects() {
        let steps = plan(&[binding(1, PolicyType::ReducePercentage, "fee1", 10.0, 1)], &[1]);
        assert_eq!(steps[0].direct, vec![1]);
        assert!(steps[0].inverse.is_empty());
    }
}
