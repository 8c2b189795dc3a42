//! Per-producer scenario breakdown.
//!
//! Query count is O(policies), not O(policies x producers): the baseline
//! comes from one grouped query, and every figure a step needs is fetched
//! once, grouped by pid, before any producer is walked.

use super::{
    plan::{plan, PlannedStep, StepInputs, StepKind},
    step::run_cumulative,
};
use crate::{
    condition::Condition,
    error::{FeeError, FeeResult},
    model::{ScenarioFilter, ScenarioPolicyBinding},
    store::{sql::{field_expr, SqlFragment}, FeeStore, ProducerTotals},
    totals::StepResult,
    types::{Pid, RuleId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "pid", rename_all = "snake_case")]
pub enum BreakdownMode {
    /// Baseline and final step for every producer.
    Summary,
    /// Full trace for one producer.
    SingleGroup(Pid),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerGroup {
    pub pid:           Pid,
    pub producer_name: String,
    pub row_count:     i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub baseline: StepResult,
    #[serde(rename = "final")]
    pub final_step: StepResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupResults {
    Summary(BTreeMap<Pid, GroupSummary>),
    SingleGroup(BTreeMap<Pid, Vec<StepResult>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerBreakdown {
    pub groups:  Vec<ProducerGroup>,
    pub results: GroupResults,
}

/// Step figures for every producer, fetched before the per-group loop.
#[derive(Debug, Default)]
struct GroupedInputs {
    matching: HashMap<Pid, f64>,
    quantity: HashMap<Pid, f64>,
}

impl GroupedInputs {
    fn for_group(&self, pid: &str) -> StepInputs {
        StepInputs {
            matching: self.matching.get(pid).copied().unwrap_or(0.0),
            quantity: self.quantity.get(pid).copied().unwrap_or(0.0),
        }
    }
}

pub struct ProducerBreakdownEngine<'a> {
    store:    &'a FeeStore,
    rule_ids: Vec<RuleId>,
}

impl<'a> ProducerBreakdownEngine<'a> {
    pub fn new(store: &'a FeeStore, rule_ids: Vec<RuleId>) -> Self {
        Self { store, rule_ids }
    }

    pub fn run_by_group(
        &self,
        bindings: &[ScenarioPolicyBinding],
        filter: &ScenarioFilter,
        mode: &BreakdownMode,
    ) -> FeeResult<ProducerBreakdown> {
        let baselines = self.store.grouped_totals(filter, &self.rule_ids)?;
        let groups: Vec<ProducerGroup> = baselines
            .iter()
            .map(|b| ProducerGroup {
                pid:           b.pid.clone(),
                producer_name: b.producer_name.clone(),
                row_count:     b.totals.row_count,
            })
            .collect();

        let selected: Vec<&ProducerTotals> = match mode {
            BreakdownMode::Summary => baselines.iter().collect(),
            BreakdownMode::SingleGroup(pid) => {
                let hit: Vec<&ProducerTotals> = baselines.iter().filter(|b| &b.pid == pid).collect();
                if hit.is_empty() {
                    return Err(FeeError::UnknownProducer { pid: pid.clone() });
                }
                hit
            }
        };

        let steps = plan(bindings, &self.rule_ids);
        let prefetched = self.prefetch(&steps, filter)?;
        log::info!(
            "Producer breakdown: {} producers, {} policies, {:?}",
            groups.len(),
            steps.len(),
            mode
        );

        let mut traces: BTreeMap<Pid, Vec<StepResult>> = BTreeMap::new();
        for group in selected {
            let baseline = StepResult::baseline(group.totals.clone());
            let trace = run_cumulative::<_, FeeError>(baseline, &steps, |i, _| {
                Ok(prefetched[i].for_group(&group.pid))
            })?;
            traces.insert(group.pid.clone(), trace);
        }

        let results = match mode {
            BreakdownMode::SingleGroup(_) => GroupResults::SingleGroup(traces),
            BreakdownMode::Summary => GroupResults::Summary(
                traces
                    .into_iter()
                    .filter_map(|(pid, mut trace)| {
                        let final_step = trace.pop()?;
                        let baseline = if trace.is_empty() {
                            final_step.clone()
                        } else {
                            trace.swap_remove(0)
                        };
                        Some((pid, GroupSummary { baseline, final_step }))
                    })
                    .collect(),
            ),
        };
        Ok(ProducerBreakdown { groups, results })
    }

    /// One grouped query per needed figure per step, over the whole
    /// filtered dataset. The queries run one after another on the store's
    /// single connection; there is no concurrent fetch.
    fn prefetch(&self, steps: &[PlannedStep], filter: &ScenarioFilter) -> FeeResult<Vec<GroupedInputs>> {
        let mut out = Vec::with_capacity(steps.len());
        for step in steps {
            let mut inputs = GroupedInputs::default();
            if let StepKind::Apply { field, prior, .. } = &step.kind {
                let needs = step.needs();
                let scope = step.scope();
                if needs.matching {
                    inputs.matching =
                        self.store.sum_where_by_group(filter, &scope, &field_expr(*field, prior))?;
                }
                if needs.quantity {
                    let scope = if needs.matching { scope } else { Condition::always() };
                    inputs.quantity =
                        self.store.sum_where_by_group(filter, &scope, &SqlFragment::new("r.quantity"))?;
                }
            }
            out.push(inputs);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width histogram of each producer's final total of `field`
/// (a raw fee or `computed_fee<ID>`). Producers lacking the field are left out.
pub fn summary_histogram(
    summary: &BTreeMap<Pid, GroupSummary>,
    field: &str,
    bins: usize,
) -> Vec<HistogramBin> {
    let values: Vec<f64> = summary
        .values()
        .filter_map(|s| s.final_step.totals.field_total(field))
        .collect();
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max <= min {
        return vec![HistogramBin { lower: min, upper: max, count: values.len() }];
    }
    let width = (max - min) / bins as f64;
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bins { max } else { min + width * (i + 1) as f64 },
            count: 0,
        })
        .collect();
    for v in values {
        let idx = (((v - min) / width).floor() as usize).min(bins - 1);
        out[idx].count += 1;
    }
    out
}
