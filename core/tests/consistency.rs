//! The aggregate engine must agree with the row-level reference engine on
//! every step, for seeded random data.

mod common;

use common::*;
use feesim_core::{
    calculator::{EngineMode, FeeCalculator},
    condition::Condition,
    model::{PolicyType, ScenarioFilter, ScenarioPolicyBinding},
    totals::StepResult,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

const TYPES: [&str; 3] = ["X", "Y", "Z"];
const REGIONS: [&str; 2] = ["north", "south"];

fn seeded_calculator(seed: u64, rows: i64) -> FeeCalculator {
    let mut rng = Pcg64::seed_from_u64(seed);
    let calc = calculator();
    let data: Vec<_> = (1..=rows)
        .map(|id| {
            let pid = format!("P{}", rng.gen_range(1..=6));
            let ty = TYPES[rng.gen_range(0..TYPES.len())];
            let qty = rng.gen_range(0..20) as f64;
            let mut r = row(id, &pid, ty, qty, &[]);
            r.region = REGIONS[rng.gen_range(0..REGIONS.len())].into();
            for fee in r.fees.iter_mut().take(4) {
                *fee = rng.gen_range(0.0..500.0);
            }
            r
        })
        .collect();
    calc.store.insert_rows(&data).unwrap();

    calc.store.insert_rule(&rule(1, 1, "fee1 * 0.1 + fee2")).unwrap();
    calc.store.insert_rule(&rule(2, 2, "computed_fee1 * 2 - quantity")).unwrap();
    let mut regional = rule(3, 3, "fee3 / (quantity + 1)");
    regional.condition = Condition::from_pairs(&[("region", "north")]);
    calc.store.insert_rule(&regional).unwrap();
    calc
}

fn scenario() -> Vec<ScenarioPolicyBinding> {
    let mut cut_x = policy(1, PolicyType::ReducePercentage, "fee1");
    cut_x.condition = Condition::from_pairs(&[("type", "X")]);
    cut_x.affects_direct = vec!["computed_fee1".into(), "computed_fee2".into()];

    let mut flat_south = policy(2, PolicyType::SetValue, "fee1");
    flat_south.condition = Condition::from_pairs(&[("region", "south")]);
    flat_south.affects_inverse = vec!["computed_fee3".into()];

    let cut_all = policy(3, PolicyType::ReducePercentage, "fee1");

    let mut set_fee4 = policy(4, PolicyType::SetValue, "fee4");
    set_fee4.affects_direct = vec!["computed_fee2".into()];

    let mut cut_y = policy(5, PolicyType::ReducePercentage, "fee1");
    cut_y.condition = Condition::from_pairs(&[("type", "Y")]);

    vec![
        bind(cut_x, 30.0, 1),
        bind(flat_south, 7.5, 2),
        bind(cut_all, 10.0, 3),
        bind(set_fee4, 1.25, 4),
        bind(cut_y, 50.0, 5),
    ]
}

fn assert_same_trace(aggregate: &[StepResult], row_level: &[StepResult]) {
    assert_eq!(aggregate.len(), row_level.len());
    for (a, r) in aggregate.iter().zip(row_level) {
        let tol = 1e-6 * (1.0 + r.totals.raw.iter().map(|v| v.abs()).sum::<f64>());
        assert_eq!(a.totals.row_count, r.totals.row_count, "step {} row count", a.step);
        assert!((a.net_effect - r.net_effect).abs() < tol, "step {} net effect", a.step);
        for i in 0..a.totals.raw.len() {
            assert!(
                (a.totals.raw[i] - r.totals.raw[i]).abs() < tol,
                "step {} fee{}: {} vs {}",
                a.step,
                i + 1,
                a.totals.raw[i],
                r.totals.raw[i]
            );
        }
        assert_eq!(
            a.totals.computed.keys().collect::<Vec<_>>(),
            r.totals.computed.keys().collect::<Vec<_>>()
        );
        for (id, v) in &a.totals.computed {
            assert!(
                (v - r.totals.computed[id]).abs() < tol,
                "step {} computed_fee{id}: {v} vs {}",
                a.step,
                r.totals.computed[id]
            );
        }
    }
}

#[test]
fn aggregate_matches_row_level_on_random_data() {
    for seed in [7, 42, 1234] {
        let mut calc = seeded_calculator(seed, 60);
        calc.rebuild_cache().unwrap();
        let bindings = scenario();
        let filter = ScenarioFilter::all();

        let aggregate = calc.run_policies(&bindings, &filter, EngineMode::Aggregate).unwrap();
        let row_level = calc.run_policies(&bindings, &filter, EngineMode::RowLevel).unwrap();
        assert_same_trace(&aggregate, &row_level);
    }
}

#[test]
fn aggregate_matches_row_level_under_a_filter() {
    let mut calc = seeded_calculator(99, 80);
    calc.rebuild_cache().unwrap();
    let filter = ScenarioFilter {
        types:   vec!["X".into(), "Z".into()],
        regions: vec!["north".into()],
        ..ScenarioFilter::all()
    };
    let bindings = scenario();

    let aggregate = calc.run_policies(&bindings, &filter, EngineMode::Aggregate).unwrap();
    let row_level = calc.run_policies(&bindings, &filter, EngineMode::RowLevel).unwrap();
    assert_same_trace(&aggregate, &row_level);
}

#[test]
fn stacked_steps_on_one_field_stay_exact() {
    // Three reductions on overlapping subsets of fee1, then a conditioned
    // set_value on top: each step must see the field as the previous
    // steps left it, row by row.
    let mut calc = seeded_calculator(5, 40);
    calc.rebuild_cache().unwrap();
    let bindings = scenario();

    let aggregate = calc
        .run_policies(&bindings, &ScenarioFilter::all(), EngineMode::Aggregate)
        .unwrap();
    let row_level = calc
        .run_policies(&bindings, &ScenarioFilter::all(), EngineMode::RowLevel)
        .unwrap();
    let last = aggregate.len() - 1;
    assert_close(
        aggregate[last].totals.raw[0],
        row_level[last].totals.raw[0],
        "final fee1",
    );
    // Conservation: the final fee1 is the baseline plus every step's net effect.
    let fee1_steps: f64 = aggregate
        .iter()
        .filter(|s| s.policy.as_ref().map(|p| p.field == "fee1").unwrap_or(false))
        .map(|s| s.net_effect)
        .sum();
    assert!(
        (aggregate[0].totals.raw[0] + fee1_steps - aggregate[last].totals.raw[0]).abs() < 1e-6,
        "fee1 net effects do not add up"
    );
}
