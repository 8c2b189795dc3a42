//! Shared builders for integration tests.
#![allow(dead_code)]

use feesim_core::{
    calculator::FeeCalculator,
    condition::Condition,
    model::{ComputedFeeRule, DataRow, Policy, PolicyType, ScenarioPolicyBinding},
    types::{RowId, RuleId},
};

pub const EPS: f64 = 1e-6;

pub fn calculator() -> FeeCalculator {
    let _ = env_logger::builder().is_test(true).try_init();
    FeeCalculator::build_test().expect("build_test failed")
}

/// A row with the given raw fees (`(fee index, amount)`).
pub fn row(row_id: RowId, pid: &str, row_type: &str, quantity: f64, fees: &[(usize, f64)]) -> DataRow {
    let mut r = DataRow::empty(row_id, pid);
    r.producer_name = format!("Producer {pid}");
    r.row_type = row_type.into();
    r.quantity = quantity;
    for (i, v) in fees {
        r.fees[*i] = *v;
    }
    r
}

pub fn rule(id: RuleId, priority: i64, formula: &str) -> ComputedFeeRule {
    ComputedFeeRule {
        id,
        name: format!("Computed fee {id}"),
        priority,
        active: true,
        formula: formula.into(),
        condition: Condition::always(),
        group_id: None,
    }
}

pub fn policy(id: i64, policy_type: PolicyType, field: &str) -> Policy {
    Policy {
        id,
        name: format!("Policy {id}"),
        policy_type,
        field: field.into(),
        condition: Condition::always(),
        affects_direct: Vec::new(),
        affects_inverse: Vec::new(),
        default_value: 0.0,
        group_id: None,
    }
}

pub fn bind(policy: Policy, value: f64, order: i64) -> ScenarioPolicyBinding {
    ScenarioPolicyBinding::new(policy, value, order)
}

pub fn assert_close(actual: f64, expected: f64, what: &str) {
    assert!(
        (actual - expected).abs() < EPS,
        "{what}: expected {expected}, got {actual}"
    );
}

/// The three-row dataset: only row A (type X) carries fee1 = 100, and
/// computed_fee1 = fee1 * 0.1.
pub fn three_row_calculator() -> FeeCalculator {
    let calc = calculator();
    calc.store
        .insert_rows(&[
            row(1, "P1", "X", 2.0, &[(0, 100.0)]),
            row(2, "P1", "Y", 3.0, &[]),
            row(3, "P2", "Y", 5.0, &[]),
        ])
        .unwrap();
    calc.store.insert_rule(&rule(1, 1, "fee1 * 0.1")).unwrap();
    calc
}
