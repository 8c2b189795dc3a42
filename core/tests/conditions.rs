//! Stored condition text: parsing, matching and operator diagnostics.

mod common;

use common::*;
use feesim_core::{
    calculator::EngineMode,
    condition::Condition,
    model::{PolicyType, ScenarioFilter},
};

#[test]
fn malformed_conditions_are_reported_with_their_raw_text() {
    let calc = three_row_calculator();
    calc.store.insert_policy(&policy(7, PolicyType::ReducePercentage, "fee1")).unwrap();
    calc.store.set_policy_condition_text(7, Some("{bad json")).unwrap();
    calc.store.set_rule_condition_text(1, Some("[1, 2]")).unwrap();

    let issues = calc.condition_issues().unwrap();
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].owner, "rule");
    assert_eq!(issues[0].id, 1);
    assert_eq!(issues[1].owner, "policy");
    assert_eq!(issues[1].condition, Condition::Malformed { raw: "{bad json".into() });

    let json = serde_json::to_value(&issues[1]).unwrap();
    assert_eq!(json["condition"]["_parseError"], serde_json::Value::Bool(true));
    assert_eq!(json["condition"]["raw"], "{bad json");
}

#[test]
fn stored_conditions_round_trip_through_the_store() {
    let calc = three_row_calculator();
    let mut p = policy(3, PolicyType::SetValue, "fee2");
    p.condition = Condition::from_pairs(&[("type", "Y"), ("region", "north")]);
    calc.store.insert_policy(&p).unwrap();

    let loaded = calc.store.policy(3).unwrap().unwrap();
    assert_eq!(loaded.condition, p.condition);
    assert!(calc.condition_issues().unwrap().is_empty());
}

#[test]
fn empty_and_null_condition_values_are_ignored() {
    let calc = three_row_calculator();
    calc.store.insert_policy(&policy(4, PolicyType::SetValue, "fee2")).unwrap();
    calc.store
        .set_policy_condition_text(4, Some(r#"{"type": "Y", "region": "", "category": null}"#))
        .unwrap();

    let loaded = calc.store.policy(4).unwrap().unwrap();
    assert_eq!(loaded.condition, Condition::from_pairs(&[("type", "Y")]));
}

#[test]
fn malformed_rule_condition_contributes_zero() {
    let mut calc = three_row_calculator();
    calc.store.set_rule_condition_text(1, Some("{bad json")).unwrap();
    calc.rebuild_cache().unwrap();

    assert_close(calc.store.cache_entry(1).unwrap().value(1), 0.0, "row A computed_fee1");
}

#[test]
fn malformed_policy_condition_is_a_no_op_step() {
    let mut calc = three_row_calculator();
    calc.rebuild_cache().unwrap();
    calc.store.insert_scenario(1, "broken").unwrap();
    calc.store.insert_policy(&policy(7, PolicyType::ReducePercentage, "fee1")).unwrap();
    calc.store.set_policy_condition_text(7, Some("{bad json")).unwrap();
    calc.store.bind_policy(1, 7, 1, Some(50.0)).unwrap();

    for mode in [EngineMode::Aggregate, EngineMode::RowLevel] {
        let results = calc.run_scenario(1, &ScenarioFilter::all(), mode).unwrap();
        assert_eq!(results.len(), 2);
        assert_close(results[1].net_effect, 0.0, "net effect");
        assert_eq!(results[1].totals, results[0].totals);
        let applied = results[1].policy.as_ref().unwrap();
        assert!(applied.skipped.is_some());
        assert!(applied.condition.is_malformed());
    }
}

#[test]
fn numeric_condition_values_match_text_attributes() {
    let calc = calculator();
    let mut r = row(1, "100", "X", 1.0, &[(0, 10.0)]);
    r.region = "7".into();
    calc.store.insert_row(&r).unwrap();

    let cond = Condition::parse(Some(r#"{"region": 7, "pid": "100"}"#));
    let loaded = calc.store.rows_matching(&ScenarioFilter::all()).unwrap();
    assert!(cond.matches(&loaded[0]));
    assert!(!Condition::parse(Some(r#"{"color": "red"}"#)).matches(&loaded[0]));
}
