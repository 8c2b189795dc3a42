//! fee-runner: headless driver for the fee simulation core.
//!
//! Usage:
//!   fee-runner --seed-demo 5000 --rebuild
//!   fee-runner --db fees.db --scenario 1
//!   fee-runner --db fees.db --scenario 1 --producers --histogram computed_fee1
//!   fee-runner --db fees.db --scenario 1 --group P003 --row-level

use anyhow::Result;
use feesim_core::{
    cache::RebuildReport,
    calculator::{ConditionIssue, EngineMode, FeeCalculator},
    condition::Condition,
    config::FeeConfig,
    model::{ComputedFeeRule, DataRow, Policy, PolicyType, ScenarioFilter},
    scenario::{BreakdownMode, HistogramBin, ProducerBreakdown},
    totals::StepResult,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(serde::Serialize)]
struct RunOutput {
    cache_version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    rebuild: Option<RebuildReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    baseline: Option<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<StepResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    breakdown: Option<ProducerBreakdown>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    histogram: Vec<HistogramBin>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    condition_issues: Vec<ConditionIssue>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mut config = match flag_value(&args, "--config") {
        Some(path) => FeeConfig::load(path)?,
        None => FeeConfig::default(),
    };
    if let Some(db) = flag_value(&args, "--db") {
        config.db_path = db.to_string();
    }
    let demo_rows = parse_arg(&args, "--seed-demo", 0u64);
    let seed = parse_arg(&args, "--seed", 42u64);
    let scenario = flag_value(&args, "--scenario").map(str::parse::<i64>).transpose()?;
    let group = flag_value(&args, "--group");
    let producers = group.is_some() || args.iter().any(|a| a == "--producers");
    let histogram_field = flag_value(&args, "--histogram");
    let mode = if args.iter().any(|a| a == "--row-level") {
        EngineMode::RowLevel
    } else {
        EngineMode::Aggregate
    };

    log::info!("fee-runner: db={} batch_size={}", config.db_path, config.batch_size);
    let mut calc = FeeCalculator::open(config)?;

    if demo_rows > 0 {
        seed_demo(&calc, demo_rows, seed)?;
    }

    let rebuild = if args.iter().any(|a| a == "--rebuild") {
        Some(rebuild_with_progress(&mut calc)?)
    } else {
        calc.ensure_fresh()?
    };

    let filter = ScenarioFilter::all();
    let mut output = RunOutput {
        cache_version:    calc.cache_version()?,
        rebuild,
        baseline:         None,
        results:          None,
        breakdown:        None,
        histogram:        Vec::new(),
        condition_issues: calc.condition_issues()?,
    };

    match scenario {
        None => output.baseline = Some(calc.baseline(&filter)?),
        Some(id) if producers => {
            let breakdown_mode = match group {
                Some(pid) => BreakdownMode::SingleGroup(pid.to_string()),
                None => BreakdownMode::Summary,
            };
            let breakdown = calc.run_by_producer(id, &filter, &breakdown_mode)?;
            if let Some(field) = histogram_field {
                output.histogram = calc.histogram(&breakdown, field);
            }
            output.breakdown = Some(breakdown);
        }
        Some(id) => output.results = Some(calc.run_scenario(id, &filter, mode)?),
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Full rebuild while a second thread logs the shared progress counters.
fn rebuild_with_progress(calc: &mut FeeCalculator) -> Result<RebuildReport> {
    let progress = calc.progress_handle();
    let done = AtomicBool::new(false);
    let report = std::thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                let snap = progress.snapshot();
                if snap.total > 0 {
                    log::info!("Rebuild progress: {}/{} ({:.1}%)", snap.processed, snap.total, snap.percentage);
                }
                std::thread::sleep(Duration::from_millis(250));
            }
        });
        let report = calc.rebuild_cache();
        done.store(true, Ordering::SeqCst);
        report
    })?;
    Ok(report)
}

// ── Demo data ──────────────────────────────────────────────────

const TYPES: [&str; 3] = ["standard", "premium", "bulk"];
const SUBTYPES: [&str; 2] = ["new", "renewal"];
const CATEGORIES: [&str; 3] = ["retail", "wholesale", "online"];
const REGIONS: [&str; 4] = ["north", "south", "east", "west"];

/// Append `rows` synthetic rows, and the demo rules, policies and
/// scenario 1 when the store has no rules yet.
fn seed_demo(calc: &FeeCalculator, rows: u64, seed: u64) -> Result<()> {
    let mut rng = Pcg64::seed_from_u64(seed);
    let start = calc.store.max_row_id()? + 1;
    let data: Vec<DataRow> = (start..start + rows as i64)
        .map(|row_id| demo_row(&mut rng, row_id))
        .collect();
    calc.store.insert_rows(&data)?;
    log::info!("Seeded {rows} demo rows (seed {seed})");

    if !calc.store.all_rules()?.is_empty() {
        return Ok(());
    }
    for (id, priority, formula, condition) in [
        (1, 1, "fee1 * 0.05 + fee2", Condition::always()),
        (2, 2, "computed_fee1 + quantity * 0.5", Condition::always()),
        (3, 3, "(fee3 - fee4) / 2", Condition::from_pairs(&[("region", "north")])),
    ] {
        calc.store.insert_rule(&ComputedFeeRule {
            id,
            name: format!("Demo computed fee {id}"),
            priority,
            active: true,
            formula: formula.into(),
            condition,
            group_id: None,
        })?;
    }

    let policies = [
        Policy {
            id:              1,
            name:            "Premium fee1 discount".into(),
            policy_type:     PolicyType::ReducePercentage,
            field:           "fee1".into(),
            condition:       Condition::from_pairs(&[("type", "premium")]),
            affects_direct:  vec!["computed_fee1".into()],
            affects_inverse: Vec::new(),
            default_value:   20.0,
            group_id:        Some(1),
        },
        Policy {
            id:              2,
            name:            "Flat fee3 per unit".into(),
            policy_type:     PolicyType::SetValue,
            field:           "fee3".into(),
            condition:       Condition::always(),
            affects_direct:  Vec::new(),
            affects_inverse: vec!["computed_fee3".into()],
            default_value:   1.5,
            group_id:        Some(1),
        },
    ];
    calc.store.insert_scenario(1, "Demo scenario")?;
    for (order, policy) in policies.iter().enumerate() {
        calc.store.insert_policy(policy)?;
        calc.store.bind_policy(1, policy.id, order as i64 + 1, None)?;
    }
    log::info!("Seeded demo rules, policies and scenario 1");
    Ok(())
}

fn demo_row(rng: &mut Pcg64, row_id: i64) -> DataRow {
    let producer = rng.gen_range(1..=25);
    let mut row = DataRow::empty(row_id, &format!("P{producer:03}"));
    row.producer_name = format!("Producer {producer:03}");
    row.row_type = TYPES[rng.gen_range(0..TYPES.len())].into();
    row.subtype = SUBTYPES[rng.gen_range(0..SUBTYPES.len())].into();
    row.category = CATEGORIES[rng.gen_range(0..CATEGORIES.len())].into();
    row.region = REGIONS[rng.gen_range(0..REGIONS.len())].into();
    row.quantity = rng.gen_range(1..=200) as f64;
    for fee in row.fees.iter_mut().take(6) {
        *fee = (rng.gen_range(0.0..1000.0_f64) * 100.0).round() / 100.0;
    }
    row
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    flag_value(args, flag)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
