//! Calculation entry points consumed by the routing layer.
//!
//! The calculator owns the store connection and the one derived cache
//! instance; every entry point resolves the active rules first, so a
//! dependency cycle fails before any figure is produced. Aggregate entry
//! points rebuild a stale cache before reading it.

use crate::{
    cache::{DerivedCache, DerivedCacheEntry, ProgressSnapshot, RebuildProgress, RebuildReport},
    condition::Condition,
    config::FeeConfig,
    error::FeeResult,
    model::{ScenarioFilter, ScenarioPolicyBinding},
    scenario::{
        summary_histogram, AggregateEngine, BreakdownMode, GroupResults, HistogramBin,
        ProducerBreakdown, ProducerBreakdownEngine, RowLevelEngine,
    },
    store::FeeStore,
    totals::StepResult,
    types::{RowId, RuleId, ScenarioId},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// Set-aggregate queries over the cached baseline.
    Aggregate,
    /// Row materialization with direct formula evaluation.
    RowLevel,
}

/// A stored condition that failed to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionIssue {
    pub owner:     String,
    pub id:        i64,
    pub name:      String,
    pub condition: Condition,
}

pub struct FeeCalculator {
    pub store: FeeStore,
    cache:     DerivedCache,
    config:    FeeConfig,
}

impl FeeCalculator {
    pub fn new(store: FeeStore, config: FeeConfig) -> Self {
        Self {
            cache: DerivedCache::new(config.batch_size),
            store,
            config,
        }
    }

    /// Open the configured database and apply the schema.
    pub fn open(config: FeeConfig) -> FeeResult<Self> {
        let store = if config.db_path == ":memory:" {
            FeeStore::in_memory()?
        } else {
            FeeStore::open(&config.db_path)?
        };
        store.migrate()?;
        Ok(Self::new(store, config))
    }

    /// In-memory store with the test config (used in tests).
    pub fn build_test() -> FeeResult<Self> {
        let store = FeeStore::in_memory()?;
        store.migrate()?;
        Ok(Self::new(store, FeeConfig::default_test()))
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    // ── Baseline and scenarios ─────────────────────────────────

    pub fn baseline(&mut self, filter: &ScenarioFilter) -> FeeResult<StepResult> {
        let rule_ids = self.fresh_rule_ids()?;
        AggregateEngine::new(&self.store, rule_ids).baseline(filter)
    }

    pub fn run_policies(
        &mut self,
        bindings: &[ScenarioPolicyBinding],
        filter: &ScenarioFilter,
        mode: EngineMode,
    ) -> FeeResult<Vec<StepResult>> {
        match mode {
            EngineMode::Aggregate => {
                let rule_ids = self.fresh_rule_ids()?;
                AggregateEngine::new(&self.store, rule_ids).run(bindings, filter)
            }
            EngineMode::RowLevel => {
                let rules = self.cache.compiled_rules(&self.store)?;
                RowLevelEngine::new(&self.store, rules).run(bindings, filter)
            }
        }
    }

    pub fn run_scenario(
        &mut self,
        scenario_id: ScenarioId,
        filter: &ScenarioFilter,
        mode: EngineMode,
    ) -> FeeResult<Vec<StepResult>> {
        let bindings = self.store.scenario_bindings(scenario_id)?;
        self.run_policies(&bindings, filter, mode)
    }

    pub fn run_policies_by_producer(
        &mut self,
        bindings: &[ScenarioPolicyBinding],
        filter: &ScenarioFilter,
        mode: &BreakdownMode,
    ) -> FeeResult<ProducerBreakdown> {
        let rule_ids = self.fresh_rule_ids()?;
        ProducerBreakdownEngine::new(&self.store, rule_ids).run_by_group(bindings, filter, mode)
    }

    pub fn run_by_producer(
        &mut self,
        scenario_id: ScenarioId,
        filter: &ScenarioFilter,
        mode: &BreakdownMode,
    ) -> FeeResult<ProducerBreakdown> {
        let bindings = self.store.scenario_bindings(scenario_id)?;
        self.run_policies_by_producer(&bindings, filter, mode)
    }

    /// Histogram of final per-producer totals; empty for single-group results.
    pub fn histogram(&self, breakdown: &ProducerBreakdown, field: &str) -> Vec<HistogramBin> {
        match &breakdown.results {
            GroupResults::Summary(summary) => summary_histogram(summary, field, self.config.histogram_bins),
            GroupResults::SingleGroup(_) => Vec::new(),
        }
    }

    /// Active rule ids, after rebuilding the cache if the active rules
    /// changed since it was built. Every cached read goes through here.
    fn fresh_rule_ids(&mut self) -> FeeResult<Vec<RuleId>> {
        if let Some(report) = self.cache.ensure_fresh(&self.store)? {
            log::info!("Cache refreshed to v{} before reading totals", report.version);
        }
        self.cache.active_rule_ids(&self.store)
    }

    // ── Cache ──────────────────────────────────────────────────

    pub fn rebuild_cache(&mut self) -> FeeResult<RebuildReport> {
        self.cache.rebuild_all(&self.store)
    }

    pub fn rebuild_rows(&mut self, row_ids: &[RowId]) -> FeeResult<u64> {
        self.cache.rebuild_for(&self.store, row_ids)
    }

    pub fn ensure_fresh(&mut self) -> FeeResult<Option<RebuildReport>> {
        self.cache.ensure_fresh(&self.store)
    }

    pub fn clear_cache(&mut self) -> FeeResult<()> {
        self.cache.clear(&self.store)
    }

    pub fn cache_entry(&self, row_id: RowId) -> FeeResult<DerivedCacheEntry> {
        self.cache.entry(&self.store, row_id)
    }

    pub fn cache_version(&self) -> FeeResult<i64> {
        self.cache.current_version(&self.store)
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.cache.progress().snapshot()
    }

    /// Shared counters for polling from another thread.
    pub fn progress_handle(&self) -> Arc<RebuildProgress> {
        self.cache.progress()
    }

    // ── Operator diagnostics ───────────────────────────────────

    /// Policies and rules whose stored condition text does not parse.
    pub fn condition_issues(&self) -> FeeResult<Vec<ConditionIssue>> {
        let mut issues = Vec::new();
        for rule in self.store.all_rules()? {
            if rule.condition.is_malformed() {
                issues.push(ConditionIssue {
                    owner:     "rule".into(),
                    id:        rule.id,
                    name:      rule.name,
                    condition: rule.condition,
                });
            }
        }
        for policy in self.store.all_policies()? {
            if policy.condition.is_malformed() {
                issues.push(ConditionIssue {
                    owner:     "policy".into(),
                    id:        policy.id,
                    name:      policy.name,
                    condition: policy.condition,
                });
            }
        }
        Ok(issues)
    }
}
