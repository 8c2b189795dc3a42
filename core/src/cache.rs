//! Derived-value cache: materialized computed fee values per row.
//!
//! A full rebuild resolves the active rules before touching the table, so
//! a dependency cycle leaves the existing cache intact. Batches commit one
//! at a time; a failing batch rolls back and aborts the rebuild, leaving
//! earlier batches in place and the version unchanged.
//!
//! There is no lock around the table. A scenario read during a rebuild may
//! see a partly rebuilt cache.

use crate::{
    error::FeeResult,
    evaluator::RowEvaluator,
    model::DataRow,
    resolver::{fingerprint, CompiledRuleSet},
    store::FeeStore,
    types::{RowId, RuleId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One row's cached outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedCacheEntry {
    pub row_id:        RowId,
    pub values:        BTreeMap<RuleId, f64>,
    pub cache_version: i64,
    pub updated_at:    Option<String>,
}

impl DerivedCacheEntry {
    pub fn missing(row_id: RowId) -> Self {
        Self { row_id, values: BTreeMap::new(), cache_version: 0, updated_at: None }
    }

    /// Missing values read as 0.
    pub fn value(&self, rule_id: RuleId) -> f64 {
        self.values.get(&rule_id).copied().unwrap_or(0.0)
    }
}

/// Pollable rebuild counters, shared with whoever reports progress.
#[derive(Debug, Default)]
pub struct RebuildProgress {
    processed: AtomicU64,
    total:     AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub processed:  u64,
    pub total:      u64,
    pub percentage: f64,
}

impl RebuildProgress {
    fn start(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
        self.processed.store(0, Ordering::SeqCst);
    }

    fn advance(&self, rows: u64) {
        self.processed.fetch_add(rows, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let processed = self.processed.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);
        let percentage = if total > 0 {
            (processed as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        ProgressSnapshot { processed, total, percentage }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub version: i64,
    pub rows:    u64,
    pub batches: u64,
}

pub struct DerivedCache {
    batch_size: usize,
    compiled:   Option<CompiledRuleSet>,
    progress:   Arc<RebuildProgress>,
}

impl DerivedCache {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            compiled:   None,
            progress:   Arc::new(RebuildProgress::default()),
        }
    }

    pub fn progress(&self) -> Arc<RebuildProgress> {
        Arc::clone(&self.progress)
    }

    /// Compiled active rules, recompiled only when their fingerprint moved.
    pub fn compiled_rules(&mut self, store: &FeeStore) -> FeeResult<&CompiledRuleSet> {
        let rules = store.active_rules()?;
        let current = fingerprint(&rules);
        let compiled = match self.compiled.take() {
            Some(c) if c.fingerprint() == current => c,
            _ => {
                let c = CompiledRuleSet::compile(&rules)?;
                log::debug!("Compiled {} computed fee rules ({})", c.rules().len(), c.fingerprint());
                c
            }
        };
        Ok(self.compiled.insert(compiled))
    }

    /// Active rule ids in evaluation order.
    pub fn active_rule_ids(&mut self, store: &FeeStore) -> FeeResult<Vec<RuleId>> {
        Ok(self.compiled_rules(store)?.rule_ids())
    }

    /// One row's cached values; a missing entry reads as zeros at version 0.
    pub fn entry(&self, store: &FeeStore, row_id: RowId) -> FeeResult<DerivedCacheEntry> {
        store.cache_entry(row_id)
    }

    pub fn current_version(&self, store: &FeeStore) -> FeeResult<i64> {
        Ok(store.cache_meta()?.version)
    }

    /// True when the cache was not built from the currently active rules.
    pub fn is_stale(&self, store: &FeeStore) -> FeeResult<bool> {
        let meta = store.cache_meta()?;
        let current = fingerprint(&store.active_rules()?);
        Ok(meta.rule_hash.as_deref() != Some(current.as_str()))
    }

    /// Rebuild when the active rule set changed since the last rebuild.
    pub fn ensure_fresh(&mut self, store: &FeeStore) -> FeeResult<Option<RebuildReport>> {
        if self.is_stale(store)? {
            log::info!("Derived cache is stale; rebuilding");
            return self.rebuild_all(store).map(Some);
        }
        Ok(None)
    }

    pub fn clear(&mut self, store: &FeeStore) -> FeeResult<()> {
        store.clear_cache()?;
        self.compiled = None;
        log::info!("Derived cache cleared");
        Ok(())
    }

    /// Recompute every row in fixed-size batches and bump the version.
    pub fn rebuild_all(&mut self, store: &FeeStore) -> FeeResult<RebuildReport> {
        let batch_size = self.batch_size;
        let progress = Arc::clone(&self.progress);
        let compiled = self.compiled_rules(store)?.clone();
        let rule_ids = compiled.rule_ids();
        let next_version = store.cache_meta()?.version + 1;

        store.ensure_cache_columns(&rule_ids)?;
        store.clear_cache()?;

        let total = store.row_count()?.max(0) as u64;
        progress.start(total);
        log::info!(
            "Rebuilding derived cache v{next_version}: {total} rows, {} rules, batch size {batch_size}",
            rule_ids.len()
        );

        let evaluator = RowEvaluator::new(&compiled);
        let mut last_id = RowId::MIN;
        let mut batches = 0u64;
        loop {
            let rows = store.rows_after(last_id, batch_size)?;
            let Some(last) = rows.last() else { break };
            last_id = last.row_id;

            let entries = evaluate_batch(&evaluator, &rows);
            store.write_cache_batch(&rule_ids, &entries, next_version, &now())?;
            batches += 1;
            progress.advance(rows.len() as u64);
            let snap = progress.snapshot();
            log::debug!(
                "Cache batch {batches}: {}/{} rows ({:.1}%)",
                snap.processed,
                snap.total,
                snap.percentage
            );
        }

        store.set_cache_meta(next_version, compiled.fingerprint(), &now())?;
        let rows = progress.snapshot().processed;
        log::info!("Derived cache v{next_version} rebuilt: {rows} rows in {batches} batches");
        Ok(RebuildReport { version: next_version, rows, batches })
    }

    /// Recompute only `row_ids` against the current rules. The version is
    /// left alone: the rule set is assumed unchanged.
    pub fn rebuild_for(&mut self, store: &FeeStore, row_ids: &[RowId]) -> FeeResult<u64> {
        let batch_size = self.batch_size;
        let compiled = self.compiled_rules(store)?.clone();
        let rule_ids = compiled.rule_ids();
        let version = store.cache_meta()?.version;
        store.ensure_cache_columns(&rule_ids)?;

        let evaluator = RowEvaluator::new(&compiled);
        let mut written = 0u64;
        for chunk in row_ids.chunks(batch_size) {
            let rows = store.rows_by_ids(chunk)?;
            let entries = evaluate_batch(&evaluator, &rows);
            store.write_cache_batch(&rule_ids, &entries, version, &now())?;
            written += rows.len() as u64;
        }
        log::debug!("Refreshed {written} cache rows at v{version}");
        Ok(written)
    }
}

fn evaluate_batch(evaluator: &RowEvaluator<'_>, rows: &[DataRow]) -> Vec<(RowId, Vec<(RuleId, f64)>)> {
    rows.iter()
        .map(|row| (row.row_id, evaluator.row_values(row)))
        .collect()
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
