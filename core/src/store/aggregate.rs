//! Set-aggregate queries for the scenario engines.
//!
//! None of these materialize rows: every figure comes back from SQLite
//! as a SUM or COUNT, optionally grouped by producer.

use super::{
    sql::{condition_sql, filter_sql, SqlFragment},
    FeeStore,
};
use crate::{
    condition::Condition,
    error::FeeResult,
    fields::{computed_fee_name, RAW_FEES, RAW_FEE_COUNT},
    model::ScenarioFilter,
    totals::FeeTotals,
    types::{Pid, RuleId},
};
use rusqlite::{params_from_iter, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Baseline totals of one producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerTotals {
    pub pid:           Pid,
    pub producer_name: String,
    pub totals:        FeeTotals,
}

impl FeeStore {
    /// Select-list of COUNT, 17 raw sums and one sum per cached rule.
    /// Rules without a cache column are omitted (they total 0).
    fn totals_select(&self, rule_ids: &[RuleId]) -> FeeResult<(String, Vec<RuleId>)> {
        let present = self.cache_columns()?;
        let cached: Vec<RuleId> = rule_ids.iter().copied().filter(|id| present.contains(id)).collect();
        let mut cols = vec!["COUNT(*)".to_string()];
        cols.extend(
            RAW_FEES
                .iter()
                .map(|f| format!("COALESCE(SUM(r.{}), 0)", f.name)),
        );
        cols.extend(
            cached
                .iter()
                .map(|id| format!("COALESCE(SUM(c.{}), 0)", computed_fee_name(*id))),
        );
        Ok((cols.join(", "), cached))
    }

    /// Baseline: row count, raw sums and cached computed sums under `filter`.
    pub fn aggregate_totals(&self, filter: &ScenarioFilter, rule_ids: &[RuleId]) -> FeeResult<FeeTotals> {
        let (select, cached) = self.totals_select(rule_ids)?;
        let where_ = filter_sql(filter);
        let sql = format!(
            "SELECT {select}
             FROM fee_row r LEFT JOIN fee_cache c ON c.row_id = r.row_id
             WHERE {}",
            where_.sql
        );
        let totals = self.conn.query_row(&sql, params_from_iter(where_.params), |row| {
            read_totals(row, 0, rule_ids, &cached)
        })?;
        Ok(totals)
    }

    /// Baseline per producer, ordered by pid, in one grouped pass.
    pub fn grouped_totals(
        &self,
        filter: &ScenarioFilter,
        rule_ids: &[RuleId],
    ) -> FeeResult<Vec<ProducerTotals>> {
        let (select, cached) = self.totals_select(rule_ids)?;
        let where_ = filter_sql(filter);
        let sql = format!(
            "SELECT r.pid, MAX(r.producer_name), {select}
             FROM fee_row r LEFT JOIN fee_cache c ON c.row_id = r.row_id
             WHERE {}
             GROUP BY r.pid
             ORDER BY r.pid ASC",
            where_.sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let groups = stmt
            .query_map(params_from_iter(where_.params), |row| {
                Ok(ProducerTotals {
                    pid:           row.get(0)?,
                    producer_name: row.get(1)?,
                    totals:        read_totals(row, 2, rule_ids, &cached)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    /// SUM(`expr`) over rows under `filter` that satisfy `condition`.
    pub fn sum_where(
        &self,
        filter: &ScenarioFilter,
        condition: &Condition,
        expr: &SqlFragment,
    ) -> FeeResult<f64> {
        let scope = SqlFragment::and(vec![filter_sql(filter), condition_sql(condition)]);
        let sql = format!(
            "SELECT COALESCE(SUM({}), 0) FROM fee_row r WHERE {}",
            expr.sql, scope.sql
        );
        let mut bound = expr.params.clone();
        bound.extend(scope.params);
        let total: f64 = self
            .conn
            .query_row(&sql, params_from_iter(bound), |row| row.get(0))?;
        Ok(total)
    }

    /// Like [`FeeStore::sum_where`], grouped by producer. Producers with no
    /// matching rows are absent from the map.
    pub fn sum_where_by_group(
        &self,
        filter: &ScenarioFilter,
        condition: &Condition,
        expr: &SqlFragment,
    ) -> FeeResult<HashMap<Pid, f64>> {
        let scope = SqlFragment::and(vec![filter_sql(filter), condition_sql(condition)]);
        let sql = format!(
            "SELECT r.pid, COALESCE(SUM({}), 0) FROM fee_row r WHERE {} GROUP BY r.pid",
            expr.sql, scope.sql
        );
        let mut bound = expr.params.clone();
        bound.extend(scope.params);
        let mut stmt = self.conn.prepare(&sql)?;
        let sums = stmt
            .query_map(params_from_iter(bound), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(sums)
    }
}

fn read_totals(
    row: &Row<'_>,
    offset: usize,
    rule_ids: &[RuleId],
    cached: &[RuleId],
) -> rusqlite::Result<FeeTotals> {
    let mut totals = FeeTotals::zero(rule_ids);
    totals.row_count = row.get(offset)?;
    for i in 0..RAW_FEE_COUNT {
        totals.raw[i] = row.get(offset + 1 + i)?;
    }
    for (i, id) in cached.iter().enumerate() {
        totals.computed.insert(*id, row.get(offset + 1 + RAW_FEE_COUNT + i)?);
    }
    Ok(totals)
}
