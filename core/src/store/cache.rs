//! The derived-value cache table.
//!
//! `fee_cache` holds one `computed_fee<ID>` column per rule id ever cached.
//! Columns are added on demand and never dropped; rows and columns that
//! are missing read as 0.

use super::FeeStore;
use crate::{
    cache::DerivedCacheEntry,
    error::FeeResult,
    fields::{computed_fee_id, computed_fee_name},
    types::{RowId, RuleId},
};
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheMeta {
    pub version:    i64,
    pub rule_hash:  Option<String>,
    pub rebuilt_at: Option<String>,
}

impl FeeStore {
    /// Rule ids that currently have a cache column.
    pub fn cache_columns(&self) -> FeeResult<BTreeSet<RuleId>> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(fee_cache)")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names.iter().filter_map(|n| computed_fee_id(n)).collect())
    }

    pub fn ensure_cache_columns(&self, rule_ids: &[RuleId]) -> FeeResult<()> {
        let existing = self.cache_columns()?;
        for id in rule_ids.iter().filter(|id| !existing.contains(id)) {
            self.conn.execute_batch(&format!(
                "ALTER TABLE fee_cache ADD COLUMN {} REAL NOT NULL DEFAULT 0",
                computed_fee_name(*id)
            ))?;
            log::debug!("Added cache column {}", computed_fee_name(*id));
        }
        Ok(())
    }

    /// Drop every cache entry and forget which rule set they came from.
    pub fn clear_cache(&self) -> FeeResult<()> {
        self.conn.execute_batch(
            "DELETE FROM fee_cache;
             UPDATE cache_meta SET rule_hash = NULL WHERE id = 1;",
        )?;
        Ok(())
    }

    /// Upsert one batch of computed values inside a single transaction.
    /// Any failure rolls the whole batch back.
    pub fn write_cache_batch(
        &self,
        rule_ids: &[RuleId],
        entries: &[(RowId, Vec<(RuleId, f64)>)],
        version: i64,
        updated_at: &str,
    ) -> FeeResult<()> {
        let columns: Vec<String> = rule_ids.iter().map(|id| computed_fee_name(*id)).collect();
        let mut insert_cols = vec!["row_id", "cache_version", "updated_at"];
        insert_cols.extend(columns.iter().map(String::as_str));
        let marks = vec!["?"; insert_cols.len()].join(", ");
        let mut updates = vec![
            "cache_version = excluded.cache_version".to_string(),
            "updated_at = excluded.updated_at".to_string(),
        ];
        updates.extend(columns.iter().map(|c| format!("{c} = excluded.{c}")));
        let sql = format!(
            "INSERT INTO fee_cache ({}) VALUES ({marks})
             ON CONFLICT(row_id) DO UPDATE SET {}",
            insert_cols.join(", "),
            updates.join(", ")
        );

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for (row_id, values) in entries {
                let by_rule: BTreeMap<RuleId, f64> = values.iter().copied().collect();
                let mut bound: Vec<Value> = vec![
                    Value::Integer(*row_id),
                    Value::Integer(version),
                    Value::Text(updated_at.to_string()),
                ];
                bound.extend(
                    rule_ids
                        .iter()
                        .map(|id| Value::Real(by_rule.get(id).copied().unwrap_or(0.0))),
                );
                stmt.execute(params_from_iter(bound))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// One row's cache entry. A row without an entry reads as version 0
    /// with no values.
    pub fn cache_entry(&self, row_id: RowId) -> FeeResult<DerivedCacheEntry> {
        let mut stmt = self.conn.prepare("SELECT * FROM fee_cache WHERE row_id = ?1")?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let entry = stmt
            .query_row(params![row_id], |row| {
                let mut entry = DerivedCacheEntry::missing(row_id);
                for (i, name) in names.iter().enumerate() {
                    match name.as_str() {
                        "cache_version" => entry.cache_version = row.get(i)?,
                        "updated_at" => entry.updated_at = row.get(i)?,
                        other => {
                            if let Some(id) = computed_fee_id(other) {
                                let v: Option<f64> = row.get(i)?;
                                entry.values.insert(id, v.unwrap_or(0.0));
                            }
                        }
                    }
                }
                Ok(entry)
            })
            .optional()?;
        Ok(entry.unwrap_or_else(|| DerivedCacheEntry::missing(row_id)))
    }

    /// Cached values of `rule_ids` for every row in `row_ids`, 0 when missing.
    pub fn cache_values(
        &self,
        row_ids: &[RowId],
        rule_ids: &[RuleId],
    ) -> FeeResult<BTreeMap<RowId, BTreeMap<RuleId, f64>>> {
        let present = self.cache_columns()?;
        let cols: Vec<RuleId> = rule_ids.iter().copied().filter(|id| present.contains(id)).collect();
        let mut out: BTreeMap<RowId, BTreeMap<RuleId, f64>> = row_ids
            .iter()
            .map(|id| (*id, rule_ids.iter().map(|r| (*r, 0.0)).collect()))
            .collect();
        if cols.is_empty() {
            return Ok(out);
        }
        let select: Vec<String> = cols.iter().map(|id| computed_fee_name(*id)).collect();
        for chunk in row_ids.chunks(500) {
            let marks = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT row_id, {} FROM fee_cache WHERE row_id IN ({marks})",
                select.join(", ")
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                let row_id: RowId = row.get(0)?;
                let slot = out.entry(row_id).or_default();
                for (i, id) in cols.iter().enumerate() {
                    let v: Option<f64> = row.get(i + 1)?;
                    slot.insert(*id, v.unwrap_or(0.0));
                }
            }
        }
        Ok(out)
    }

    pub fn cache_entry_count(&self) -> FeeResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM fee_cache", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn cache_meta(&self) -> FeeResult<CacheMeta> {
        let meta = self
            .conn
            .query_row(
                "SELECT version, rule_hash, rebuilt_at FROM cache_meta WHERE id = 1",
                [],
                |row| {
                    Ok(CacheMeta {
                        version:    row.get(0)?,
                        rule_hash:  row.get(1)?,
                        rebuilt_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(meta.unwrap_or(CacheMeta { version: 0, rule_hash: None, rebuilt_at: None }))
    }

    /// Record a completed full rebuild.
    pub fn set_cache_meta(&self, version: i64, rule_hash: &str, rebuilt_at: &str) -> FeeResult<()> {
        self.conn.execute(
            "INSERT INTO cache_meta (id, version, rule_hash, rebuilt_at) VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                rule_hash = excluded.rule_hash,
                rebuilt_at = excluded.rebuilt_at",
            params![version, rule_hash, rebuilt_at],
        )?;
        Ok(())
    }
}
