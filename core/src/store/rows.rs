//! Fact rows. Read-only to calculations; inserts exist for loaders and tests.

use super::{sql::filter_sql, FeeStore};
use crate::{
    error::{FeeError, FeeResult},
    fields::{raw_fee_index, RAW_FEES, RAW_FEE_COUNT},
    model::{DataRow, ScenarioFilter},
    types::RowId,
};
use rusqlite::{params, params_from_iter, types::Value, Row};

const ID_CHUNK: usize = 500;

fn row_columns() -> String {
    let fees: Vec<String> = RAW_FEES.iter().map(|f| format!("r.{}", f.name)).collect();
    format!(
        "r.row_id, r.pid, r.producer_name, r.type, r.subtype, r.category, r.region, r.quantity, {}",
        fees.join(", ")
    )
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<DataRow> {
    let mut fees = [0.0; RAW_FEE_COUNT];
    for (i, fee) in fees.iter_mut().enumerate() {
        *fee = row.get(8 + i)?;
    }
    Ok(DataRow {
        row_id:        row.get(0)?,
        pid:           row.get(1)?,
        producer_name: row.get(2)?,
        row_type:      row.get(3)?,
        subtype:       row.get(4)?,
        category:      row.get(5)?,
        region:        row.get(6)?,
        quantity:      row.get(7)?,
        fees,
    })
}

impl FeeStore {
    pub fn insert_row(&self, row: &DataRow) -> FeeResult<()> {
        let fee_names: Vec<&str> = RAW_FEES.iter().map(|f| f.name).collect();
        let marks = vec!["?"; 8 + RAW_FEE_COUNT].join(", ");
        let sql = format!(
            "INSERT INTO fee_row (row_id, pid, producer_name, type, subtype, category, region, quantity, {})
             VALUES ({marks})",
            fee_names.join(", ")
        );
        let mut values: Vec<Value> = vec![
            Value::Integer(row.row_id),
            Value::Text(row.pid.clone()),
            Value::Text(row.producer_name.clone()),
            Value::Text(row.row_type.clone()),
            Value::Text(row.subtype.clone()),
            Value::Text(row.category.clone()),
            Value::Text(row.region.clone()),
            Value::Real(row.quantity),
        ];
        values.extend(row.fees.iter().map(|f| Value::Real(*f)));
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    /// Insert many rows in one transaction.
    pub fn insert_rows(&self, rows: &[DataRow]) -> FeeResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for row in rows {
            self.insert_row(row)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Overwrite one raw fee on a row (used by loaders when source data changes).
    pub fn update_row_fee(&self, row_id: RowId, fee: &str, value: f64) -> FeeResult<()> {
        let index = raw_fee_index(fee).ok_or_else(|| FeeError::UnknownField { field: fee.to_string() })?;
        let sql = format!(
            "UPDATE fee_row SET {} = ?1 WHERE row_id = ?2",
            RAW_FEES[index].name
        );
        self.conn.execute(&sql, params![value, row_id])?;
        Ok(())
    }

    pub fn row_count(&self) -> FeeResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM fee_row", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Highest row id in the table, 0 when empty.
    pub fn max_row_id(&self) -> FeeResult<RowId> {
        let max: RowId = self
            .conn
            .query_row("SELECT COALESCE(MAX(row_id), 0) FROM fee_row", [], |row| row.get(0))?;
        Ok(max)
    }

    /// Keyset page of rows with `row_id > after`, ascending.
    pub fn rows_after(&self, after: RowId, limit: usize) -> FeeResult<Vec<DataRow>> {
        let sql = format!(
            "SELECT {} FROM fee_row r WHERE r.row_id > ?1 ORDER BY r.row_id ASC LIMIT ?2",
            row_columns()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![after, limit as i64], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rows with the given ids, ascending. Unknown ids are skipped.
    pub fn rows_by_ids(&self, ids: &[RowId]) -> FeeResult<Vec<DataRow>> {
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let marks = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM fee_row r WHERE r.row_id IN ({marks}) ORDER BY r.row_id ASC",
                row_columns()
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            out.extend(rows);
        }
        Ok(out)
    }

    /// Every row under `filter`. Only the row-level reference engine
    /// materializes rows like this.
    pub fn rows_matching(&self, filter: &ScenarioFilter) -> FeeResult<Vec<DataRow>> {
        let where_ = filter_sql(filter);
        let sql = format!(
            "SELECT {} FROM fee_row r WHERE {} ORDER BY r.row_id ASC",
            row_columns(),
            where_.sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(where_.params), map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
