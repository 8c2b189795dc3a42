//! SQL fragments with positional parameters.
//!
//! Column names only ever come from the field catalogue; every literal
//! travels as a bound parameter.

use crate::{
    condition::Condition,
    fields::{Attribute, RAW_FEES},
    model::ScenarioFilter,
    scenario::plan::FieldAdjustment,
};
use rusqlite::types::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql:    String,
    pub params: Vec<Value>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new() }
    }

    pub fn with(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self { sql: sql.into(), params }
    }

    /// Conjunction of `parts`; `1` when there are none.
    pub fn and(parts: Vec<SqlFragment>) -> Self {
        if parts.is_empty() {
            return Self::new("1");
        }
        let mut sql = Vec::with_capacity(parts.len());
        let mut params = Vec::new();
        for p in parts {
            sql.push(format!("({})", p.sql));
            params.extend(p.params);
        }
        Self { sql: sql.join(" AND "), params }
    }
}

pub fn filter_sql(filter: &ScenarioFilter) -> SqlFragment {
    let parts = filter
        .constraints()
        .into_iter()
        .map(|(attr, values)| {
            let marks = vec!["?"; values.len()].join(", ");
            SqlFragment::with(
                format!("{} IN ({marks})", attr.column()),
                values.iter().map(|v| Value::Text(v.clone())).collect(),
            )
        })
        .collect();
    SqlFragment::and(parts)
}

/// Unknown keys and malformed conditions render as `0` (never true).
pub fn condition_sql(condition: &Condition) -> SqlFragment {
    match condition {
        Condition::Malformed { .. } => SqlFragment::new("0"),
        Condition::Clauses(clauses) => SqlFragment::and(
            clauses
                .iter()
                .map(|c| match Attribute::from_key(&c.key) {
                    Some(attr) => SqlFragment::with(
                        format!("{} = ?", attr.column()),
                        vec![Value::Text(c.value.clone())],
                    ),
                    None => SqlFragment::new("0"),
                })
                .collect(),
        ),
    }
}

/// The current per-row value of raw fee `index` after `adjustments`.
///
/// Each adjustment wraps the previous expression exactly once, so the SQL
/// grows linearly with the number of steps on the field.
pub fn field_expr(index: usize, adjustments: &[FieldAdjustment]) -> SqlFragment {
    let mut expr = SqlFragment::new(format!("r.{}", RAW_FEES[index].name));
    for adj in adjustments {
        expr = match adj {
            FieldAdjustment::Scale { condition: None, factor } => {
                let mut params = expr.params;
                params.push(Value::Real(*factor));
                SqlFragment::with(format!("({}) * ?", expr.sql), params)
            }
            FieldAdjustment::Scale { condition: Some(cond), factor } => {
                let cond = condition_sql(cond);
                let mut params = expr.params;
                params.extend(cond.params);
                params.push(Value::Real(*factor));
                SqlFragment::with(
                    format!("({}) * (CASE WHEN {} THEN ? ELSE 1 END)", expr.sql, cond.sql),
                    params,
                )
            }
            FieldAdjustment::PerUnit { condition: None, value } => {
                SqlFragment::with("r.quantity * ?", vec![Value::Real(*value)])
            }
            FieldAdjustment::PerUnit { condition: Some(cond), value } => {
                let cond = condition_sql(cond);
                let mut params = cond.params;
                params.push(Value::Real(*value));
                params.extend(expr.params);
                SqlFragment::with(
                    format!("CASE WHEN {} THEN r.quantity * ? ELSE ({}) END", cond.sql, expr.sql),
                    params,
                )
            }
        };
    }
    expr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_is_true() {
        assert_eq!(filter_sql(&ScenarioFilter::all()).sql, "1");
    }

    #[test]
    fn filter_binds_every_value() {
        let filter = ScenarioFilter {
            pids: vec!["P1".into(), "P2".into()],
            types: vec!["X".into()],
            ..ScenarioFilter::default()
        };
        let frag = filter_sql(&filter);
        assert_eq!(frag.sql, "(r.pid IN (?, ?)) AND (r.type IN (?))");
        assert_eq!(frag.params.len(), 3);
    }

    #[test]
    fn unknown_condition_keys_never_match() {
        let frag = condition_sql(&Condition::from_pairs(&[("type", "X"), ("colour", "red")]));
        assert_eq!(frag.sql, "(0) AND (r.type = ?)");
        assert_eq!(condition_sql(&Condition::parse(Some("{bad"))).sql, "0");
    }

    #[test]
    fn stacked_adjustments_nest_once_each() {
        let adjustments = vec![
            FieldAdjustment::Scale { condition: None, factor: 0.5 },
            FieldAdjustment::PerUnit {
                condition: Some(Condition::from_pairs(&[("type", "X")])),
                value:     2.0,
            },
        ];
        let frag = field_expr(0, &adjustments);
        assert_eq!(
            frag.sql,
            "CASE WHEN (r.type = ?) THEN r.quantity * ? ELSE ((r.fee1) * ?) END"
        );
        assert_eq!(
            frag.params,
            vec![Value::Text("X".into()), Value::Real(2.0), Value::Real(0.5)]
        );
    }
}
