use super::FeeStore;
use crate::{
    condition::Condition,
    error::FeeResult,
    model::ComputedFeeRule,
    types::RuleId,
};
use rusqlite::{params, Row};

fn map_rule(row: &Row<'_>) -> rusqlite::Result<ComputedFeeRule> {
    let condition: Option<String> = row.get(5)?;
    Ok(ComputedFeeRule {
        id:        row.get(0)?,
        name:      row.get(1)?,
        priority:  row.get(2)?,
        active:    row.get::<_, i64>(3)? != 0,
        formula:   row.get(4)?,
        condition: Condition::parse(condition.as_deref()),
        group_id:  row.get(6)?,
    })
}

impl FeeStore {
    // ── Computed fee rules ─────────────────────────────────────

    pub fn insert_rule(&self, rule: &ComputedFeeRule) -> FeeResult<()> {
        self.conn.execute(
            "INSERT INTO computed_fee_rule (id, name, priority, active, formula, condition, group_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rule.id,
                rule.name,
                rule.priority,
                rule.active as i64,
                rule.formula,
                rule.condition.to_stored(),
                rule.group_id,
            ],
        )?;
        Ok(())
    }

    pub fn set_rule_active(&self, id: RuleId, active: bool) -> FeeResult<()> {
        self.conn.execute(
            "UPDATE computed_fee_rule SET active = ?1 WHERE id = ?2",
            params![active as i64, id],
        )?;
        Ok(())
    }

    pub fn update_rule_formula(&self, id: RuleId, formula: &str) -> FeeResult<()> {
        self.conn.execute(
            "UPDATE computed_fee_rule SET formula = ?1 WHERE id = ?2",
            params![formula, id],
        )?;
        Ok(())
    }

    /// Store raw condition text on a rule, bypassing parsing.
    pub fn set_rule_condition_text(&self, id: RuleId, text: Option<&str>) -> FeeResult<()> {
        self.conn.execute(
            "UPDATE computed_fee_rule SET condition = ?1 WHERE id = ?2",
            params![text, id],
        )?;
        Ok(())
    }

    /// Active rules ordered by (priority, id).
    pub fn active_rules(&self) -> FeeResult<Vec<ComputedFeeRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, priority, active, formula, condition, group_id
             FROM computed_fee_rule WHERE active = 1
             ORDER BY priority ASC, id ASC",
        )?;
        let rules = stmt.query_map([], map_rule)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    pub fn all_rules(&self) -> FeeResult<Vec<ComputedFeeRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, priority, active, formula, condition, group_id
             FROM computed_fee_rule ORDER BY priority ASC, id ASC",
        )?;
        let rules = stmt.query_map([], map_rule)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }
}
