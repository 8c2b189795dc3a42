use super::FeeStore;
use crate::{
    condition::Condition,
    error::{FeeError, FeeResult},
    model::{parse_field_list, Policy, PolicyType, ScenarioPolicyBinding},
    types::{PolicyId, ScenarioId},
};
use rusqlite::{params, OptionalExtension, Row};

const POLICY_COLUMNS: &str =
    "p.id, p.name, p.type, p.field, p.condition, p.affects_direct, p.affects_inverse, p.default_value, p.group_id";

fn map_policy(row: &Row<'_>) -> rusqlite::Result<Policy> {
    let policy_type: String = row.get(2)?;
    let condition: Option<String> = row.get(4)?;
    let direct: String = row.get(5)?;
    let inverse: String = row.get(6)?;
    Ok(Policy {
        id:              row.get(0)?,
        name:            row.get(1)?,
        policy_type:     PolicyType::parse(&policy_type),
        field:           row.get(3)?,
        condition:       Condition::parse(condition.as_deref()),
        affects_direct:  parse_field_list(&direct),
        affects_inverse: parse_field_list(&inverse),
        default_value:   row.get(7)?,
        group_id:        row.get(8)?,
    })
}

impl FeeStore {
    // ── Policies ───────────────────────────────────────────────

    pub fn insert_policy(&self, policy: &Policy) -> FeeResult<()> {
        self.conn.execute(
            "INSERT INTO policy (id, name, type, field, condition, affects_direct,
                                 affects_inverse, default_value, group_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                policy.id,
                policy.name,
                policy.policy_type.as_str(),
                policy.field,
                policy.condition.to_stored(),
                policy.affects_direct.join(","),
                policy.affects_inverse.join(","),
                policy.default_value,
                policy.group_id,
            ],
        )?;
        Ok(())
    }

    /// Store raw condition text on a policy, bypassing parsing.
    pub fn set_policy_condition_text(&self, id: PolicyId, text: Option<&str>) -> FeeResult<()> {
        self.conn.execute(
            "UPDATE policy SET condition = ?1 WHERE id = ?2",
            params![text, id],
        )?;
        Ok(())
    }

    pub fn policy(&self, id: PolicyId) -> FeeResult<Option<Policy>> {
        let sql = format!("SELECT {POLICY_COLUMNS} FROM policy p WHERE p.id = ?1");
        let policy = self
            .conn
            .query_row(&sql, params![id], map_policy)
            .optional()?;
        Ok(policy)
    }

    pub fn all_policies(&self) -> FeeResult<Vec<Policy>> {
        let sql = format!("SELECT {POLICY_COLUMNS} FROM policy p ORDER BY p.id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let policies = stmt.query_map([], map_policy)?.collect::<Result<Vec<_>, _>>()?;
        Ok(policies)
    }

    // ── Scenarios ──────────────────────────────────────────────

    pub fn insert_scenario(&self, id: ScenarioId, name: &str) -> FeeResult<()> {
        self.conn.execute(
            "INSERT INTO scenario (id, name) VALUES (?1, ?2)",
            params![id, name],
        )?;
        Ok(())
    }

    /// Attach a policy to a scenario. `value` overrides the policy default.
    pub fn bind_policy(
        &self,
        scenario_id: ScenarioId,
        policy_id: PolicyId,
        execution_order: i64,
        value: Option<f64>,
    ) -> FeeResult<()> {
        self.conn.execute(
            "INSERT INTO scenario_policy (scenario_id, policy_id, execution_order, value)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(scenario_id, policy_id) DO UPDATE SET
                execution_order = excluded.execution_order,
                value = excluded.value",
            params![scenario_id, policy_id, execution_order, value],
        )?;
        Ok(())
    }

    /// The scenario's policies in execution order.
    pub fn scenario_bindings(&self, scenario_id: ScenarioId) -> FeeResult<Vec<ScenarioPolicyBinding>> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM scenario WHERE id = ?1",
                params![scenario_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(FeeError::UnknownScenario { scenario_id });
        }

        let sql = format!(
            "SELECT {POLICY_COLUMNS}, sp.execution_order, sp.value
             FROM scenario_policy sp
             JOIN policy p ON p.id = sp.policy_id
             WHERE sp.scenario_id = ?1
             ORDER BY sp.execution_order ASC, p.id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let bindings = stmt
            .query_map(params![scenario_id], |row| {
                let policy = map_policy(row)?;
                let order: i64 = row.get(9)?;
                let value: Option<f64> = row.get(10)?;
                let value = value.unwrap_or(policy.default_value);
                Ok(ScenarioPolicyBinding::new(policy, value, order))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bindings)
    }
}
