//! Dependency ordering for computed fee rules.
//!
//! A rule depends on every other rule in the same set whose
//! `computed_fee<ID>` name appears in its formula. References to rules
//! outside the set are ignored here and evaluate to 0 later.

use crate::{
    error::{FeeError, FeeResult},
    fields::computed_fee_id,
    formula::Formula,
    model::ComputedFeeRule,
    types::RuleId,
};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

/// Rule ids referenced by `formula` that are members of `known`.
pub fn extract_dependencies(formula: &str, known: &BTreeSet<RuleId>) -> Vec<RuleId> {
    let mut deps = Vec::new();
    for token in formula.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_')) {
        if let Some(id) = computed_fee_id(token) {
            if known.contains(&id) && !deps.contains(&id) {
                deps.push(id);
            }
        }
    }
    deps
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

/// Order `rules` so that every rule follows all rules it depends on.
///
/// Roots are visited in ascending (priority, id); dependencies of a rule
/// are visited in the same order. Fails on the first back-edge found.
pub fn resolve(rules: &[ComputedFeeRule]) -> FeeResult<Vec<ComputedFeeRule>> {
    let known: BTreeSet<RuleId> = rules.iter().map(|r| r.id).collect();
    let by_id: HashMap<RuleId, &ComputedFeeRule> = rules.iter().map(|r| (r.id, r)).collect();

    let mut seeds: Vec<&ComputedFeeRule> = rules.iter().collect();
    seeds.sort_by_key(|r| (r.priority, r.id));

    let deps: HashMap<RuleId, Vec<RuleId>> = rules
        .iter()
        .map(|r| {
            let mut d = extract_dependencies(&r.formula, &known);
            d.sort_by_key(|id| (by_id[id].priority, *id));
            (r.id, d)
        })
        .collect();

    let mut marks: HashMap<RuleId, Mark> = HashMap::new();
    let mut ordered = Vec::with_capacity(rules.len());
    for seed in seeds {
        visit(seed.id, &deps, &mut marks, &mut ordered)?;
    }

    Ok(ordered.into_iter().map(|id| by_id[&id].clone()).collect())
}

fn visit(
    id: RuleId,
    deps: &HashMap<RuleId, Vec<RuleId>>,
    marks: &mut HashMap<RuleId, Mark>,
    ordered: &mut Vec<RuleId>,
) -> FeeResult<()> {
    match marks.get(&id) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::OnStack) => return Err(FeeError::CircularDependency { rule_id: id }),
        None => {}
    }
    marks.insert(id, Mark::OnStack);
    for dep in deps.get(&id).map(Vec::as_slice).unwrap_or_default() {
        visit(*dep, deps, marks, ordered)?;
    }
    marks.insert(id, Mark::Done);
    ordered.push(id);
    Ok(())
}

/// `sha256:<hex>` over the parts of each rule that affect its output.
pub fn fingerprint(rules: &[ComputedFeeRule]) -> String {
    let mut sorted: Vec<&ComputedFeeRule> = rules.iter().collect();
    sorted.sort_by_key(|r| r.id);
    let mut hasher = Sha256::new();
    for r in sorted {
        let line = format!(
            "{}|{}|{}|{}|{}\n",
            r.id,
            r.priority,
            r.active,
            r.formula,
            r.condition.to_stored().unwrap_or_default(),
        );
        hasher.update(line.as_bytes());
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule:    ComputedFeeRule,
    /// None when the formula does not parse; the rule then yields 0.
    pub formula: Option<Formula>,
}

/// Rules in evaluation order with formulas parsed once.
///
/// Keyed by the fingerprint of the rules it was built from; a formula edit
/// changes the fingerprint, so the owner replaces the whole set.
#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    fingerprint: String,
    rules:       Vec<CompiledRule>,
}

impl CompiledRuleSet {
    pub fn compile(rules: &[ComputedFeeRule]) -> FeeResult<Self> {
        let ordered = resolve(rules)?;
        let compiled = ordered
            .into_iter()
            .map(|rule| {
                let formula = match Formula::parse(&rule.formula) {
                    Ok(f) => Some(f),
                    Err(e) => {
                        log::warn!("Computed fee rule {} has an invalid formula: {e}", rule.id);
                        None
                    }
                };
                CompiledRule { rule, formula }
            })
            .collect();
        Ok(Self { fingerprint: fingerprint(rules), rules: compiled })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Rule ids in evaluation order.
    pub fn rule_ids(&self) -> Vec<RuleId> {
        self.rules.iter().map(|c| c.rule.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;

    fn rule(id: RuleId, priority: i64, formula: &str) -> ComputedFeeRule {
        ComputedFeeRule {
            id,
            name: format!("rule {id}"),
            priority,
            active: true,
            formula: formula.into(),
            condition: Condition::always(),
            group_id: None,
        }
    }

    fn ids(rules: &[ComputedFeeRule]) -> Vec<RuleId> {
        rules.iter().map(|r| r.id).collect()
    }

    #[test]
    fn independent_rules_follow_priority() {
        let rules = vec![rule(1, 30, "fee1"), rule(2, 10, "fee2"), rule(3, 20, "fee3")];
        assert_eq!(ids(&resolve(&rules).unwrap()), vec![2, 3, 1]);
    }

    #[test]
    fn dependencies_come_first_regardless_of_priority() {
        let rules = vec![
            rule(1, 1, "computed_fee2 * 2"),
            rule(2, 5, "computed_fee3 + fee1"),
            rule(3, 9, "fee4"),
            rule(4, 2, "fee5"),
        ];
        let order = ids(&resolve(&rules).unwrap());
        assert_eq!(order, vec![3, 2, 1, 4]);
    }

    #[test]
    fn dangling_references_are_not_dependencies() {
        let known: BTreeSet<RuleId> = [1, 2].into_iter().collect();
        assert_eq!(extract_dependencies("computed_fee2 + computed_fee9 + computed_fee2", &known), vec![2]);
        let rules = vec![rule(1, 1, "computed_fee99 + fee1")];
        assert_eq!(ids(&resolve(&rules).unwrap()), vec![1]);
    }

    #[test]
    fn cycles_are_reported() {
        let rules = vec![
            rule(1, 1, "computed_fee2"),
            rule(2, 2, "computed_fee3"),
            rule(3, 3, "computed_fee1"),
        ];
        match resolve(&rules) {
            Err(FeeError::CircularDependency { rule_id }) => assert_eq!(rule_id, 1),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let rules = vec![rule(5, 1, "computed_fee5 + 1")];
        assert!(matches!(
            resolve(&rules),
            Err(FeeError::CircularDependency { rule_id: 5 })
        ));
    }

    #[test]
    fn fingerprint_tracks_formula_edits() {
        let a = vec![rule(1, 1, "fee1 * 0.1"), rule(2, 2, "fee2")];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        b[0].formula = "fee2 * 2".into();
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert!(fingerprint(&a).starts_with("sha256:"));
    }

    #[test]
    fn equal_priorities_resolve_by_id() {
        let rules = vec![rule(3, 5, "fee1"), rule(1, 5, "fee2"), rule(2, 5, "fee3")];
        assert_eq!(ids(&resolve(&rules).unwrap()), vec![1, 2, 3]);

        // A dependency still jumps the tie-break.
        let rules = vec![rule(3, 5, "fee1"), rule(1, 5, "computed_fee3"), rule(2, 5, "fee3")];
        assert_eq!(ids(&resolve(&rules).unwrap()), vec![3, 1, 2]);
    }

    #[test]
    fn random_dags_resolve_after_every_dependency() {
        use rand::{seq::SliceRandom, Rng, SeedableRng};
        use rand_pcg::Pcg64;

        for seed in 0..25u64 {
            let mut rng = Pcg64::seed_from_u64(seed);
            let n = rng.gen_range(2..30);
            let mut topo: Vec<RuleId> = (1..=n).collect();
            topo.shuffle(&mut rng);

            // Rules only reference rules earlier in `topo`, so the graph is acyclic.
            let mut deps: HashMap<RuleId, Vec<RuleId>> = HashMap::new();
            let mut rules = Vec::new();
            for (k, id) in topo.iter().enumerate() {
                let d: Vec<RuleId> = topo[..k].iter().copied().filter(|_| rng.gen_bool(0.2)).collect();
                let formula = if d.is_empty() {
                    "fee1".to_string()
                } else {
                    d.iter().map(|dep| format!("computed_fee{dep}")).collect::<Vec<_>>().join(" + ")
                };
                rules.push(rule(*id, rng.gen_range(0..4), &formula));
                deps.insert(*id, d);
            }

            let order = ids(&resolve(&rules).unwrap());
            assert_eq!(order.len(), rules.len(), "seed {seed}");
            let position: HashMap<RuleId, usize> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
            for (id, ds) in &deps {
                for dep in ds {
                    assert!(position[dep] < position[id], "seed {seed}: {dep} must precede {id}");
                }
            }

            // Input order does not matter.
            rules.shuffle(&mut rng);
            assert_eq!(ids(&resolve(&rules).unwrap()), order, "seed {seed}");
        }
    }

    #[test]
    fn invalid_formulas_compile_to_none() {
        let set = CompiledRuleSet::compile(&[rule(1, 1, "fee1 +")]).unwrap();
        assert!(set.rules()[0].formula.is_none());
    }
}
