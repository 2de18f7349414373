//! Dependency graph resolution: turning a plan into a safe deployment order.

use std::collections::{BTreeMap, BTreeSet};

use alloy_core::primitives::Address;

use crate::catalog::ContractSpecCatalog;
use crate::error::{OrchestrateError, Result};
use crate::plan::{DeploymentPlan, InstanceId, ParamBinding, effective_bindings};

/// Output of dependency resolution.
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    /// Instance identifiers in an order safe to deploy sequentially.
    /// Units already confirmed in the address book are excluded.
    pub order: Vec<InstanceId>,
    /// Direct dependents among the ordered units, keyed by dependency.
    /// Used to skip downstream units when a dependency fails.
    pub dependents: BTreeMap<InstanceId, Vec<InstanceId>>,
    /// Plan units skipped because the address book already confirms them.
    pub already_confirmed: Vec<InstanceId>,
}

/// Resolve a plan against the catalog and the confirmed address-book state.
///
/// Builds the reference graph and runs Kahn's algorithm over the units that
/// still need deployment. Ties between unconstrained units preserve the
/// plan's declaration order, which keeps resolution deterministic across
/// runs and makes resumed deployments reproducible.
pub fn resolve(
    plan: &DeploymentPlan,
    catalog: &ContractSpecCatalog,
    confirmed: &BTreeMap<InstanceId, Address>,
) -> Result<ResolvedPlan> {
    let plan_ids: BTreeSet<&InstanceId> = plan.units.iter().map(|u| &u.id).collect();

    let mut already_confirmed = Vec::new();
    let mut pending = Vec::new();
    for unit in &plan.units {
        if confirmed.contains_key(&unit.id) {
            already_confirmed.push(unit.id.clone());
        } else {
            pending.push(unit);
        }
    }
    let pending_ids: BTreeSet<&InstanceId> = pending.iter().map(|u| &u.id).collect();

    // Edge dependency -> dependent, counted once per distinct reference.
    let mut in_degree: BTreeMap<&InstanceId, usize> =
        pending.iter().map(|u| (&u.id, 0)).collect();
    let mut dependents: BTreeMap<InstanceId, Vec<InstanceId>> = BTreeMap::new();
    let mut deps_of: BTreeMap<InstanceId, BTreeSet<InstanceId>> = BTreeMap::new();

    for unit in &plan.units {
        let spec = catalog.resolve_spec(&unit.contract)?;
        let mut seen_refs = BTreeSet::new();
        for binding in effective_bindings(unit, spec) {
            let ParamBinding::Reference { r#ref } = binding else {
                continue;
            };
            let known = plan_ids.contains(&r#ref)
                || confirmed.contains_key(&r#ref)
                || plan.seeds.contains_key(&r#ref);
            if !known {
                return Err(OrchestrateError::UnresolvedReference {
                    unit: unit.id.clone(),
                    reference: r#ref,
                });
            }
            // Only references between still-pending plan units constrain
            // the order; everything else already has an address.
            if !pending_ids.contains(&unit.id) || !pending_ids.contains(&r#ref) {
                continue;
            }
            if !seen_refs.insert(r#ref.clone()) {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(&unit.id) {
                *degree += 1;
            }
            dependents
                .entry(r#ref.clone())
                .or_default()
                .push(unit.id.clone());
            deps_of
                .entry(unit.id.clone())
                .or_default()
                .insert(r#ref.clone());
        }
    }

    // Kahn's algorithm with a stable tie-break: each round emits the first
    // unit in declaration order whose dependencies are all satisfied.
    let mut emitted: BTreeSet<&InstanceId> = BTreeSet::new();
    let mut order = Vec::with_capacity(pending.len());
    loop {
        let next = pending.iter().find(|u| {
            !emitted.contains(&u.id) && in_degree.get(&u.id).copied().unwrap_or(0) == 0
        });
        let Some(unit) = next else { break };
        emitted.insert(&unit.id);
        order.push(unit.id.clone());
        if let Some(downstream) = dependents.get(&unit.id) {
            for dependent in downstream {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                }
            }
        }
    }

    if order.len() < pending.len() {
        let members = cycle_members(&pending, &emitted, &deps_of);
        return Err(OrchestrateError::CyclicDependency { members });
    }

    tracing::debug!(
        network = %plan.network,
        order = ?order.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
        skipped = already_confirmed.len(),
        "Deployment order resolved"
    );

    Ok(ResolvedPlan {
        order,
        dependents,
        already_confirmed,
    })
}

/// Isolate the units that actually sit on a cycle.
///
/// Every unit left unemitted has an unmet dependency, but units strictly
/// downstream of a cycle are not themselves cyclic. Trimming nodes that no
/// remaining node depends on, until a fixpoint, leaves the cycle members.
fn cycle_members(
    pending: &[&crate::plan::DeploymentUnit],
    emitted: &BTreeSet<&InstanceId>,
    deps_of: &BTreeMap<InstanceId, BTreeSet<InstanceId>>,
) -> Vec<InstanceId> {
    let mut remaining: BTreeSet<&InstanceId> = pending
        .iter()
        .map(|u| &u.id)
        .filter(|id| !emitted.contains(*id))
        .collect();

    loop {
        let depended_on: BTreeSet<&InstanceId> = remaining
            .iter()
            .flat_map(|id| deps_of.get(*id).into_iter().flatten())
            .filter(|dep| remaining.contains(*dep))
            .collect();
        let trimmed: BTreeSet<&InstanceId> = remaining
            .iter()
            .filter(|id| depended_on.contains(*id))
            .copied()
            .collect();
        if trimmed.len() == remaining.len() {
            break;
        }
        remaining = trimmed;
    }

    // Report members in declaration order for a stable message.
    pending
        .iter()
        .map(|u| &u.id)
        .filter(|id| remaining.contains(*id))
        .map(|id| (*id).clone())
        .collect()
}

/// All transitive dependents of `root` within the resolved graph.
pub fn transitive_dependents(
    dependents: &BTreeMap<InstanceId, Vec<InstanceId>>,
    root: &InstanceId,
) -> BTreeSet<InstanceId> {
    let mut result = BTreeSet::new();
    let mut stack = vec![root.clone()];
    while let Some(current) = stack.pop() {
        for dependent in dependents.get(&current).into_iter().flatten() {
            if result.insert(dependent.clone()) {
                stack.push(dependent.clone());
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ContractSpec;
    use crate::plan::DeploymentUnit;

    fn catalog_for(names: &[&str]) -> ContractSpecCatalog {
        let mut catalog = ContractSpecCatalog::new();
        for name in names {
            catalog
                .register(ContractSpec {
                    name: name.to_string(),
                    bytecode: "0x6001".to_string(),
                    params: vec![],
                })
                .unwrap();
        }
        catalog
    }

    fn unit(id: &str, refs: &[&str]) -> DeploymentUnit {
        DeploymentUnit {
            id: InstanceId::from(id),
            contract: "Widget".to_string(),
            params: refs
                .iter()
                .map(|r| ParamBinding::Reference {
                    r#ref: InstanceId::from(*r),
                })
                .collect(),
        }
    }

    fn plan_of(units: Vec<DeploymentUnit>) -> DeploymentPlan {
        DeploymentPlan {
            network: "test".to_string(),
            seeds: BTreeMap::new(),
            units,
        }
    }

    #[test]
    fn test_references_order_before_dependents() {
        let plan = plan_of(vec![
            unit("router", &["pool", "token"]),
            unit("pool", &["token"]),
            unit("token", &[]),
        ]);
        let resolved = resolve(&plan, &catalog_for(&["Widget"]), &BTreeMap::new()).unwrap();

        let position = |id: &str| {
            resolved
                .order
                .iter()
                .position(|i| i.as_str() == id)
                .unwrap()
        };
        assert!(position("token") < position("pool"));
        assert!(position("pool") < position("router"));
        assert!(position("token") < position("router"));
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        // Y and X are independent; declaration order must be preserved.
        let plan = plan_of(vec![unit("y", &[]), unit("x", &[])]);
        let resolved = resolve(&plan, &catalog_for(&["Widget"]), &BTreeMap::new()).unwrap();

        assert_eq!(
            resolved.order,
            vec![InstanceId::from("y"), InstanceId::from("x")]
        );
    }

    #[test]
    fn test_cycle_is_detected_and_named() {
        let plan = plan_of(vec![
            unit("a", &["b"]),
            unit("b", &["a"]),
            unit("downstream", &["a"]),
        ]);
        let err = resolve(&plan, &catalog_for(&["Widget"]), &BTreeMap::new()).unwrap_err();

        let OrchestrateError::CyclicDependency { members } = err else {
            panic!("expected CyclicDependency, got {err}");
        };
        assert_eq!(members, vec![InstanceId::from("a"), InstanceId::from("b")]);
    }

    #[test]
    fn test_unresolved_reference_names_the_missing_id() {
        let plan = plan_of(vec![unit("b", &["c"])]);
        let err = resolve(&plan, &catalog_for(&["Widget"]), &BTreeMap::new()).unwrap_err();

        let OrchestrateError::UnresolvedReference { unit, reference } = err else {
            panic!("expected UnresolvedReference, got {err}");
        };
        assert_eq!(unit, InstanceId::from("b"));
        assert_eq!(reference, InstanceId::from("c"));
    }

    #[test]
    fn test_seeded_references_resolve() {
        let mut plan = plan_of(vec![unit("pool", &["usdt"])]);
        plan.seeds.insert(
            InstanceId::from("usdt"),
            "0x55d398326f99059fF775485246999027B3197955"
                .parse()
                .unwrap(),
        );

        let resolved = resolve(&plan, &catalog_for(&["Widget"]), &BTreeMap::new()).unwrap();
        assert_eq!(resolved.order, vec![InstanceId::from("pool")]);
    }

    #[test]
    fn test_confirmed_units_are_excluded_but_addressable() {
        let plan = plan_of(vec![unit("token", &[]), unit("pool", &["token"])]);
        let confirmed = BTreeMap::from([(
            InstanceId::from("token"),
            "0x0000000000000000000000000000000000000001"
                .parse()
                .unwrap(),
        )]);

        let resolved = resolve(&plan, &catalog_for(&["Widget"]), &confirmed).unwrap();
        assert_eq!(resolved.order, vec![InstanceId::from("pool")]);
        assert_eq!(resolved.already_confirmed, vec![InstanceId::from("token")]);
    }

    #[test]
    fn test_unknown_contract_fails_before_ordering() {
        let mut u = unit("pool", &[]);
        u.contract = "Missing".to_string();
        let err = resolve(
            &plan_of(vec![u]),
            &catalog_for(&["Widget"]),
            &BTreeMap::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "UnknownSpec");
    }

    #[test]
    fn test_transitive_dependents() {
        let plan = plan_of(vec![
            unit("token", &[]),
            unit("pool", &["token"]),
            unit("router", &["pool"]),
            unit("other", &[]),
        ]);
        let resolved = resolve(&plan, &catalog_for(&["Widget"]), &BTreeMap::new()).unwrap();

        let downstream = transitive_dependents(&resolved.dependents, &InstanceId::from("token"));
        assert_eq!(
            downstream,
            BTreeSet::from([InstanceId::from("pool"), InstanceId::from("router")])
        );
    }
}
