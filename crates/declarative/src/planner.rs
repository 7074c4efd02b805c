//! Execution planner - diffs the declared graph against recorded state
//!
//! Nodes are visited in dependency order so every reference can be resolved
//! against what the plan already decided for its target: values of resources
//! that will be created or replaced are unknown until apply, everything else
//! comes from state.

use crate::diff::{AttributeDiff, PlanSummary, compare};
use crate::error::{Error, Result};
use crate::expr::{Planned, Reference};
use crate::graph::{Graph, topological_sort};
use crate::state::{State, StateRecord};
use crate::types::{Address, ChangeOp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// What kind of run the plan is for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    /// Converge state to the declarations
    #[default]
    Apply,
    /// Destroy everything in state
    Destroy,
}

/// Options for planning
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub mode: PlanMode,
    /// Limit the plan to these resources and whatever they need
    pub targets: Vec<Address>,
}

/// Planned change for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub address: Address,
    pub op: ChangeOp,
    /// Why the planner chose this operation
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diffs: Vec<AttributeDiff>,
    /// Remote id of the existing object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Declared dependencies of the new object
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Address>,
    /// Recorded dependencies of the existing object
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prior_dependencies: Vec<Address>,
}

impl Change {
    /// Whether applying this change deletes an existing object
    pub fn destroys(&self) -> bool {
        matches!(self.op, ChangeOp::Destroy | ChangeOp::Replace)
    }

    /// Whether applying this change creates or updates an object
    pub fn builds(&self) -> bool {
        matches!(
            self.op,
            ChangeOp::Create | ChangeOp::Update | ChangeOp::Replace
        )
    }
}

/// Ordered change-set
///
/// Destroys come first in reverse dependency order, then everything else in
/// forward dependency order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub mode: PlanMode,
    pub changes: Vec<Change>,
}

impl ExecutionPlan {
    /// Changes that touch the provider
    pub fn actionable(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| c.op.is_change())
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.actionable().next().is_some()
    }

    /// Look up the change for an address
    pub fn change(&self, address: &Address) -> Option<&Change> {
        self.changes.iter().find(|c| &c.address == address)
    }

    /// Count changes by operation
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            summary.add(change.op);
        }
        summary
    }
}

/// Build the change-set that converges `state` to `graph`
pub fn plan(graph: &Graph, state: &State, opts: &PlanOptions) -> Result<ExecutionPlan> {
    for target in &opts.targets {
        if !graph.contains(target) && state.get(target).is_none() {
            return Err(Error::UnknownTarget(target.to_string()));
        }
    }
    let plan = match opts.mode {
        PlanMode::Apply => plan_apply(graph, state, &opts.targets)?,
        PlanMode::Destroy => plan_destroy(graph, state, &opts.targets)?,
    };

    // Creating again what an interrupted create may have made would leave a
    // duplicate behind
    let blocked: Vec<String> = plan
        .changes
        .iter()
        .filter(|c| c.op == ChangeOp::Create && state.pending.contains_key(&c.address))
        .map(|c| c.address.to_string())
        .collect();
    if !blocked.is_empty() {
        return Err(Error::PendingCreate { addresses: blocked });
    }
    if !state.pending.is_empty() {
        let addresses: Vec<String> = state.pending.keys().map(ToString::to_string).collect();
        log::warn!(
            "Interrupted operations are unresolved for {}; refresh to reconcile them",
            addresses.join(", ")
        );
    }

    log::info!("Plan: {}", plan.summary());
    Ok(plan)
}

fn plan_apply(graph: &Graph, state: &State, targets: &[Address]) -> Result<ExecutionPlan> {
    check_conflicts(graph)?;

    let in_scope: Option<BTreeSet<Address>> = if targets.is_empty() {
        None
    } else {
        Some(graph.ancestors(targets.iter().filter(|t| graph.contains(t))))
    };
    let scoped = |address: &Address| in_scope.as_ref().is_none_or(|s| s.contains(address));

    let mut decided: BTreeMap<Address, Decided<'_>> = BTreeMap::new();
    let mut builds = Vec::new();

    for address in graph.topological_order() {
        if !scoped(address) {
            continue;
        }
        let Some(node) = graph.node(address) else {
            continue;
        };
        let schema = address.kind.schema();

        let values: BTreeMap<String, Planned> = node
            .attributes
            .iter()
            .map(|(name, expr)| (name.clone(), expr.eval(&|r| resolve(&decided, r))))
            .collect();
        let record = state.get(address);
        let dependencies: Vec<Address> = graph.dependencies(address).cloned().collect();

        let change = match record {
            None => Change {
                address: address.clone(),
                op: ChangeOp::Create,
                reason: "not yet created".to_string(),
                diffs: compare(schema, &serde_json::Map::new(), &values),
                remote_id: None,
                dependencies,
                prior_dependencies: Vec::new(),
            },
            Some(record) => {
                let diffs = compare(schema, &record.attributes, &values);
                let replaced_deps: Vec<String> = node
                    .referenced_addresses()
                    .iter()
                    .filter(|d| decided.get(*d).is_some_and(|p| p.op == ChangeOp::Replace))
                    .map(ToString::to_string)
                    .collect();
                let forcing: Vec<&str> = diffs
                    .iter()
                    .filter(|d| d.forces_replacement)
                    .map(|d| d.name.as_str())
                    .collect();

                let (op, reason) = if !replaced_deps.is_empty() {
                    (
                        ChangeOp::Replace,
                        format!("{} is being replaced", replaced_deps.join(", ")),
                    )
                } else if !forcing.is_empty() {
                    (
                        ChangeOp::Replace,
                        format!("{} forces replacement", forcing.join(", ")),
                    )
                } else if !diffs.is_empty() {
                    let names: Vec<&str> = diffs.iter().map(|d| d.name.as_str()).collect();
                    (ChangeOp::Update, format!("update {} in place", names.join(", ")))
                } else {
                    (ChangeOp::NoOp, "up to date".to_string())
                };

                if op == ChangeOp::Replace && node.prevent_destroy {
                    return Err(Error::PreventDestroy {
                        address: address.to_string(),
                        action: "replace".to_string(),
                    });
                }

                Change {
                    address: address.clone(),
                    op,
                    reason,
                    diffs,
                    remote_id: Some(record.remote_id.clone()),
                    dependencies,
                    prior_dependencies: record.dependencies.clone(),
                }
            }
        };

        decided.insert(
            address.clone(),
            Decided {
                op: change.op,
                values,
                record,
            },
        );
        builds.push(change);
    }

    let orphans: Vec<&StateRecord> = state
        .resources
        .values()
        .filter(|r| !graph.contains(&r.address))
        .filter(|r| targets.is_empty() || targets.contains(&r.address))
        .collect();
    let mut changes = ordered_destroys(&orphans, "no longer declared")?;
    changes.extend(builds);

    Ok(ExecutionPlan {
        mode: PlanMode::Apply,
        changes,
    })
}

fn plan_destroy(graph: &Graph, state: &State, targets: &[Address]) -> Result<ExecutionPlan> {
    let records: Vec<&StateRecord> = if targets.is_empty() {
        state.resources.values().collect()
    } else {
        let mut dependents: BTreeMap<&Address, Vec<&Address>> = BTreeMap::new();
        for record in state.resources.values() {
            for dep in &record.dependencies {
                dependents.entry(dep).or_default().push(&record.address);
            }
        }
        let mut scope = BTreeSet::new();
        let mut stack: Vec<&Address> = targets.iter().collect();
        while let Some(address) = stack.pop() {
            if scope.insert(address) {
                stack.extend(dependents.get(address).into_iter().flatten().copied());
            }
        }
        state
            .resources
            .values()
            .filter(|r| scope.contains(&r.address))
            .collect()
    };

    if let Some(guarded) = records
        .iter()
        .find(|r| graph.node(&r.address).is_some_and(|n| n.prevent_destroy))
    {
        return Err(Error::PreventDestroy {
            address: guarded.address.to_string(),
            action: "destroy".to_string(),
        });
    }

    Ok(ExecutionPlan {
        mode: PlanMode::Destroy,
        changes: ordered_destroys(&records, "destroy requested")?,
    })
}

/// Destroy changes for the given records, dependents first
fn ordered_destroys(records: &[&StateRecord], reason: &str) -> Result<Vec<Change>> {
    let edges: BTreeMap<Address, BTreeSet<Address>> = records
        .iter()
        .map(|r| (r.address.clone(), r.dependencies.iter().cloned().collect()))
        .collect();
    let by_address: BTreeMap<&Address, &StateRecord> =
        records.iter().map(|r| (&r.address, *r)).collect();

    let mut order = topological_sort(&edges)?;
    order.reverse();

    Ok(order
        .iter()
        .filter_map(|address| by_address.get(address))
        .map(|record| Change {
            address: record.address.clone(),
            op: ChangeOp::Destroy,
            reason: reason.to_string(),
            diffs: Vec::new(),
            remote_id: Some(record.remote_id.clone()),
            dependencies: Vec::new(),
            prior_dependencies: record.dependencies.clone(),
        })
        .collect())
}

/// What the plan decided for a node visited earlier
struct Decided<'a> {
    op: ChangeOp,
    values: BTreeMap<String, Planned>,
    record: Option<&'a StateRecord>,
}

fn resolve(decided: &BTreeMap<Address, Decided<'_>>, reference: &Reference) -> Planned {
    let Reference::Attribute { address, attribute } = reference else {
        return Planned::Unknown;
    };
    let Some(dep) = decided.get(address) else {
        return Planned::Unknown;
    };

    let is_input = address
        .kind
        .schema()
        .attribute(attribute)
        .is_some_and(|a| a.is_input());
    if is_input {
        return dep
            .values
            .get(attribute)
            .cloned()
            .unwrap_or(Planned::Known(Value::Null));
    }

    match (dep.op, dep.record) {
        (ChangeOp::Create | ChangeOp::Replace, _) | (_, None) => Planned::Unknown,
        (_, Some(record)) => Planned::Known(record.value(attribute)),
    }
}

/// Reject two declarations that would claim the same remote-unique values
fn check_conflicts(graph: &Graph) -> Result<()> {
    let mut seen: BTreeMap<(String, String), &Address> = BTreeMap::new();

    for node in graph.nodes() {
        for group in node.address.kind.schema().unique {
            let parts: Option<Vec<String>> = group
                .iter()
                .map(|a| node.attributes.get(*a).map(ToString::to_string))
                .collect();
            let Some(parts) = parts else {
                continue;
            };
            let key = (
                format!("{}:{}", node.address.kind, group.join("+")),
                parts.join(", "),
            );
            if let Some(first) = seen.get(&key) {
                return Err(Error::AttributeConflict {
                    first: first.to_string(),
                    second: node.address.to_string(),
                    attributes: group.join(" + "),
                    value: key.1,
                });
            }
            seen.insert(key, &node.address);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::Declarations;
    use crate::state::PendingEntry;
    use crate::types::Action;
    use chrono::Utc;
    use serde_json::json;
    use std::path::Path;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn graph(content: &str) -> Graph {
        let decls = Declarations::parse_str(content, Path::new("main.toml")).unwrap();
        let vars = decls.variable_values_with(&BTreeMap::new(), |_| None).unwrap();
        Graph::build(&decls, &vars).unwrap()
    }

    fn record(address: &str, id: &str, attributes: Value, deps: &[&str]) -> StateRecord {
        StateRecord {
            address: addr(address),
            remote_id: id.to_string(),
            attributes: attributes.as_object().cloned().unwrap(),
            computed: serde_json::Map::new(),
            dependencies: deps.iter().map(|d| addr(d)).collect(),
            applied_at: Utc::now(),
        }
    }

    fn state(records: Vec<StateRecord>) -> State {
        State {
            resources: records.into_iter().map(|r| (r.address.clone(), r)).collect(),
            ..Default::default()
        }
    }

    fn ops(plan: &ExecutionPlan) -> Vec<(String, ChangeOp)> {
        plan.actionable()
            .map(|c| (c.address.to_string(), c.op))
            .collect()
    }

    const NETWORK_AND_SUBNET: &str = r#"
[resource.network.ci]
cidr_block = "10.0.0.0/16"
tags = { Name = "ci" }

[resource.subnet.public]
network_id = "${network.ci.id}"
cidr_block = "10.0.1.0/24"
"#;

    fn applied_state() -> State {
        state(vec![
            record(
                "network.ci",
                "net-1",
                json!({"cidr_block": "10.0.0.0/16", "tags": {"Name": "ci"}}),
                &[],
            ),
            record(
                "subnet.public",
                "subnet-1",
                json!({"network_id": "net-1", "cidr_block": "10.0.1.0/24"}),
                &["network.ci"],
            ),
        ])
    }

    #[test]
    fn test_unresolved_pending_create_blocks_plan() {
        let mut state = applied_state();
        state.resources.remove(&addr("subnet.public"));
        state.pending.insert(
            addr("subnet.public"),
            PendingEntry::new(addr("subnet.public"), Action::Create, vec![addr("network.ci")]),
        );

        let err = plan(&graph(NETWORK_AND_SUBNET), &state, &PlanOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "pending_create");
        assert!(err.to_string().contains("subnet.public"));

        // Destroying only touches recorded objects
        let opts = PlanOptions {
            mode: PlanMode::Destroy,
            targets: Vec::new(),
        };
        let destroy = plan(&graph(NETWORK_AND_SUBNET), &state, &opts).unwrap();
        assert_eq!(ops(&destroy), vec![("network.ci".to_string(), ChangeOp::Destroy)]);
    }

    #[test]
    fn test_create_in_dependency_order() {
        let plan = plan(&graph(NETWORK_AND_SUBNET), &State::default(), &PlanOptions::default()).unwrap();
        assert_eq!(
            ops(&plan),
            vec![
                ("network.ci".to_string(), ChangeOp::Create),
                ("subnet.public".to_string(), ChangeOp::Create),
            ]
        );

        let subnet = plan.change(&addr("subnet.public")).unwrap();
        let network_id = subnet.diffs.iter().find(|d| d.name == "network_id").unwrap();
        assert!(network_id.new.is_unknown());
        assert_eq!(subnet.dependencies, vec![addr("network.ci")]);
    }

    #[test]
    fn test_destroy_in_reverse_order() {
        let opts = PlanOptions {
            mode: PlanMode::Destroy,
            targets: Vec::new(),
        };
        let plan = plan(&Graph::default(), &applied_state(), &opts).unwrap();
        assert_eq!(
            ops(&plan),
            vec![
                ("subnet.public".to_string(), ChangeOp::Destroy),
                ("network.ci".to_string(), ChangeOp::Destroy),
            ]
        );
    }

    #[test]
    fn test_destroy_is_reverse_of_create_for_chains() {
        let content = r#"
[resource.network.n]
cidr_block = "10.0.0.0/16"

[resource.subnet.s]
network_id = "${network.n.id}"
cidr_block = "10.0.1.0/24"

[resource.route_table.rt]
network_id = "${network.n.id}"

[resource.route_table_association.a]
subnet_id = "${subnet.s.id}"
route_table_id = "${route_table.rt.id}"
"#;
        let g = graph(content);
        let create = plan(&g, &State::default(), &PlanOptions::default()).unwrap();
        let create_order: Vec<Address> = create.actionable().map(|c| c.address.clone()).collect();

        let applied = state(
            create
                .actionable()
                .enumerate()
                .map(|(i, c)| {
                    let deps: Vec<String> = c.dependencies.iter().map(ToString::to_string).collect();
                    let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
                    record(&c.address.to_string(), &format!("id-{i}"), json!({}), &deps)
                })
                .collect(),
        );
        let destroy = plan(
            &g,
            &applied,
            &PlanOptions {
                mode: PlanMode::Destroy,
                targets: Vec::new(),
            },
        )
        .unwrap();
        let mut destroy_order: Vec<Address> =
            destroy.actionable().map(|c| c.address.clone()).collect();
        destroy_order.reverse();
        assert_eq!(destroy_order, create_order);
    }

    #[test]
    fn test_replan_after_apply_is_empty() {
        let plan = plan(&graph(NETWORK_AND_SUBNET), &applied_state(), &PlanOptions::default()).unwrap();
        assert!(!plan.has_changes());
        assert_eq!(plan.summary().no_op, 2);
    }

    #[test]
    fn test_in_place_update() {
        let content = NETWORK_AND_SUBNET.replace("Name = \"ci\"", "Name = \"ci-2\"");
        let plan = plan(&graph(&content), &applied_state(), &PlanOptions::default()).unwrap();
        assert_eq!(ops(&plan), vec![("network.ci".to_string(), ChangeOp::Update)]);
        let change = plan.change(&addr("network.ci")).unwrap();
        assert_eq!(change.diffs.len(), 1);
        assert_eq!(change.diffs[0].old, Some(json!({"Name": "ci"})));
    }

    #[test]
    fn test_force_new_replaces_node_and_referencing_dependents() {
        let content = NETWORK_AND_SUBNET.replace("10.0.0.0/16", "10.9.0.0/16");
        let plan = plan(&graph(&content), &applied_state(), &PlanOptions::default()).unwrap();
        assert_eq!(
            ops(&plan),
            vec![
                ("network.ci".to_string(), ChangeOp::Replace),
                ("subnet.public".to_string(), ChangeOp::Replace),
            ]
        );
        assert_eq!(
            plan.change(&addr("network.ci")).unwrap().reason,
            "cidr_block forces replacement"
        );
        assert_eq!(
            plan.change(&addr("subnet.public")).unwrap().reason,
            "network.ci is being replaced"
        );
    }

    #[test]
    fn test_removed_declaration_is_destroyed_first() {
        let content = r#"
[resource.network.ci]
cidr_block = "10.0.0.0/16"
tags = { Name = "ci" }

[resource.key_pair.deploy]
key_name = "deploy"
public_key = "ssh-ed25519 AAAA"
"#;
        let plan = plan(&graph(content), &applied_state(), &PlanOptions::default()).unwrap();
        assert_eq!(
            ops(&plan),
            vec![
                ("subnet.public".to_string(), ChangeOp::Destroy),
                ("key_pair.deploy".to_string(), ChangeOp::Create),
            ]
        );
        assert_eq!(
            plan.change(&addr("subnet.public")).unwrap().reason,
            "no longer declared"
        );
    }

    #[test]
    fn test_removed_attribute_is_a_change() {
        let content = NETWORK_AND_SUBNET.replace("tags = { Name = \"ci\" }\n", "");
        let plan = plan(&graph(&content), &applied_state(), &PlanOptions::default()).unwrap();
        let change = plan.change(&addr("network.ci")).unwrap();
        assert_eq!(change.op, ChangeOp::Update);
        assert_eq!(change.diffs[0].name, "tags");
        assert_eq!(change.diffs[0].new, Planned::Known(Value::Null));
    }

    #[test]
    fn test_prevent_destroy() {
        let guarded = NETWORK_AND_SUBNET.replace(
            "tags = { Name = \"ci\" }",
            "tags = { Name = \"ci\" }\nprevent_destroy = true",
        );

        let replace = guarded.replace("10.0.0.0/16", "10.9.0.0/16");
        let err = plan(&graph(&replace), &applied_state(), &PlanOptions::default()).unwrap_err();
        assert!(matches!(err, Error::PreventDestroy { ref action, .. } if action == "replace"));

        let destroy = PlanOptions {
            mode: PlanMode::Destroy,
            targets: Vec::new(),
        };
        let err = plan(&graph(&guarded), &applied_state(), &destroy).unwrap_err();
        assert_eq!(err.kind(), "prevent_destroy");
    }

    #[test]
    fn test_attribute_conflict() {
        let content = r#"
[resource.network.ci]
cidr_block = "10.0.0.0/16"

[resource.subnet.a]
network_id = "${network.ci.id}"
cidr_block = "10.0.1.0/24"

[resource.subnet.b]
network_id = "${network.ci.id}"
cidr_block = "10.0.1.0/24"
"#;
        let err = plan(&graph(content), &State::default(), &PlanOptions::default()).unwrap_err();
        match err {
            Error::AttributeConflict { first, second, attributes, .. } => {
                assert_eq!(first, "subnet.a");
                assert_eq!(second, "subnet.b");
                assert_eq!(attributes, "network_id + cidr_block");
            }
            other => panic!("expected conflict, got {other}"),
        }
    }

    #[test]
    fn test_targets() {
        let content = format!(
            "{NETWORK_AND_SUBNET}\n[resource.key_pair.deploy]\nkey_name = \"deploy\"\npublic_key = \"ssh-ed25519 AAAA\"\n"
        );
        let g = graph(&content);

        let opts = PlanOptions {
            mode: PlanMode::Apply,
            targets: vec![addr("subnet.public")],
        };
        let plan_apply = plan(&g, &State::default(), &opts).unwrap();
        assert_eq!(
            ops(&plan_apply),
            vec![
                ("network.ci".to_string(), ChangeOp::Create),
                ("subnet.public".to_string(), ChangeOp::Create),
            ]
        );

        let opts = PlanOptions {
            mode: PlanMode::Destroy,
            targets: vec![addr("network.ci")],
        };
        let plan_destroy = plan(&g, &applied_state(), &opts).unwrap();
        assert_eq!(plan_destroy.summary().destroy, 2);

        let opts = PlanOptions {
            mode: PlanMode::Apply,
            targets: vec![addr("instance.nope")],
        };
        assert_eq!(
            plan(&g, &State::default(), &opts).unwrap_err().kind(),
            "unknown_target"
        );
    }

    #[test]
    fn test_computed_values_resolve_from_state() {
        let content = r#"
[resource.network.ci]
cidr_block = "10.0.0.0/16"

[resource.security_group.web]
name = "web"
network_id = "${network.ci.id}"
description = "for ${network.ci.arn}"
"#;
        let mut network = record("network.ci", "net-1", json!({"cidr_block": "10.0.0.0/16"}), &[]);
        network
            .computed
            .insert("arn".to_string(), json!("arn:sandbox:net-1"));
        let sg = record(
            "security_group.web",
            "sg-1",
            json!({"name": "web", "network_id": "net-1", "description": "for arn:sandbox:net-1"}),
            &["network.ci"],
        );

        let plan = plan(&graph(content), &state(vec![network, sg]), &PlanOptions::default()).unwrap();
        assert!(!plan.has_changes());
    }
}
