//! Resource graph construction
//!
//! Turns parsed declarations into a validated DAG: expressions are parsed,
//! variables substituted, attributes checked against each kind's schema, and
//! edges derived from `${kind.name.attr}` references plus `depends_on`.

use crate::declaration::Declarations;
use crate::error::{Error, Result};
use crate::expr::{Expr, Reference};
use crate::types::Address;
use cloudkit::AttrType;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// A declared resource with parsed expressions
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub address: Address,
    pub attributes: BTreeMap<String, Expr>,
    pub depends_on: Vec<Address>,
    pub prevent_destroy: bool,
    pub source: PathBuf,
}

impl ResourceNode {
    /// Resources whose attributes this node reads
    pub fn referenced_addresses(&self) -> BTreeSet<Address> {
        self.attributes
            .values()
            .flat_map(Expr::references)
            .filter_map(Reference::address)
            .cloned()
            .collect()
    }
}

/// A declared output with its parsed expression
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub name: String,
    pub expr: Expr,
    pub description: Option<String>,
    pub sensitive: bool,
}

/// Validated resource DAG
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeMap<Address, ResourceNode>,
    dependencies: BTreeMap<Address, BTreeSet<Address>>,
    dependents: BTreeMap<Address, BTreeSet<Address>>,
    order: Vec<Address>,
    outputs: BTreeMap<String, Output>,
}

impl Graph {
    /// Build and validate the graph for the given variable values
    pub fn build(decls: &Declarations, vars: &BTreeMap<String, Value>) -> Result<Self> {
        let mut nodes = BTreeMap::new();

        for (address, block) in &decls.resources {
            let mut attributes = BTreeMap::new();
            for (name, value) in &block.attributes {
                let expr = Expr::parse(value).map_err(|message| Error::InvalidResource {
                    address: address.to_string(),
                    message: format!("{name}: {message}"),
                })?;
                let expr = expr
                    .bind_variables(vars)
                    .map_err(|var| Error::UnresolvedReference {
                        from: address.to_string(),
                        reference: format!("var.{var}"),
                    })?;
                attributes.insert(name.clone(), expr);
            }

            let node = ResourceNode {
                address: address.clone(),
                attributes,
                depends_on: block.depends_on.clone(),
                prevent_destroy: block.prevent_destroy,
                source: block.source.clone(),
            };
            check_schema(&node)?;
            nodes.insert(address.clone(), node);
        }

        let mut dependencies: BTreeMap<Address, BTreeSet<Address>> = BTreeMap::new();
        for (address, node) in &nodes {
            let mut deps = BTreeSet::new();
            for expr in node.attributes.values() {
                for reference in expr.references() {
                    deps.insert(check_reference(&nodes, &address.to_string(), reference)?);
                }
            }
            for dep in &node.depends_on {
                if !nodes.contains_key(dep) {
                    return Err(Error::UnresolvedReference {
                        from: address.to_string(),
                        reference: dep.to_string(),
                    });
                }
                deps.insert(dep.clone());
            }
            dependencies.insert(address.clone(), deps);
        }

        let mut outputs = BTreeMap::new();
        for (name, block) in &decls.outputs {
            let from = format!("output.{name}");
            let expr = Expr::parse(&block.value)
                .map_err(|message| Error::Parse {
                    path: block.source.clone(),
                    message: format!("{from}: {message}"),
                })?
                .bind_variables(vars)
                .map_err(|var| Error::UnresolvedReference {
                    from: from.clone(),
                    reference: format!("var.{var}"),
                })?;
            for reference in expr.references() {
                check_reference(&nodes, &from, reference)?;
            }
            outputs.insert(
                name.clone(),
                Output {
                    name: name.clone(),
                    expr,
                    description: block.description.clone(),
                    sensitive: block.sensitive,
                },
            );
        }

        let order = topological_sort(&dependencies)?;
        let mut dependents: BTreeMap<Address, BTreeSet<Address>> =
            nodes.keys().map(|a| (a.clone(), BTreeSet::new())).collect();
        for (address, deps) in &dependencies {
            for dep in deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(address.clone());
            }
        }

        log::debug!("Built graph with {} resources, order: {order:?}", nodes.len());

        Ok(Self {
            nodes,
            dependencies,
            dependents,
            order,
            outputs,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.nodes.contains_key(address)
    }

    pub fn node(&self, address: &Address) -> Option<&ResourceNode> {
        self.nodes.get(address)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn outputs(&self) -> &BTreeMap<String, Output> {
        &self.outputs
    }

    /// Deterministic dependency order: every node after all of its
    /// dependencies, ties broken by address
    pub fn topological_order(&self) -> &[Address] {
        &self.order
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, address: &Address) -> impl Iterator<Item = &Address> {
        self.dependencies.get(address).into_iter().flatten()
    }

    /// Nodes that directly depend on a node
    pub fn dependents(&self, address: &Address) -> impl Iterator<Item = &Address> {
        self.dependents.get(address).into_iter().flatten()
    }

    /// The given nodes plus everything they transitively depend on
    pub fn ancestors<'a>(&self, targets: impl IntoIterator<Item = &'a Address>) -> BTreeSet<Address> {
        closure(targets, &self.dependencies)
    }

    /// The given nodes plus everything that transitively depends on them
    pub fn descendants<'a>(
        &self,
        targets: impl IntoIterator<Item = &'a Address>,
    ) -> BTreeSet<Address> {
        closure(targets, &self.dependents)
    }
}

fn check_schema(node: &ResourceNode) -> Result<()> {
    let schema = node.address.kind.schema();
    let invalid = |message: String| Error::InvalidResource {
        address: node.address.to_string(),
        message,
    };

    for (name, expr) in &node.attributes {
        let Some(spec) = schema.attribute(name) else {
            return Err(invalid(format!(
                "unknown attribute '{name}' for {}",
                node.address.kind
            )));
        };
        if !spec.is_input() {
            return Err(invalid(format!(
                "'{name}' is computed by the provider and cannot be set"
            )));
        }
        if let Some(value) = expr.as_literal() {
            if !value.is_null() && !spec.ty.matches(&value) {
                return Err(invalid(format!(
                    "'{name}' expects {}, got {value}",
                    spec.ty.name()
                )));
            }
        } else if expr.is_string_valued() && spec.ty != AttrType::String {
            return Err(invalid(format!(
                "'{name}' expects {}, got an interpolated string",
                spec.ty.name()
            )));
        }
    }

    for spec in schema.required() {
        if !node.attributes.contains_key(spec.name) {
            return Err(invalid(format!("missing required attribute '{}'", spec.name)));
        }
    }

    Ok(())
}

fn check_reference(
    nodes: &BTreeMap<Address, ResourceNode>,
    from: &str,
    reference: &Reference,
) -> Result<Address> {
    let unresolved = || Error::UnresolvedReference {
        from: from.to_string(),
        reference: reference.to_string(),
    };
    match reference {
        Reference::Variable(_) => Err(unresolved()),
        Reference::Attribute { address, attribute } => {
            if !nodes.contains_key(address) || address.kind.schema().attribute(attribute).is_none()
            {
                return Err(unresolved());
            }
            Ok(address.clone())
        }
    }
}

fn closure<'a>(
    start: impl IntoIterator<Item = &'a Address>,
    edges: &BTreeMap<Address, BTreeSet<Address>>,
) -> BTreeSet<Address> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<Address> = start.into_iter().cloned().collect();
    while let Some(address) = stack.pop() {
        if seen.insert(address.clone()) {
            stack.extend(edges.get(&address).into_iter().flatten().cloned());
        }
    }
    seen
}

/// Order nodes so each comes after its dependencies (Kahn's algorithm).
///
/// `edges` maps every node to its dependencies. Dependencies that are not
/// themselves keys are ignored. Among nodes that are ready at the same
/// time, the smallest address goes first.
pub fn topological_sort(edges: &BTreeMap<Address, BTreeSet<Address>>) -> Result<Vec<Address>> {
    let mut remaining: BTreeMap<&Address, usize> = edges
        .iter()
        .map(|(a, deps)| (a, deps.iter().filter(|d| edges.contains_key(*d)).count()))
        .collect();
    let mut dependents: BTreeMap<&Address, Vec<&Address>> = BTreeMap::new();
    for (address, deps) in edges {
        for dep in deps.iter().filter(|d| edges.contains_key(*d)) {
            dependents.entry(dep).or_default().push(address);
        }
    }

    let mut ready: BTreeSet<&Address> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(a, _)| *a)
        .collect();
    let mut order = Vec::with_capacity(edges.len());

    while let Some(address) = ready.pop_first() {
        order.push(address.clone());
        for &dependent in dependents.get(address).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() < edges.len() {
        let cycle = find_cycle(edges).unwrap_or_default();
        return Err(Error::Cycle { cycle });
    }
    Ok(order)
}

/// Find one cycle, returned as a path whose first and last entries match
fn find_cycle(edges: &BTreeMap<Address, BTreeSet<Address>>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        node: &'a Address,
        edges: &'a BTreeMap<Address, BTreeSet<Address>>,
        marks: &mut BTreeMap<&'a Address, Mark>,
        path: &mut Vec<&'a Address>,
    ) -> Option<Vec<String>> {
        marks.insert(node, Mark::Visiting);
        path.push(node);
        for dep in edges.get(node).into_iter().flatten() {
            match marks.get(dep) {
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|a| *a == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|a| a.to_string()).collect();
                    cycle.push(dep.to_string());
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None if edges.contains_key(dep) => {
                    if let Some(cycle) = visit(dep, edges, marks, path) {
                        return Some(cycle);
                    }
                }
                None => {}
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    for node in edges.keys() {
        if marks.contains_key(node) {
            continue;
        }
        let mut path = Vec::new();
        if let Some(cycle) = visit(node, edges, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudkit::ResourceKind;
    use std::path::Path;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn build(content: &str) -> Result<Graph> {
        let decls = Declarations::parse_str(content, Path::new("main.toml"))?;
        let vars = decls.variable_values_with(&BTreeMap::new(), |_| None)?;
        Graph::build(&decls, &vars)
    }

    const STACK: &str = r#"
[variable.cidr]
default = "10.0.0.0/16"

[resource.network.ci]
cidr_block = "${var.cidr}"

[resource.subnet.public]
network_id = "${network.ci.id}"
cidr_block = "10.0.1.0/24"

[resource.internet_gateway.gw]
network_id = "${network.ci.id}"

[resource.instance.jenkins]
image = "img-ubuntu"
instance_type = "medium"
subnet_id = "${subnet.public.id}"
depends_on = ["internet_gateway.gw"]

[output.ip]
value = "${instance.jenkins.public_ip}"
"#;

    fn assert_valid_order(graph: &Graph) {
        let order = graph.topological_order();
        assert_eq!(order.len(), graph.len());
        let position: BTreeMap<&Address, usize> =
            order.iter().enumerate().map(|(i, a)| (a, i)).collect();
        for node in graph.nodes() {
            for dep in graph.dependencies(&node.address) {
                assert!(
                    position[dep] < position[&node.address],
                    "{dep} must come before {}",
                    node.address
                );
            }
        }
    }

    #[test]
    fn test_build_stack() {
        let graph = build(STACK).unwrap();
        assert_eq!(graph.len(), 4);
        assert_valid_order(&graph);
        assert_eq!(
            graph.topological_order(),
            &[
                addr("network.ci"),
                addr("internet_gateway.gw"),
                addr("subnet.public"),
                addr("instance.jenkins"),
            ]
        );

        let jenkins = graph.node(&addr("instance.jenkins")).unwrap();
        assert_eq!(
            graph.dependencies(&jenkins.address).collect::<Vec<_>>(),
            vec![&addr("internet_gateway.gw"), &addr("subnet.public")]
        );
        assert_eq!(
            jenkins.referenced_addresses(),
            BTreeSet::from([addr("subnet.public")])
        );

        let network = graph.node(&addr("network.ci")).unwrap();
        assert_eq!(
            network.attributes["cidr_block"],
            Expr::Literal(serde_json::json!("10.0.0.0/16"))
        );
    }

    #[test]
    fn test_target_closures() {
        let graph = build(STACK).unwrap();

        let ancestors = graph.ancestors([&addr("subnet.public")]);
        assert_eq!(
            ancestors,
            BTreeSet::from([addr("network.ci"), addr("subnet.public")])
        );

        let descendants = graph.descendants([&addr("internet_gateway.gw")]);
        assert_eq!(
            descendants,
            BTreeSet::from([addr("internet_gateway.gw"), addr("instance.jenkins")])
        );
    }

    #[test]
    fn test_cycle_reports_path() {
        let err = build(
            r#"
[resource.security_group.a]
name = "a"
network_id = "${security_group.b.id}"

[resource.security_group.b]
name = "b"
network_id = "${security_group.a.id}"
"#,
        )
        .unwrap_err();

        match err {
            Error::Cycle { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 3);
                assert!(cycle.contains(&"security_group.a".to_string()));
                assert!(cycle.contains(&"security_group.b".to_string()));
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = build(
            r#"
[resource.network.a]
cidr_block = "10.0.0.0/16"
depends_on = ["network.a"]
"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "cycle");
    }

    #[test]
    fn test_unresolved_references() {
        let missing_node = build(
            "[resource.subnet.a]\nnetwork_id = \"${network.nope.id}\"\ncidr_block = \"10.0.1.0/24\"\n",
        )
        .unwrap_err();
        assert!(matches!(
            missing_node,
            Error::UnresolvedReference { ref reference, .. } if reference == "network.nope.id"
        ));

        let missing_attr = build(
            r#"
[resource.network.ci]
cidr_block = "10.0.0.0/16"

[resource.subnet.a]
network_id = "${network.ci.vpc}"
cidr_block = "10.0.1.0/24"
"#,
        )
        .unwrap_err();
        assert_eq!(missing_attr.kind(), "unresolved_reference");

        let missing_var = build("[resource.network.ci]\ncidr_block = \"${var.cidr}\"\n").unwrap_err();
        assert!(matches!(
            missing_var,
            Error::UnresolvedReference { ref reference, .. } if reference == "var.cidr"
        ));

        let missing_dep = build(
            "[resource.network.ci]\ncidr_block = \"10.0.0.0/16\"\ndepends_on = [\"key_pair.k\"]\n",
        )
        .unwrap_err();
        assert_eq!(missing_dep.kind(), "unresolved_reference");
    }

    #[test]
    fn test_schema_violations() {
        let unknown = build("[resource.network.ci]\ncidr_block = \"10.0.0.0/16\"\ncolor = \"red\"\n");
        assert!(unknown.unwrap_err().to_string().contains("unknown attribute 'color'"));

        let computed = build("[resource.network.ci]\ncidr_block = \"10.0.0.0/16\"\narn = \"x\"\n");
        assert!(computed.unwrap_err().to_string().contains("computed"));

        let missing = build("[resource.subnet.a]\ncidr_block = \"10.0.1.0/24\"\n");
        assert!(missing.unwrap_err().to_string().contains("network_id"));

        let wrong_type = build("[resource.network.ci]\ncidr_block = 10\n");
        assert!(wrong_type.unwrap_err().to_string().contains("expects string"));

        let template = build(
            r#"
[resource.network.ci]
cidr_block = "10.0.0.0/16"
enable_dns_hostnames = "${network.ci.id}-x"
"#,
        );
        assert_eq!(template.unwrap_err().kind(), "parse");
    }

    #[test]
    fn test_output_reference_checked() {
        let err = build(
            r#"
[resource.network.ci]
cidr_block = "10.0.0.0/16"

[output.x]
value = "${subnet.a.id}"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { ref from, .. } if from == "output.x"));
    }

    #[test]
    fn test_topological_sort_is_valid_for_generated_dags() {
        // Small linear congruential generator so the test is deterministic
        let mut seed: u64 = 0x5eed;
        let mut next = move |bound: u64| {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (seed >> 33) % bound
        };

        for _ in 0..50 {
            let count = next(12) as usize + 1;
            let names: Vec<Address> = (0..count)
                .map(|i| Address::new(ResourceKind::Network, format!("n{}", next(1000) * 100 + i as u64)))
                .collect();

            // Edges only point at lower indices, so the graph is acyclic
            let mut edges: BTreeMap<Address, BTreeSet<Address>> = BTreeMap::new();
            for (i, name) in names.iter().enumerate() {
                let mut deps = BTreeSet::new();
                for j in 0..i {
                    if next(3) == 0 {
                        deps.insert(names[j].clone());
                    }
                }
                edges.insert(name.clone(), deps);
            }

            let order = topological_sort(&edges).unwrap();
            assert_eq!(order.len(), edges.len());
            let position: BTreeMap<&Address, usize> =
                order.iter().enumerate().map(|(i, a)| (a, i)).collect();
            for (node, deps) in &edges {
                for dep in deps {
                    assert!(position[dep] < position[node]);
                }
            }
        }
    }

    #[test]
    fn test_topological_sort_ignores_unknown_dependencies() {
        let edges = BTreeMap::from([
            (addr("subnet.a"), BTreeSet::from([addr("network.gone")])),
            (addr("network.b"), BTreeSet::new()),
        ]);
        assert_eq!(
            topological_sort(&edges).unwrap(),
            vec![addr("network.b"), addr("subnet.a")]
        );
    }
}
