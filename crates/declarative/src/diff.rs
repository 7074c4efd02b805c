//! Attribute-level diffs between recorded and planned values

use crate::expr::Planned;
use crate::types::ChangeOp;
use cloudkit::Schema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Difference on a single attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDiff {
    /// Attribute name
    pub name: String,
    /// Value in the last-applied snapshot (`None` if unset)
    pub old: Option<Value>,
    /// Value the plan will set
    pub new: Planned,
    /// Changing this attribute needs a new object
    pub forces_replacement: bool,
}

/// Compare a last-applied snapshot with planned attribute values.
///
/// Null and absent are the same. An unknown planned value is always a
/// difference. Attributes present in the snapshot but no longer planned
/// show up as a change to null.
pub fn compare(
    schema: &Schema,
    old: &serde_json::Map<String, Value>,
    new: &BTreeMap<String, Planned>,
) -> Vec<AttributeDiff> {
    let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let mut diffs = Vec::new();

    for name in names {
        let before = old.get(name).filter(|v| !v.is_null());
        let after = new.get(name).cloned().unwrap_or(Planned::Known(Value::Null));

        let same = match &after {
            Planned::Known(Value::Null) => before.is_none(),
            Planned::Known(value) => before == Some(value),
            Planned::Unknown => false,
        };
        if same {
            continue;
        }

        diffs.push(AttributeDiff {
            name: name.clone(),
            old: before.cloned(),
            new: after,
            forces_replacement: schema.forces_replacement(name),
        });
    }

    diffs
}

/// Plan summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub destroy: usize,
    pub no_op: usize,
}

impl PlanSummary {
    /// Count one planned operation
    pub fn add(&mut self, op: ChangeOp) {
        match op {
            ChangeOp::Create => self.create += 1,
            ChangeOp::Update => self.update += 1,
            ChangeOp::Replace => self.replace += 1,
            ChangeOp::Destroy => self.destroy += 1,
            ChangeOp::NoOp => self.no_op += 1,
        }
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.create + self.update + self.replace + self.destroy
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to destroy",
            self.create, self.update, self.replace, self.destroy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudkit::ResourceKind;
    use serde_json::json;

    fn snapshot(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_identical_values_have_no_diff() {
        let old = snapshot(json!({"cidr_block": "10.0.0.0/16", "tags": {"Name": "ci"}}));
        let new = BTreeMap::from([
            ("cidr_block".to_string(), Planned::Known(json!("10.0.0.0/16"))),
            ("tags".to_string(), Planned::Known(json!({"Name": "ci"}))),
        ]);
        assert!(compare(ResourceKind::Network.schema(), &old, &new).is_empty());
    }

    #[test]
    fn test_null_equals_absent() {
        let old = snapshot(json!({"cidr_block": "10.0.0.0/16", "tags": null}));
        let new = BTreeMap::from([
            ("cidr_block".to_string(), Planned::Known(json!("10.0.0.0/16"))),
            ("enable_dns_hostnames".to_string(), Planned::Known(Value::Null)),
        ]);
        assert!(compare(ResourceKind::Network.schema(), &old, &new).is_empty());
    }

    #[test]
    fn test_force_new_is_flagged() {
        let old = snapshot(json!({"cidr_block": "10.0.0.0/16", "tags": {"Name": "a"}}));
        let new = BTreeMap::from([
            ("cidr_block".to_string(), Planned::Known(json!("10.1.0.0/16"))),
            ("tags".to_string(), Planned::Known(json!({"Name": "b"}))),
        ]);
        let diffs = compare(ResourceKind::Network.schema(), &old, &new);
        assert_eq!(diffs.len(), 2);
        assert!(diffs[0].forces_replacement);
        assert_eq!(diffs[0].name, "cidr_block");
        assert!(!diffs[1].forces_replacement);
    }

    #[test]
    fn test_removed_and_unknown_attributes() {
        let old = snapshot(json!({"network_id": "net-1", "cidr_block": "10.0.1.0/24", "tags": {"a": "b"}}));
        let new = BTreeMap::from([
            ("network_id".to_string(), Planned::Unknown),
            ("cidr_block".to_string(), Planned::Known(json!("10.0.1.0/24"))),
        ]);
        let diffs = compare(ResourceKind::Subnet.schema(), &old, &new);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].name, "network_id");
        assert!(diffs[0].new.is_unknown());
        assert_eq!(diffs[1].name, "tags");
        assert_eq!(diffs[1].new, Planned::Known(Value::Null));
    }

    #[test]
    fn test_summary() {
        let mut summary = PlanSummary::default();
        summary.add(ChangeOp::Create);
        summary.add(ChangeOp::Destroy);
        summary.add(ChangeOp::NoOp);
        assert_eq!(summary.total(), 2);
        assert!(summary.has_changes());
        assert_eq!(
            summary.to_string(),
            "1 to create, 0 to update, 0 to replace, 1 to destroy"
        );
    }
}
