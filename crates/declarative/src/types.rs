//! Core types for declarative resource management

use cloudkit::{ResourceKind, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Logical address of a resource: `kind.name`
///
/// Addresses order by their text, so `internet_gateway.gw` sorts before
/// `subnet.a`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Address {
    pub kind: ResourceKind,
    pub name: String,
}

impl Address {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.kind.as_str(), &self.name).cmp(&(other.kind.as_str(), &other.name))
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| format!("'{s}' is not a kind.name address"))?;
        let kind = kind.parse::<ResourceKind>().map_err(|e| e.to_string())?;
        if !is_identifier(name) {
            return Err(format!("'{name}' is not a valid resource name"));
        }
        Ok(Self::new(kind, name))
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl TryFrom<String> for Address {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Check that a name can be used for a resource, variable or output
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// What a plan will do to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// Not in state yet
    Create,
    /// Attributes differ and can be changed in place
    Update,
    /// Attributes differ and need a new object (destroy, then create)
    Replace,
    /// In state but no longer declared, or destroy requested
    Destroy,
    /// Nothing to do
    NoOp,
}

impl ChangeOp {
    /// Marker used when rendering plans
    pub fn symbol(&self) -> &'static str {
        match self {
            ChangeOp::Create => "+",
            ChangeOp::Update => "~",
            ChangeOp::Replace => "-/+",
            ChangeOp::Destroy => "-",
            ChangeOp::NoOp => " ",
        }
    }

    /// Whether this operation touches the provider
    pub fn is_change(&self) -> bool {
        !matches!(self, ChangeOp::NoOp)
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeOp::Create => "create",
            ChangeOp::Update => "update",
            ChangeOp::Replace => "replace",
            ChangeOp::Destroy => "destroy",
            ChangeOp::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

/// A single provider call the applier performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// Result of applying the change for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ApplyResult {
    /// No changes needed
    NoChange,
    /// Resource was created
    Created { id: String },
    /// Resource was changed in place
    Updated,
    /// Resource was destroyed and created again
    Replaced { id: String },
    /// Resource was destroyed
    Destroyed,
    /// Apply failed
    Failed { error: String },
    /// Apply never started for this resource
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents success (no failure, not skipped)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. } | Self::Skipped { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created { .. } | Self::Updated | Self::Replaced { .. } | Self::Destroyed
        )
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub destroyed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub no_change: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.destroyed
    }

    /// Check if execution was fully successful
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.skipped + self.failed + self.no_change
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::NoChange => self.no_change += 1,
            ApplyResult::Created { .. } => self.created += 1,
            ApplyResult::Updated => self.updated += 1,
            ApplyResult::Replaced { .. } => self.replaced += 1,
            ApplyResult::Destroyed => self.destroyed += 1,
            ApplyResult::Failed { .. } => self.failed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of provider calls in flight at once
    pub jobs: usize,
    /// Retry policy for transient provider errors
    pub retry: RetryConfig,
    /// Stop issuing new calls after this long
    pub timeout: Option<Duration>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
            timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse() {
        let address: Address = "subnet.public".parse().unwrap();
        assert_eq!(address.kind, ResourceKind::Subnet);
        assert_eq!(address.name, "public");
        assert_eq!(address.to_string(), "subnet.public");

        assert!("subnet".parse::<Address>().is_err());
        assert!("bucket.logs".parse::<Address>().is_err());
        assert!("subnet.9lives".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_orders_by_text() {
        let gw: Address = "internet_gateway.gw".parse().unwrap();
        let subnet: Address = "subnet.a".parse().unwrap();
        assert!(gw < subnet);
    }

    #[test]
    fn test_address_serializes_as_string() {
        let address = Address::new(ResourceKind::Network, "ci");
        assert_eq!(serde_json::to_string(&address).unwrap(), "\"network.ci\"");
        let back: Address = serde_json::from_str("\"network.ci\"").unwrap();
        assert_eq!(back, address);
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = ExecuteSummary::default();
        summary.add_result(&ApplyResult::Created { id: "net-1".into() });
        summary.add_result(&ApplyResult::NoChange);
        summary.add_result(&ApplyResult::Failed {
            error: "boom".into(),
        });

        assert_eq!(summary.total_changes(), 1);
        assert_eq!(summary.total(), 3);
        assert!(!summary.is_success());
    }
}
