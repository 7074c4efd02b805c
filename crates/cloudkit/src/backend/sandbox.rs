//! File-backed sandbox account.
//!
//! Behaves like a provider resource API without talking to one: it assigns
//! ids, fills in computed attributes, validates parameters and references,
//! refuses to delete objects that are still referenced, and can be told to
//! fail specific calls (throttling, invalid parameters) to exercise the
//! caller's retry and abort paths.
//!
//! The account is kept in memory and, when opened from a path, written back
//! to a JSON file after every mutation.

use crate::backend::CloudApi;
use crate::error::{Error, Result};
use crate::schema::ResourceKind;
use crate::types::{Attributes, Operation, RemoteObject};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

static CIDR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})$").expect("valid CIDR regex")
});

/// Attributes holding ids of other objects, and the kind they must point to.
const REFERENCES: &[(&str, ResourceKind)] = &[
    ("network_id", ResourceKind::Network),
    ("subnet_id", ResourceKind::Subnet),
    ("route_table_id", ResourceKind::RouteTable),
    ("instance_id", ResourceKind::Instance),
    ("security_group_ids", ResourceKind::SecurityGroup),
];

#[derive(Debug, Default, Serialize, Deserialize)]
struct Account {
    #[serde(default)]
    serial: u64,
    #[serde(default)]
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredObject {
    kind: ResourceKind,
    id: String,
    address: String,
    attributes: Attributes,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StoredObject {
    fn to_remote(&self) -> RemoteObject {
        RemoteObject {
            kind: self.kind,
            id: self.id.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

/// A scripted failure for matching calls.
#[derive(Debug, Clone)]
pub struct Fault {
    /// Operation to fail
    pub operation: Operation,
    /// Only fail calls for this kind (any kind if `None`)
    pub kind: Option<ResourceKind>,
    /// Provider error code to return, e.g. "Throttling"
    pub code: String,
    /// How many matching calls fail before the fault is used up
    pub times: u32,
}

impl Fault {
    /// Fail the next matching call with the given error code.
    pub fn new(operation: Operation, code: impl Into<String>) -> Self {
        Self {
            operation,
            kind: None,
            code: code.into(),
            times: 1,
        }
    }

    /// Restrict the fault to one kind.
    pub fn on(mut self, kind: ResourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Fail this many matching calls.
    pub fn times(mut self, times: u32) -> Self {
        self.times = times;
        self
    }
}

/// A call received by the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub kind: ResourceKind,
    /// Address for create/lookup, remote id otherwise
    pub target: String,
}

/// Simulated provider account.
pub struct Sandbox {
    path: Option<PathBuf>,
    region: String,
    latency: Duration,
    account: Mutex<Account>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<Call>>,
}

impl Sandbox {
    /// Create an empty account that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            region: "sandbox-1".to_string(),
            latency: Duration::ZERO,
            account: Mutex::new(Account::default()),
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Open the account stored at `path`, starting empty if the file does
    /// not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let account = if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| Error::Account {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&content)?
        } else {
            Account::default()
        };
        log::debug!("Opened sandbox account at {}", path.display());

        Ok(Self {
            path: Some(path.to_path_buf()),
            account: Mutex::new(account),
            ..Self::in_memory()
        })
    }

    /// Set the region used in generated ARNs.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Script a failure.
    pub fn inject(&self, fault: Fault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(fault);
        }
    }

    /// All calls received so far, in arrival order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// All objects currently in the account.
    pub fn objects(&self) -> Vec<RemoteObject> {
        self.account
            .lock()
            .map(|a| a.objects.values().map(StoredObject::to_remote).collect())
            .unwrap_or_default()
    }

    /// Delete an object behind the engine's back. Returns whether it existed.
    pub fn tamper_delete(&self, id: &str) -> Result<bool> {
        let mut account = lock(&self.account)?;
        let existed = account.objects.remove(id).is_some();
        self.persist(&account)?;
        Ok(existed)
    }

    /// Change an attribute behind the engine's back. Returns whether the
    /// object existed.
    pub fn tamper_set(&self, id: &str, name: &str, value: Value) -> Result<bool> {
        let mut account = lock(&self.account)?;
        let Some(object) = account.objects.get_mut(id) else {
            return Ok(false);
        };
        object.attributes.insert(name.to_string(), value);
        object.updated_at = Utc::now();
        self.persist(&account)?;
        Ok(true)
    }

    fn begin(&self, operation: Operation, kind: ResourceKind, target: &str) -> Result<()> {
        lock(&self.calls)?.push(Call {
            operation,
            kind,
            target: target.to_string(),
        });

        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let mut faults = lock(&self.faults)?;
        if let Some(fault) = faults.iter_mut().find(|f| {
            f.times > 0 && f.operation == operation && f.kind.is_none_or(|k| k == kind)
        }) {
            fault.times -= 1;
            log::debug!("sandbox: injecting {} on {operation} {kind}", fault.code);
            return Err(Error::from_code(&fault.code, "injected by sandbox"));
        }
        Ok(())
    }

    fn persist(&self, account: &Account) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| Error::Account {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(account)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    fn validate(
        &self,
        account: &Account,
        kind: ResourceKind,
        attributes: &Attributes,
        own_id: Option<&str>,
    ) -> Result<()> {
        let schema = kind.schema();

        for (name, value) in attributes {
            let spec = schema
                .attribute(name)
                .filter(|a| a.is_input())
                .ok_or_else(|| Error::InvalidParameter {
                    parameter: name.clone(),
                    message: format!("not an input of {kind}"),
                })?;
            if !value.is_null() && !spec.ty.matches(value) {
                return Err(Error::InvalidParameter {
                    parameter: name.clone(),
                    message: format!("expected {}", spec.ty.name()),
                });
            }
        }

        for spec in schema.required() {
            if present(attributes, spec.name).is_none() {
                return Err(Error::InvalidParameter {
                    parameter: spec.name.to_string(),
                    message: "is required".to_string(),
                });
            }
        }

        for (attr, target) in REFERENCES {
            let Some(value) = present(attributes, attr) else {
                continue;
            };
            for id in ids_in(value) {
                if !account.objects.get(id).is_some_and(|o| o.kind == *target) {
                    return Err(Error::NotFound {
                        kind: target.to_string(),
                        id: id.to_string(),
                    });
                }
            }
        }

        if kind == ResourceKind::Instance
            && let Some(Value::String(key_name)) = present(attributes, "key_name")
        {
            let registered = account.objects.values().any(|o| {
                o.kind == ResourceKind::KeyPair
                    && o.attributes.get("key_name").and_then(Value::as_str) == Some(key_name.as_str())
            });
            if !registered {
                return Err(Error::NotFound {
                    kind: ResourceKind::KeyPair.to_string(),
                    id: key_name.clone(),
                });
            }
        }

        if let Some(value) = present(attributes, "cidr_block") {
            let cidr = value
                .as_str()
                .and_then(Cidr::parse)
                .ok_or_else(|| Error::InvalidParameter {
                    parameter: "cidr_block".to_string(),
                    message: format!("{value} is not a valid CIDR block"),
                })?;
            if kind == ResourceKind::Subnet {
                check_subnet_placement(account, attributes, cidr, own_id)?;
            }
        }

        for group in schema.unique {
            let key: Vec<_> = group.iter().map(|a| present(attributes, a)).collect();
            if key.iter().any(Option::is_none) {
                continue;
            }
            let clash = account.objects.values().find(|o| {
                o.kind == kind
                    && Some(o.id.as_str()) != own_id
                    && group
                        .iter()
                        .zip(&key)
                        .all(|(a, v)| present(&o.attributes, a) == *v)
            });
            if let Some(existing) = clash {
                return Err(Error::Conflict {
                    message: format!(
                        "{kind} {} already uses the same {}",
                        existing.id,
                        group.join(" + ")
                    ),
                });
            }
        }

        Ok(())
    }

    fn computed_attributes(
        &self,
        account: &Account,
        kind: ResourceKind,
        id: &str,
        attributes: &Attributes,
        serial: u64,
    ) -> Attributes {
        let schema = kind.schema();
        let mut computed = Attributes::new();
        let host = serial % 250 + 4;

        if schema.attribute("arn").is_some() {
            computed.insert(
                "arn".to_string(),
                Value::String(format!("arn:sandbox:{}:{kind}/{id}", self.region)),
            );
        }

        match kind {
            ResourceKind::KeyPair => {
                let key = attributes
                    .get("public_key")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let hex = blake3::hash(key.as_bytes()).to_hex();
                let fingerprint = hex.as_str().as_bytes()[..32]
                    .chunks(2)
                    .map(|pair| String::from_utf8_lossy(pair).into_owned())
                    .collect::<Vec<_>>()
                    .join(":");
                computed.insert("fingerprint".to_string(), Value::String(fingerprint));
            }
            ResourceKind::Instance => {
                let subnet = attributes
                    .get("subnet_id")
                    .and_then(Value::as_str)
                    .and_then(|s| account.objects.get(s));
                let private_ip = subnet
                    .and_then(|s| s.attributes.get("cidr_block"))
                    .and_then(Value::as_str)
                    .and_then(Cidr::parse)
                    .map(|c| c.host(host as u32))
                    .unwrap_or_else(|| format!("10.0.0.{host}"));
                computed.insert("private_ip".to_string(), Value::String(private_ip));

                let public = attributes.get("associate_public_ip").and_then(Value::as_bool)
                    == Some(true)
                    || subnet
                        .and_then(|s| s.attributes.get("map_public_ip"))
                        .and_then(Value::as_bool)
                        == Some(true);
                if public {
                    computed.insert(
                        "public_ip".to_string(),
                        Value::String(format!("203.0.113.{host}")),
                    );
                    computed.insert(
                        "public_dns".to_string(),
                        Value::String(format!("ip-203-0-113-{host}.{}.sandbox", self.region)),
                    );
                } else {
                    computed.insert("public_ip".to_string(), Value::Null);
                    computed.insert("public_dns".to_string(), Value::Null);
                }
            }
            ResourceKind::ElasticIp => {
                computed.insert(
                    "public_ip".to_string(),
                    Value::String(format!("198.51.100.{host}")),
                );
            }
            _ => {}
        }

        computed
    }
}

impl CloudApi for Sandbox {
    fn create(
        &self,
        kind: ResourceKind,
        address: &str,
        attributes: &Attributes,
    ) -> Result<RemoteObject> {
        self.begin(Operation::Create, kind, address)?;
        let mut account = lock(&self.account)?;
        self.validate(&account, kind, attributes, None)?;

        account.serial += 1;
        let serial = account.serial;
        let id = generate_id(kind, address, serial);
        let mut stored = without_nulls(attributes);
        let computed = self.computed_attributes(&account, kind, &id, &stored, serial);
        stored.extend(computed);

        let now = Utc::now();
        let object = StoredObject {
            kind,
            id: id.clone(),
            address: address.to_string(),
            attributes: stored,
            created_at: now,
            updated_at: now,
        };
        let remote = object.to_remote();
        account.objects.insert(id, object);
        self.persist(&account)?;

        log::debug!("sandbox: created {kind} {} for {address}", remote.id);
        Ok(remote)
    }

    fn read(&self, kind: ResourceKind, id: &str) -> Result<Option<RemoteObject>> {
        self.begin(Operation::Read, kind, id)?;
        let account = lock(&self.account)?;
        Ok(account
            .objects
            .get(id)
            .filter(|o| o.kind == kind)
            .map(StoredObject::to_remote))
    }

    fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        attributes: &Attributes,
    ) -> Result<RemoteObject> {
        self.begin(Operation::Update, kind, id)?;
        let mut account = lock(&self.account)?;
        let existing = account
            .objects
            .get(id)
            .filter(|o| o.kind == kind)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            })?;
        self.validate(&account, kind, attributes, Some(id))?;

        let schema = kind.schema();
        if let Some(spec) = schema.inputs().find(|a| {
            a.force_new && present(&existing.attributes, a.name) != present(attributes, a.name)
        }) {
            return Err(Error::InvalidParameter {
                parameter: spec.name.to_string(),
                message: "cannot be changed in place".to_string(),
            });
        }

        let mut stored = without_nulls(attributes);
        for spec in schema.computed() {
            if let Some(value) = existing.attributes.get(spec.name) {
                stored.insert(spec.name.to_string(), value.clone());
            }
        }

        let object = StoredObject {
            attributes: stored,
            updated_at: Utc::now(),
            ..existing
        };
        let remote = object.to_remote();
        account.objects.insert(id.to_string(), object);
        self.persist(&account)?;

        log::debug!("sandbox: updated {kind} {id}");
        Ok(remote)
    }

    fn delete(&self, kind: ResourceKind, id: &str) -> Result<()> {
        self.begin(Operation::Delete, kind, id)?;
        let mut account = lock(&self.account)?;
        if !account.objects.get(id).is_some_and(|o| o.kind == kind) {
            return Err(Error::NotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }

        if let Some(dependent) = account
            .objects
            .values()
            .find(|o| o.id != id && references(&o.attributes, id))
        {
            return Err(Error::DependencyViolation {
                id: id.to_string(),
                dependent: dependent.id.clone(),
            });
        }

        account.objects.remove(id);
        self.persist(&account)?;
        log::debug!("sandbox: deleted {kind} {id}");
        Ok(())
    }

    fn lookup(&self, kind: ResourceKind, address: &str) -> Result<Option<RemoteObject>> {
        self.begin(Operation::Lookup, kind, address)?;
        let account = lock(&self.account)?;
        Ok(account
            .objects
            .values()
            .find(|o| o.kind == kind && o.address == address)
            .map(StoredObject::to_remote))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Other("sandbox lock poisoned".to_string()))
}

fn generate_id(kind: ResourceKind, address: &str, serial: u64) -> String {
    let seed = format!("{kind}|{address}|{serial}");
    let hex = blake3::hash(seed.as_bytes()).to_hex();
    format!("{}-{}", kind.id_prefix(), &hex.as_str()[..17])
}

/// Attribute value, treating explicit nulls as unset.
fn present<'a>(attributes: &'a Attributes, name: &str) -> Option<&'a Value> {
    attributes.get(name).filter(|v| !v.is_null())
}

fn without_nulls(attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn ids_in(value: &Value) -> Vec<&str> {
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn references(attributes: &Attributes, id: &str) -> bool {
    REFERENCES.iter().any(|(attr, _)| {
        attributes
            .get(*attr)
            .is_some_and(|v| ids_in(v).contains(&id))
    })
}

fn check_subnet_placement(
    account: &Account,
    attributes: &Attributes,
    cidr: Cidr,
    own_id: Option<&str>,
) -> Result<()> {
    let network_id = attributes
        .get("network_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let network_cidr = account
        .objects
        .get(network_id)
        .and_then(|n| n.attributes.get("cidr_block"))
        .and_then(Value::as_str)
        .and_then(Cidr::parse);

    if let Some(network_cidr) = network_cidr
        && !network_cidr.contains(&cidr)
    {
        return Err(Error::InvalidParameter {
            parameter: "cidr_block".to_string(),
            message: format!("{cidr} is outside network {network_id} ({network_cidr})"),
        });
    }

    let overlapping = account.objects.values().find(|o| {
        o.kind == ResourceKind::Subnet
            && Some(o.id.as_str()) != own_id
            && o.attributes.get("network_id").and_then(Value::as_str) == Some(network_id)
            && o
                .attributes
                .get("cidr_block")
                .and_then(Value::as_str)
                .and_then(Cidr::parse)
                .is_some_and(|other| other.overlaps(&cidr))
    });
    if let Some(other) = overlapping {
        return Err(Error::Conflict {
            message: format!("{cidr} overlaps subnet {}", other.id),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cidr {
    base: u32,
    prefix: u8,
}

impl Cidr {
    fn parse(s: &str) -> Option<Self> {
        let caps = CIDR.captures(s)?;
        let mut base = 0u32;
        for i in 1..=4 {
            let octet: u32 = caps[i].parse().ok()?;
            if octet > 255 {
                return None;
            }
            base = (base << 8) | octet;
        }
        let prefix: u8 = caps[5].parse().ok()?;
        if prefix > 32 {
            return None;
        }
        let cidr = Self { base, prefix };
        // Host bits must be zero
        (base & !cidr.mask() == 0).then_some(cidr)
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    fn contains(&self, other: &Cidr) -> bool {
        other.prefix >= self.prefix && other.base & self.mask() == self.base
    }

    fn overlaps(&self, other: &Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }

    fn host(&self, n: u32) -> String {
        let ip = self.base.wrapping_add(n);
        format!(
            "{}.{}.{}.{}",
            ip >> 24,
            (ip >> 16) & 0xff,
            (ip >> 8) & 0xff,
            ip & 0xff
        )
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.host(0), self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use serde_json::json;
    use tempfile::TempDir;

    fn attrs(value: Value) -> Attributes {
        value.as_object().unwrap().clone()
    }

    fn network(sandbox: &Sandbox) -> RemoteObject {
        sandbox
            .create(
                ResourceKind::Network,
                "network.ci",
                &attrs(json!({"cidr_block": "10.0.0.0/16"})),
            )
            .unwrap()
    }

    #[test]
    fn test_create_assigns_id_and_computed_attributes() {
        let sandbox = Sandbox::in_memory();
        let net = network(&sandbox);

        assert!(net.id.starts_with("net-"));
        assert_eq!(net.get("id"), Some(json!(net.id)));
        assert!(net.attributes["arn"].as_str().unwrap().ends_with(&net.id));
    }

    #[test]
    fn test_instance_gets_address_in_subnet() {
        let sandbox = Sandbox::in_memory();
        let net = network(&sandbox);
        let subnet = sandbox
            .create(
                ResourceKind::Subnet,
                "subnet.public",
                &attrs(json!({"network_id": net.id, "cidr_block": "10.0.1.0/24", "map_public_ip": true})),
            )
            .unwrap();
        let instance = sandbox
            .create(
                ResourceKind::Instance,
                "instance.ci",
                &attrs(json!({"image": "img-1", "instance_type": "small", "subnet_id": subnet.id})),
            )
            .unwrap();

        let private_ip = instance.attributes["private_ip"].as_str().unwrap();
        assert!(private_ip.starts_with("10.0.1."));
        assert!(instance.attributes["public_ip"].is_string());
    }

    #[test]
    fn test_rejects_missing_and_malformed_parameters() {
        let sandbox = Sandbox::in_memory();

        let err = sandbox
            .create(ResourceKind::Network, "network.a", &Attributes::new())
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidParameter);

        let err = sandbox
            .create(
                ResourceKind::Network,
                "network.b",
                &attrs(json!({"cidr_block": "10.0.0.1/16"})),
            )
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidParameter);
    }

    #[test]
    fn test_subnet_must_fit_network_and_not_overlap() {
        let sandbox = Sandbox::in_memory();
        let net = network(&sandbox);

        let outside = sandbox
            .create(
                ResourceKind::Subnet,
                "subnet.a",
                &attrs(json!({"network_id": net.id, "cidr_block": "192.168.0.0/24"})),
            )
            .unwrap_err();
        assert_eq!(outside.category(), ErrorCategory::InvalidParameter);

        sandbox
            .create(
                ResourceKind::Subnet,
                "subnet.b",
                &attrs(json!({"network_id": net.id, "cidr_block": "10.0.1.0/24"})),
            )
            .unwrap();
        let overlap = sandbox
            .create(
                ResourceKind::Subnet,
                "subnet.c",
                &attrs(json!({"network_id": net.id, "cidr_block": "10.0.1.0/25"})),
            )
            .unwrap_err();
        assert_eq!(overlap.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn test_unknown_reference_is_not_found() {
        let sandbox = Sandbox::in_memory();
        let err = sandbox
            .create(
                ResourceKind::Subnet,
                "subnet.a",
                &attrs(json!({"network_id": "net-missing", "cidr_block": "10.0.1.0/24"})),
            )
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_delete_refuses_referenced_object() {
        let sandbox = Sandbox::in_memory();
        let net = network(&sandbox);
        let subnet = sandbox
            .create(
                ResourceKind::Subnet,
                "subnet.a",
                &attrs(json!({"network_id": net.id, "cidr_block": "10.0.1.0/24"})),
            )
            .unwrap();

        let err = sandbox.delete(ResourceKind::Network, &net.id).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::DependencyViolation);

        sandbox.delete(ResourceKind::Subnet, &subnet.id).unwrap();
        sandbox.delete(ResourceKind::Network, &net.id).unwrap();
        assert!(sandbox.objects().is_empty());
    }

    #[test]
    fn test_update_rejects_force_new_attribute() {
        let sandbox = Sandbox::in_memory();
        let net = network(&sandbox);

        let err = sandbox
            .update(
                ResourceKind::Network,
                &net.id,
                &attrs(json!({"cidr_block": "10.1.0.0/16"})),
            )
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidParameter);

        let updated = sandbox
            .update(
                ResourceKind::Network,
                &net.id,
                &attrs(json!({"cidr_block": "10.0.0.0/16", "tags": {"Name": "ci"}})),
            )
            .unwrap();
        assert_eq!(updated.attributes["tags"], json!({"Name": "ci"}));
        assert_eq!(updated.attributes["arn"], net.attributes["arn"]);
    }

    #[test]
    fn test_injected_fault_is_used_up() {
        let sandbox = Sandbox::in_memory();
        sandbox.inject(
            Fault::new(Operation::Create, "Throttling")
                .on(ResourceKind::Network)
                .times(2),
        );

        let input = attrs(json!({"cidr_block": "10.0.0.0/16"}));
        for _ in 0..2 {
            let err = sandbox
                .create(ResourceKind::Network, "network.ci", &input)
                .unwrap_err();
            assert!(err.is_retryable());
        }
        assert!(sandbox.create(ResourceKind::Network, "network.ci", &input).is_ok());
        assert_eq!(sandbox.calls().len(), 3);
    }

    #[test]
    fn test_lookup_by_address() {
        let sandbox = Sandbox::in_memory();
        let net = network(&sandbox);

        let found = sandbox.lookup(ResourceKind::Network, "network.ci").unwrap();
        assert_eq!(found.map(|o| o.id), Some(net.id));
        assert!(
            sandbox
                .lookup(ResourceKind::Network, "network.other")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_account_persists_across_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sandbox.json");

        let id = {
            let sandbox = Sandbox::open(&path).unwrap();
            network(&sandbox).id
        };

        let reopened = Sandbox::open(&path).unwrap();
        assert!(reopened.exists(ResourceKind::Network, &id).unwrap());
    }

    #[test]
    fn test_cidr_math() {
        let net = Cidr::parse("10.0.0.0/16").unwrap();
        let sub = Cidr::parse("10.0.7.0/24").unwrap();
        assert!(net.contains(&sub));
        assert!(!sub.contains(&net));
        assert!(net.overlaps(&sub));
        assert_eq!(sub.to_string(), "10.0.7.0/24");
        assert!(Cidr::parse("300.0.0.0/8").is_none());
    }
}
