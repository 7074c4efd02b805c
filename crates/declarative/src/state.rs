//! State store
//!
//! The state file maps every applied resource address to what the provider
//! reported for it. It is JSON with a format version, a serial that grows
//! with every write, and a BLAKE3 checksum of the content:
//!
//! ```json
//! {
//!   "version": 1,
//!   "serial": 7,
//!   "last_updated": "2026-01-01T00:00:00Z",
//!   "resources": [ { "address": "network.ci", "remote_id": "net-...", ... } ],
//!   "pending": [],
//!   "outputs": {},
//!   "checksum": "blake3:..."
//! }
//! ```
//!
//! Each mutation is written to a temporary file in the same directory and
//! renamed over the old one, so a crash leaves either the old or the new
//! file. A `<state>.lock` file keeps two runs from sharing one state.

use crate::error::{Error, Result};
use crate::types::{Action, Address};
use chrono::{DateTime, Utc};
use cloudkit::{Attributes, RemoteObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current state file format
pub const STATE_VERSION: u32 = 1;

/// Default state file name
pub const DEFAULT_STATE_FILE: &str = "stratum.state.json";

/// What is known about one applied resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub address: Address,
    /// Provider-assigned id
    pub remote_id: String,
    /// Input attributes as last applied
    pub attributes: Attributes,
    /// Attributes computed by the provider
    #[serde(default)]
    pub computed: Attributes,
    /// Resources this one depended on when applied
    #[serde(default)]
    pub dependencies: Vec<Address>,
    pub applied_at: DateTime<Utc>,
}

impl StateRecord {
    /// Build a record from what the provider returned
    pub fn from_remote(address: Address, object: &RemoteObject, dependencies: Vec<Address>) -> Self {
        let schema = address.kind.schema();
        let mut attributes = Attributes::new();
        let mut computed = Attributes::new();
        for (name, value) in &object.attributes {
            match schema.attribute(name) {
                Some(spec) if spec.is_input() => {
                    attributes.insert(name.clone(), value.clone());
                }
                Some(_) => {
                    computed.insert(name.clone(), value.clone());
                }
                None => log::debug!("{address}: ignoring unknown remote attribute '{name}'"),
            }
        }

        Self {
            address,
            remote_id: object.id.clone(),
            attributes,
            computed,
            dependencies,
            applied_at: Utc::now(),
        }
    }

    /// Value of an input or computed attribute; `id` is the remote id
    pub fn value(&self, attribute: &str) -> Value {
        if attribute == "id" {
            return Value::String(self.remote_id.clone());
        }
        self.computed
            .get(attribute)
            .or_else(|| self.attributes.get(attribute))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// A provider call that was issued but whose result is not recorded yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub address: Address,
    pub operation: Action,
    #[serde(default)]
    pub dependencies: Vec<Address>,
    pub started_at: DateTime<Utc>,
}

impl PendingEntry {
    pub fn new(address: Address, operation: Action, dependencies: Vec<Address>) -> Self {
        Self {
            address,
            operation,
            dependencies,
            started_at: Utc::now(),
        }
    }
}

/// An evaluated output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: Value,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// In-memory view of a state file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    pub serial: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub resources: BTreeMap<Address, StateRecord>,
    pub pending: BTreeMap<Address, PendingEntry>,
    pub outputs: BTreeMap<String, OutputValue>,
}

#[derive(Serialize, Deserialize)]
struct StateBody {
    serial: u64,
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    resources: Vec<StateRecord>,
    #[serde(default)]
    pending: Vec<PendingEntry>,
    #[serde(default)]
    outputs: BTreeMap<String, OutputValue>,
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(flatten)]
    body: StateBody,
    checksum: String,
}

fn checksum(body: &StateBody) -> Result<String> {
    let bytes = serde_json::to_vec(body)?;
    Ok(format!("blake3:{}", blake3::hash(&bytes).to_hex()))
}

impl State {
    /// Load a state file without locking it. A missing file is empty state.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file {} does not exist, using empty state", path.display());
            return Ok(Self::default());
        }

        let corrupt = |message: String| Error::StateCorruption {
            path: path.to_path_buf(),
            message,
        };

        let content = fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
        let raw: Value =
            serde_json::from_str(&content).map_err(|e| corrupt(format!("not valid JSON: {e}")))?;
        match raw.get("version").and_then(Value::as_u64) {
            Some(v) if v == u64::from(STATE_VERSION) => {}
            Some(v) => return Err(corrupt(format!("unsupported format version {v}"))),
            None => return Err(corrupt("missing format version".to_string())),
        }

        let file: StateFile = serde_json::from_value(raw).map_err(|e| corrupt(e.to_string()))?;
        let expected = checksum(&file.body)?;
        if file.checksum != expected {
            return Err(corrupt(
                "checksum mismatch (the file was modified outside stratum)".to_string(),
            ));
        }

        let mut state = State {
            serial: file.body.serial,
            last_updated: file.body.last_updated,
            outputs: file.body.outputs,
            ..Default::default()
        };
        for record in file.body.resources {
            let address = record.address.clone();
            if state.resources.insert(address.clone(), record).is_some() {
                return Err(corrupt(format!("{address} is recorded twice")));
            }
        }
        for entry in file.body.pending {
            state.pending.insert(entry.address.clone(), entry);
        }

        log::debug!(
            "Loaded state serial {} with {} resources from {}",
            state.serial,
            state.resources.len(),
            path.display()
        );
        Ok(state)
    }

    /// Look up a record
    pub fn get(&self, address: &Address) -> Option<&StateRecord> {
        self.resources.get(address)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.pending.is_empty()
    }

    fn to_file(&self) -> Result<StateFile> {
        let body = StateBody {
            serial: self.serial,
            last_updated: self.last_updated,
            resources: self.resources.values().cloned().collect(),
            pending: self.pending.values().cloned().collect(),
            outputs: self.outputs.clone(),
        };
        let checksum = checksum(&body)?;
        Ok(StateFile {
            version: STATE_VERSION,
            body,
            checksum,
        })
    }
}

/// Exclusive lock on a state file, released on drop
#[derive(Debug)]
struct StateLock {
    path: PathBuf,
}

impl StateLock {
    fn acquire(state_path: &Path) -> Result<Self> {
        let mut lock_path = state_path.as_os_str().to_owned();
        lock_path.push(".lock");
        let path = PathBuf::from(lock_path);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::StateLocked {
                    path: state_path.to_path_buf(),
                    lock: path,
                });
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "pid {} since {}", std::process::id(), Utc::now().to_rfc3339())?;

        log::debug!("Acquired state lock {}", path.display());
        Ok(Self { path })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to remove state lock {}: {}", self.path.display(), e);
        }
    }
}

/// Locked, writable state file
///
/// Every mutation is persisted before it returns.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: State,
    _lock: StateLock,
}

impl StateStore {
    /// Lock and load the state file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let lock = StateLock::acquire(path)?;
        let state = State::load(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            state,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn get(&self, address: &Address) -> Option<&StateRecord> {
        self.state.resources.get(address)
    }

    /// Record a successfully applied resource, clearing its pending entry
    pub fn record(&mut self, record: StateRecord) -> Result<()> {
        self.commit(|state| {
            state.pending.remove(&record.address);
            state.resources.insert(record.address.clone(), record);
        })
    }

    /// Remove a destroyed resource
    pub fn remove(&mut self, address: &Address) -> Result<Option<StateRecord>> {
        self.commit(|state| state.resources.remove(address))
    }

    /// Note that a call is about to be issued for a resource
    pub fn begin(&mut self, entry: PendingEntry) -> Result<()> {
        self.commit(|state| {
            state.pending.insert(entry.address.clone(), entry);
        })
    }

    /// Drop a pending entry after its call failed or was resolved
    pub fn clear_pending(&mut self, address: &Address) -> Result<()> {
        if self.state.pending.contains_key(address) {
            self.commit(|state| {
                state.pending.remove(address);
            })?;
        }
        Ok(())
    }

    /// Replace the stored outputs
    pub fn set_outputs(&mut self, outputs: BTreeMap<String, OutputValue>) -> Result<()> {
        self.commit(|state| state.outputs = outputs)
    }

    /// Apply `change` to a copy of the state, write it, then adopt it.
    /// A failed write leaves the in-memory state as it was.
    fn commit<T>(&mut self, change: impl FnOnce(&mut State) -> T) -> Result<T> {
        let mut next = self.state.clone();
        let value = change(&mut next);
        next.serial += 1;
        next.last_updated = Some(Utc::now());
        self.write(&next)?;
        self.state = next;
        Ok(value)
    }

    fn write(&self, state: &State) -> Result<()> {
        let content = serde_json::to_string_pretty(&state.to_file()?)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        log::trace!(
            "Wrote state serial {} to {}",
            state.serial,
            self.path.display()
        );
        Ok(())
    }
}
