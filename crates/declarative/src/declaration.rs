//! Declaration files
//!
//! A configuration is every `*.toml` file in one directory (not recursive,
//! sorted by name), except the tool's own `stratum.toml`. Each file may hold
//! three kinds of blocks:
//!
//! ```toml
//! [variable.cidr]
//! type = "string"
//! default = "10.0.0.0/16"
//!
//! [resource.network.main]
//! cidr_block = "${var.cidr}"
//! depends_on = []
//! prevent_destroy = true
//!
//! [output.network_id]
//! value = "${network.main.id}"
//! ```

use crate::error::{Error, Result};
use crate::types::{Address, is_identifier};
use cloudkit::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Settings file living next to declarations; never parsed as one
pub const CONFIG_FILE: &str = "stratum.toml";

/// Prefix of environment variables that set variable values
pub const ENV_PREFIX: &str = "STRATUM_VAR_";

/// Type constraint of a variable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Number,
    Bool,
    List,
    Map,
    #[default]
    Any,
}

impl VariableType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            VariableType::String => value.is_string(),
            VariableType::Number => value.is_number(),
            VariableType::Bool => value.is_boolean(),
            VariableType::List => value.is_array(),
            VariableType::Map => value.is_object(),
            VariableType::Any => true,
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VariableType::String => "string",
            VariableType::Number => "number",
            VariableType::Bool => "bool",
            VariableType::List => "list",
            VariableType::Map => "map",
            VariableType::Any => "any",
        };
        write!(f, "{s}")
    }
}

/// A `[resource.KIND.NAME]` block
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBlock {
    pub address: Address,
    /// Declared attributes, still containing `${...}` expressions
    pub attributes: BTreeMap<String, Value>,
    /// Explicit ordering dependencies
    pub depends_on: Vec<Address>,
    pub prevent_destroy: bool,
    /// File the block came from
    pub source: PathBuf,
}

/// A `[variable.NAME]` block
#[derive(Debug, Clone, PartialEq)]
pub struct VariableBlock {
    pub name: String,
    pub ty: VariableType,
    pub default: Option<Value>,
    pub description: Option<String>,
    pub source: PathBuf,
}

/// An `[output.NAME]` block
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBlock {
    pub name: String,
    pub value: Value,
    pub description: Option<String>,
    pub sensitive: bool,
    pub source: PathBuf,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFile {
    #[serde(default)]
    variable: BTreeMap<String, RawVariable>,
    #[serde(default)]
    resource: BTreeMap<String, BTreeMap<String, toml::Table>>,
    #[serde(default)]
    output: BTreeMap<String, RawOutput>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVariable {
    #[serde(rename = "type", default)]
    ty: VariableType,
    default: Option<toml::Value>,
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOutput {
    value: toml::Value,
    description: Option<String>,
    #[serde(default)]
    sensitive: bool,
}

/// All blocks of a configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Declarations {
    pub resources: BTreeMap<Address, ResourceBlock>,
    pub variables: BTreeMap<String, VariableBlock>,
    pub outputs: BTreeMap<String, OutputBlock>,
}

impl Declarations {
    /// Load and merge every declaration file in `dir`
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let files = declaration_files(dir)?;
        if files.is_empty() {
            return Err(Error::Parse {
                path: dir.to_path_buf(),
                message: "no *.toml declaration files found".to_string(),
            });
        }

        let mut merged = Declarations::default();
        for path in files {
            log::debug!("Loading declarations from {}", path.display());
            let content = fs::read_to_string(&path)?;
            merged.merge(Self::parse_str(&content, &path)?)?;
        }

        log::info!(
            "Loaded {} resources, {} variables, {} outputs from {}",
            merged.resources.len(),
            merged.variables.len(),
            merged.outputs.len(),
            dir.display()
        );
        Ok(merged)
    }

    /// Parse one declaration file
    pub fn parse_str(content: &str, path: &Path) -> Result<Self> {
        let parse_err = |message: String| Error::Parse {
            path: path.to_path_buf(),
            message,
        };
        let raw: RawFile = toml::from_str(content).map_err(|e| parse_err(e.to_string()))?;
        let mut decls = Declarations::default();

        for (name, var) in raw.variable {
            if !is_identifier(&name) {
                return Err(parse_err(format!("invalid variable name '{name}'")));
            }
            let default = var
                .default
                .map(to_json)
                .transpose()
                .map_err(|message| Error::InvalidVariable {
                    name: name.clone(),
                    message: format!("default: {message}"),
                })?;
            if let Some(value) = &default
                && !var.ty.matches(value)
            {
                return Err(Error::InvalidVariable {
                    name,
                    message: format!("default {value} is not of type {}", var.ty),
                });
            }
            decls.variables.insert(
                name.clone(),
                VariableBlock {
                    name,
                    ty: var.ty,
                    default,
                    description: var.description,
                    source: path.to_path_buf(),
                },
            );
        }

        for (kind, blocks) in raw.resource {
            for (name, table) in blocks {
                let block = resource_block(&kind, &name, table, path)?;
                decls.resources.insert(block.address.clone(), block);
            }
        }

        for (name, output) in raw.output {
            if !is_identifier(&name) {
                return Err(parse_err(format!("invalid output name '{name}'")));
            }
            let value = to_json(output.value)
                .map_err(|message| parse_err(format!("output '{name}': {message}")))?;
            decls.outputs.insert(
                name.clone(),
                OutputBlock {
                    name,
                    value,
                    description: output.description,
                    sensitive: output.sensitive,
                    source: path.to_path_buf(),
                },
            );
        }

        Ok(decls)
    }

    /// Merge another file's blocks into this set
    pub fn merge(&mut self, other: Declarations) -> Result<()> {
        for (address, block) in other.resources {
            if let Some(existing) = self.resources.get(&address) {
                return Err(Error::DuplicateDeclaration {
                    what: format!("resource {address}"),
                    first: existing.source.clone(),
                    second: block.source,
                });
            }
            self.resources.insert(address, block);
        }
        for (name, block) in other.variables {
            if let Some(existing) = self.variables.get(&name) {
                return Err(Error::DuplicateDeclaration {
                    what: format!("variable {name}"),
                    first: existing.source.clone(),
                    second: block.source,
                });
            }
            self.variables.insert(name, block);
        }
        for (name, block) in other.outputs {
            if let Some(existing) = self.outputs.get(&name) {
                return Err(Error::DuplicateDeclaration {
                    what: format!("output {name}"),
                    first: existing.source.clone(),
                    second: block.source,
                });
            }
            self.outputs.insert(name, block);
        }
        Ok(())
    }

    /// Resolve variable values from defaults, the environment and overrides
    pub fn variable_values(
        &self,
        overrides: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, Value>> {
        self.variable_values_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve variable values with a custom environment lookup
    ///
    /// Priority, lowest first: declared default, `STRATUM_VAR_<name>`,
    /// overrides.
    pub fn variable_values_with(
        &self,
        overrides: &BTreeMap<String, String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<BTreeMap<String, Value>> {
        if let Some(unknown) = overrides.keys().find(|k| !self.variables.contains_key(*k)) {
            return Err(Error::InvalidVariable {
                name: unknown.clone(),
                message: "is not declared".to_string(),
            });
        }

        let mut values = BTreeMap::new();
        for (name, var) in &self.variables {
            let raw = overrides
                .get(name)
                .cloned()
                .or_else(|| env(&format!("{ENV_PREFIX}{name}")));
            let value = match raw {
                Some(raw) => parse_value(&raw, var.ty),
                None => var.default.clone().ok_or_else(|| Error::InvalidVariable {
                    name: name.clone(),
                    message: format!(
                        "has no value (set a default, {ENV_PREFIX}{name} or --var {name}=...)"
                    ),
                })?,
            };
            if !var.ty.matches(&value) {
                return Err(Error::InvalidVariable {
                    name: name.clone(),
                    message: format!("{value} is not of type {}", var.ty),
                });
            }
            values.insert(name.clone(), value);
        }
        Ok(values)
    }
}

/// Parse a variable value given on the command line or in the environment.
///
/// Values are read as TOML literals (`3`, `true`, `["a", "b"]`) when they
/// parse as one, otherwise taken as a plain string. String-typed variables
/// always take the raw text.
pub fn parse_value(raw: &str, ty: VariableType) -> Value {
    if ty == VariableType::String {
        return Value::String(raw.to_string());
    }
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .and_then(|v| to_json(v).ok())
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

fn declaration_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| Error::Parse {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path.extension().is_some_and(|e| e == "toml")
            && entry.file_name() != CONFIG_FILE
        {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn resource_block(kind: &str, name: &str, mut table: toml::Table, path: &Path) -> Result<ResourceBlock> {
    let invalid = |message: String| Error::InvalidResource {
        address: format!("{kind}.{name}"),
        message,
    };

    let kind = kind
        .parse::<ResourceKind>()
        .map_err(|e| invalid(e.to_string()))?;
    if !is_identifier(name) {
        return Err(invalid(format!("invalid resource name '{name}'")));
    }

    let depends_on = match table.remove("depends_on") {
        None => Vec::new(),
        Some(toml::Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                toml::Value::String(s) => s
                    .parse::<Address>()
                    .map_err(|e| invalid(format!("depends_on: {e}"))),
                other => Err(invalid(format!("depends_on: expected address, got {other}"))),
            })
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(invalid(format!(
                "depends_on must be a list of addresses, got {other}"
            )));
        }
    };

    let prevent_destroy = match table.remove("prevent_destroy") {
        None => false,
        Some(toml::Value::Boolean(b)) => b,
        Some(other) => {
            return Err(invalid(format!("prevent_destroy must be a bool, got {other}")));
        }
    };

    let attributes = table
        .into_iter()
        .map(|(k, v)| match to_json(v) {
            Ok(value) => Ok((k, value)),
            Err(message) => Err(invalid(format!("attribute '{k}': {message}"))),
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(ResourceBlock {
        address: Address::new(kind, name),
        attributes,
        depends_on,
        prevent_destroy,
        source: path.to_path_buf(),
    })
}

/// Convert a TOML value to JSON. NaN and infinities have no JSON form.
fn to_json(value: toml::Value) -> std::result::Result<Value, String> {
    Ok(match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| format!("{f} is not a finite number"))?,
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(d) => Value::String(d.to_string()),
        toml::Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<std::result::Result<_, _>>()?,
        ),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| to_json(v).map(|v| (k, v)))
                .collect::<std::result::Result<_, _>>()?,
        ),
    })
}
