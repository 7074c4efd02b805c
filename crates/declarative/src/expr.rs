//! Attribute expressions
//!
//! Declared attribute values may reference variables and other resources'
//! attributes with `${...}`:
//!
//! - `"${var.cidr}"` keeps the variable's type (number, list, ...)
//! - `"http://${instance.web.public_ip}:8080"` renders into a string
//! - `"$${literal}"` escapes to the text `${literal}`
//!
//! Lists and tables are walked recursively.

use crate::types::{Address, is_identifier};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

static INTERPOLATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\$\{|\$\{([^}]*)\}").expect("valid interpolation regex"));

/// Something an expression reads from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    /// `var.NAME`
    Variable(String),
    /// `KIND.NAME.ATTRIBUTE`
    Attribute { address: Address, attribute: String },
}

impl Reference {
    /// Parse the text between `${` and `}`
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        let parts: Vec<&str> = text.split('.').collect();
        match parts.as_slice() {
            ["var", name] if is_identifier(name) => Ok(Reference::Variable((*name).to_string())),
            [kind, name, attribute] if is_identifier(attribute) => {
                let address = format!("{kind}.{name}")
                    .parse::<Address>()
                    .map_err(|e| format!("invalid reference '{text}': {e}"))?;
                Ok(Reference::Attribute {
                    address,
                    attribute: (*attribute).to_string(),
                })
            }
            _ => Err(format!(
                "invalid reference '{text}' (expected var.NAME or KIND.NAME.ATTRIBUTE)"
            )),
        }
    }

    /// The resource this reference points at, if any
    pub fn address(&self) -> Option<&Address> {
        match self {
            Reference::Variable(_) => None,
            Reference::Attribute { address, .. } => Some(address),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Variable(name) => write!(f, "var.{name}"),
            Reference::Attribute { address, attribute } => write!(f, "{address}.{attribute}"),
        }
    }
}

/// Piece of an interpolated string
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Ref(Reference),
}

/// A declared attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Plain value with no references
    Literal(Value),
    /// A string that is exactly one `${...}`
    Ref(Reference),
    /// A string mixing text and references
    Template(Vec<Segment>),
    List(Vec<Expr>),
    Map(BTreeMap<String, Expr>),
}

/// A value as far as it is known at plan time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Planned {
    Known(Value),
    /// Only known once the provider has created the referenced object
    Unknown,
}

impl Planned {
    pub fn known(&self) -> Option<&Value> {
        match self {
            Planned::Known(v) => Some(v),
            Planned::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Planned::Unknown)
    }
}

impl fmt::Display for Planned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Planned::Known(v) => write!(f, "{v}"),
            Planned::Unknown => write!(f, "(known after apply)"),
        }
    }
}

impl Expr {
    /// Parse a declared value, extracting `${...}` references from strings
    pub fn parse(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => parse_string(s),
            Value::Array(items) => items
                .iter()
                .map(Expr::parse)
                .collect::<Result<Vec<_>, _>>()
                .map(Expr::List),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), Expr::parse(v)?)))
                .collect::<Result<BTreeMap<_, _>, String>>()
                .map(Expr::Map),
            other => Ok(Expr::Literal(other.clone())),
        }
    }

    /// All references, in order of appearance
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ref(r) => out.push(r),
            Expr::Template(segments) => out.extend(segments.iter().filter_map(|s| match s {
                Segment::Ref(r) => Some(r),
                Segment::Text(_) => None,
            })),
            Expr::List(items) => items.iter().for_each(|e| e.collect_references(out)),
            Expr::Map(map) => map.values().for_each(|e| e.collect_references(out)),
        }
    }

    /// Substitute variable values. Returns the name of the first variable
    /// that has no value.
    pub fn bind_variables(&self, vars: &BTreeMap<String, Value>) -> Result<Expr, String> {
        let lookup = |name: &String| vars.get(name).cloned().ok_or_else(|| name.clone());

        Ok(match self {
            Expr::Literal(v) => Expr::Literal(v.clone()),
            Expr::Ref(Reference::Variable(name)) => Expr::Literal(lookup(name)?),
            Expr::Ref(r) => Expr::Ref(r.clone()),
            Expr::Template(segments) => {
                let mut bound = Vec::with_capacity(segments.len());
                for segment in segments {
                    match segment {
                        Segment::Ref(Reference::Variable(name)) => {
                            push_text(&mut bound, &render(&lookup(name)?));
                        }
                        Segment::Ref(r) => bound.push(Segment::Ref(r.clone())),
                        Segment::Text(t) => push_text(&mut bound, t),
                    }
                }
                collapse(bound)
            }
            Expr::List(items) => Expr::List(
                items
                    .iter()
                    .map(|e| e.bind_variables(vars))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::Map(map) => Expr::Map(
                map.iter()
                    .map(|(k, e)| Ok((k.clone(), e.bind_variables(vars)?)))
                    .collect::<Result<_, String>>()?,
            ),
        })
    }

    /// Evaluate with the given reference resolver. Any unknown part makes
    /// the whole value unknown.
    pub fn eval(&self, resolve: &dyn Fn(&Reference) -> Planned) -> Planned {
        match self {
            Expr::Literal(v) => Planned::Known(v.clone()),
            Expr::Ref(r) => resolve(r),
            Expr::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => out.push_str(t),
                        Segment::Ref(r) => match resolve(r) {
                            Planned::Known(v) => out.push_str(&render(&v)),
                            Planned::Unknown => return Planned::Unknown,
                        },
                    }
                }
                Planned::Known(Value::String(out))
            }
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item.eval(resolve) {
                        Planned::Known(v) => out.push(v),
                        Planned::Unknown => return Planned::Unknown,
                    }
                }
                Planned::Known(Value::Array(out))
            }
            Expr::Map(map) => {
                let mut out = serde_json::Map::new();
                for (k, e) in map {
                    match e.eval(resolve) {
                        Planned::Known(v) => {
                            out.insert(k.clone(), v);
                        }
                        Planned::Unknown => return Planned::Unknown,
                    }
                }
                Planned::Known(Value::Object(out))
            }
        }
    }

    /// The literal value, if the expression has no references
    pub fn as_literal(&self) -> Option<Value> {
        match self.eval(&|_| Planned::Unknown) {
            Planned::Known(v) => Some(v),
            Planned::Unknown => None,
        }
    }

    /// Whether this expression always produces a string
    pub fn is_string_valued(&self) -> bool {
        match self {
            Expr::Literal(v) => v.is_string(),
            Expr::Template(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Ref(r) => write!(f, "\"${{{r}}}\""),
            Expr::Template(segments) => {
                write!(f, "\"")?;
                for segment in segments {
                    match segment {
                        Segment::Text(t) => write!(f, "{}", t.replace("${", "$${"))?,
                        Segment::Ref(r) => write!(f, "${{{r}}}")?,
                    }
                }
                write!(f, "\"")
            }
            Expr::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Expr::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Render a value into interpolated text
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_string(s: &str) -> Result<Expr, String> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in INTERPOLATION.captures_iter(s) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        push_text(&mut segments, &s[last..whole.start()]);
        last = whole.end();
        match caps.get(1) {
            Some(inner) => segments.push(Segment::Ref(Reference::parse(inner.as_str())?)),
            None => push_text(&mut segments, "${"),
        }
    }
    push_text(&mut segments, &s[last..]);

    if s[last..].contains("${") {
        return Err(format!("unterminated reference in '{s}'"));
    }

    Ok(collapse(segments))
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text(prev)) = segments.last_mut() {
        prev.push_str(text);
    } else {
        segments.push(Segment::Text(text.to_string()));
    }
}

fn collapse(mut segments: Vec<Segment>) -> Expr {
    if segments.len() > 1 {
        return Expr::Template(segments);
    }
    match segments.pop() {
        None => Expr::Literal(Value::String(String::new())),
        Some(Segment::Text(t)) => Expr::Literal(Value::String(t)),
        Some(Segment::Ref(r)) => Expr::Ref(r),
    }
}
