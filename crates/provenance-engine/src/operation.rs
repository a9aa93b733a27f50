//! The operation record model.
//!
//! Every instrumented evaluation step produces one [`OperationLog`]. Logs reference the logs
//! that produced their inputs by [`OperationId`] rather than by pointer, so a log graph can be
//! shipped to a store and traversed remotely exactly like the in-memory arena.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ast::SourceLocation;
use crate::value::{format_number, Value};

/// Stable identifier of an [`OperationLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    MemberExpression,
    BinaryExpression,
    CallExpression,
    FunctionArgument,
    ObjectExpression,
    StringLiteral,
    NumericLiteral,
    ArrayExpression,
    ReturnStatement,
    Identifier,
    AssignmentExpression,
    MemexpAsLeftAssExp,
}

impl OperationKind {
    pub const ALL: [OperationKind; 12] = [
        Self::MemberExpression,
        Self::BinaryExpression,
        Self::CallExpression,
        Self::FunctionArgument,
        Self::ObjectExpression,
        Self::StringLiteral,
        Self::NumericLiteral,
        Self::ArrayExpression,
        Self::ReturnStatement,
        Self::Identifier,
        Self::AssignmentExpression,
        Self::MemexpAsLeftAssExp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MemberExpression => "memberExpression",
            Self::BinaryExpression => "binaryExpression",
            Self::CallExpression => "callExpression",
            Self::FunctionArgument => "functionArgument",
            Self::ObjectExpression => "objectExpression",
            Self::StringLiteral => "stringLiteral",
            Self::NumericLiteral => "numericLiteral",
            Self::ArrayExpression => "arrayExpression",
            Self::ReturnStatement => "returnStatement",
            Self::Identifier => "identifier",
            Self::AssignmentExpression => "assignmentExpression",
            Self::MemexpAsLeftAssExp => "memexpAsLeftAssExp",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compile-time constant captured from syntax. Never carries provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StaticValue {
    Text(String),
    List(Vec<String>),
}

impl StaticValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            Self::Text(_) => None,
        }
    }
}

impl From<&str> for StaticValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Snapshot of a runtime value as stored in a log.
///
/// Primitives are kept exactly (traversal needs string contents); reference values keep only
/// their display form so logs never keep program objects alive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum RecordedValue {
    Undefined,
    Null,
    Bool(bool),
    Number(#[serde(with = "number_repr")] f64),
    String(String),
    Object(String),
    Array(String),
    Function(String),
}

/// JSON has no NaN / Infinity; those are written as their display strings.
mod number_repr {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(n: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if n.is_finite() {
            serializer.serialize_f64(*n)
        } else {
            serializer.serialize_str(&crate::value::format_number(*n))
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(s) => match s.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(serde::de::Error::custom(format!(
                    "invalid number `{other}`"
                ))),
            },
        }
    }
}

impl RecordedValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Length in characters when the value is a string.
    pub fn char_len(&self) -> Option<usize> {
        self.as_str().map(|s| s.chars().count())
    }

    pub fn display(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) | Self::Object(s) | Self::Array(s) | Self::Function(s) => s.clone(),
        }
    }
}

impl From<&Value> for RecordedValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Undefined => Self::Undefined,
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(*n),
            Value::String(s) => Self::String(s.clone()),
            Value::Object(_) => Self::Object(value.to_display_string()),
            Value::Array(_) => Self::Array(value.to_display_string()),
            Value::Function(_) => Self::Function(value.to_display_string()),
        }
    }
}

/// A recorded value paired with the log that produced it (`None` when untracked).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedArg {
    pub value: RecordedValue,
    pub origin: Option<OperationId>,
}

impl TrackedArg {
    pub fn new(value: RecordedValue, origin: Option<OperationId>) -> Self {
        Self { value, origin }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationArg {
    Single(TrackedArg),
    /// Array-valued argument; enumerated as `element0`, `element1`, ...
    Array(Vec<TrackedArg>),
}

impl OperationArg {
    pub fn as_single(&self) -> Option<&TrackedArg> {
        match self {
            Self::Single(arg) => Some(arg),
            Self::Array(_) => None,
        }
    }
}

/// One entry of [`OperationLog::arguments_array`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentEntry {
    pub origin: Option<OperationId>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLog {
    pub id: OperationId,
    pub kind: OperationKind,
    pub args: IndexMap<String, OperationArg>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra_args: IndexMap<String, OperationArg>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub static_args: IndexMap<String, StaticValue>,
    pub result: RecordedValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
}

impl OperationLog {
    pub fn arg(&self, name: &str) -> Option<&TrackedArg> {
        self.args.get(name).and_then(OperationArg::as_single)
    }

    pub fn extra_arg(&self, name: &str) -> Option<&TrackedArg> {
        self.extra_args.get(name).and_then(OperationArg::as_single)
    }

    pub fn static_arg(&self, name: &str) -> Option<&str> {
        self.static_args.get(name).and_then(StaticValue::as_text)
    }

    /// Flattened `(origin, name)` view over `args` then `extra_args`, expanding array-valued
    /// arguments into one `elementN` entry per element. Order is stable.
    pub fn arguments_array(&self) -> Vec<ArgumentEntry> {
        let mut out = Vec::new();
        for args in [&self.args, &self.extra_args] {
            for (name, arg) in args {
                match arg {
                    OperationArg::Single(arg) => out.push(ArgumentEntry {
                        origin: arg.origin,
                        name: name.clone(),
                    }),
                    OperationArg::Array(items) => {
                        out.extend(items.iter().enumerate().map(|(i, item)| ArgumentEntry {
                            origin: item.origin,
                            name: format!("element{i}"),
                        }))
                    }
                }
            }
        }
        out
    }
}

/// Read access to a collection of logs keyed by id.
pub trait OperationLookup {
    fn operation(&self, id: OperationId) -> Option<&OperationLog>;

    /// Number of logs available; bounds the length of any traversal.
    fn operation_count(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tracked(value: &str, origin: Option<u64>) -> TrackedArg {
        TrackedArg::new(RecordedValue::String(value.to_string()), origin.map(OperationId))
    }

    #[test]
    fn arguments_array_expands_array_arguments_and_appends_extra_args() {
        let mut args = IndexMap::new();
        args.insert(
            "elements".to_string(),
            OperationArg::Array(vec![tracked("a", Some(1)), tracked("b", None)]),
        );
        args.insert("context".to_string(), OperationArg::Single(tracked("c", Some(3))));
        let mut extra_args = IndexMap::new();
        extra_args.insert(
            "returnValue".to_string(),
            OperationArg::Single(tracked("r", Some(4))),
        );
        let log = OperationLog {
            id: OperationId(5),
            kind: OperationKind::CallExpression,
            args,
            extra_args,
            static_args: IndexMap::new(),
            result: RecordedValue::Undefined,
            loc: None,
        };

        let entries: Vec<(Option<OperationId>, String)> = log
            .arguments_array()
            .into_iter()
            .map(|e| (e.origin, e.name))
            .collect();
        assert_eq!(
            entries,
            vec![
                (Some(OperationId(1)), "element0".to_string()),
                (None, "element1".to_string()),
                (Some(OperationId(3)), "context".to_string()),
                (Some(OperationId(4)), "returnValue".to_string()),
            ]
        );
    }

    #[test]
    fn kind_names_match_serialized_form() {
        for kind in OperationKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
