//! Native methods on primitive and array values, and the default globals.
//!
//! Natives are opaque to provenance tracking: their results carry no origin.

use crate::error::{ProvenanceError, ProvenanceResult};
use crate::value::{format_number, ArrayRef, JsObject, NativeFunction, ObjectRef, PropertySlot, Value};

/// Resolve `receiver.key` for receivers whose properties are not stored in an object.
pub(crate) fn primitive_property(receiver: &Value, key: &str) -> Option<Value> {
    match receiver {
        Value::String(s) => string_property(s, key),
        Value::Array(arr) => array_property(arr, key),
        Value::Number(_) | Value::Bool(_) if key == "toString" => Some(method("toString", |this, _| {
            Ok(Value::String(this.to_display_string()))
        })),
        Value::Function(func) if key == "name" => Some(Value::String(func.name().to_string())),
        _ => None,
    }
}

fn method(
    name: &str,
    func: impl Fn(&Value, &[Value]) -> ProvenanceResult<Value> + 'static,
) -> Value {
    Value::Function(std::rc::Rc::new(crate::value::JsFunction::Native(
        NativeFunction::new(name, func),
    )))
}

fn index_key(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    key.parse().ok()
}

/// Clamp a relative index the way `slice` does.
fn relative_index(arg: Option<&Value>, len: usize, default: usize) -> usize {
    let Some(arg) = arg.filter(|v| !matches!(v, Value::Undefined)) else {
        return default;
    };
    let n = arg.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn this_string(this: &Value) -> ProvenanceResult<String> {
    match this {
        Value::String(s) => Ok(s.clone()),
        other => Err(ProvenanceError::Runtime(format!(
            "string method called on {}",
            other.type_of()
        ))),
    }
}

fn this_array(this: &Value) -> ProvenanceResult<ArrayRef> {
    match this {
        Value::Array(arr) => Ok(arr.clone()),
        other => Err(ProvenanceError::Runtime(format!(
            "array method called on {}",
            other.type_of()
        ))),
    }
}

fn string_property(s: &str, key: &str) -> Option<Value> {
    if key == "length" {
        return Some(Value::Number(s.chars().count() as f64));
    }
    if let Some(index) = index_key(key) {
        return Some(
            s.chars()
                .nth(index)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Undefined),
        );
    }
    let value = match key {
        "toUpperCase" => method(key, |this, _| Ok(Value::String(this_string(this)?.to_uppercase()))),
        "toLowerCase" => method(key, |this, _| Ok(Value::String(this_string(this)?.to_lowercase()))),
        "trim" => method(key, |this, _| Ok(Value::String(this_string(this)?.trim().to_string()))),
        "toString" => method(key, |this, _| Ok(Value::String(this_string(this)?))),
        "charAt" => method(key, |this, args| {
            let s = this_string(this)?;
            let index = args.first().map(Value::to_number).unwrap_or(0.0);
            let c = if index >= 0.0 {
                s.chars().nth(index as usize)
            } else {
                None
            };
            Ok(Value::String(c.map(String::from).unwrap_or_default()))
        }),
        "slice" => method(key, |this, args| {
            let chars: Vec<char> = this_string(this)?.chars().collect();
            let start = relative_index(args.first(), chars.len(), 0);
            let end = relative_index(args.get(1), chars.len(), chars.len());
            Ok(Value::String(chars.get(start..end.max(start)).unwrap_or_default().iter().collect()))
        }),
        "indexOf" => method(key, |this, args| {
            let s = this_string(this)?;
            let needle = args
                .first()
                .map(Value::to_display_string)
                .unwrap_or_else(|| "undefined".to_string());
            Ok(Value::Number(match s.find(&needle) {
                Some(byte) => s[..byte].chars().count() as f64,
                None => -1.0,
            }))
        }),
        _ => return None,
    };
    Some(value)
}

fn array_property(arr: &ArrayRef, key: &str) -> Option<Value> {
    if key == "length" {
        return Some(Value::Number(arr.borrow().len() as f64));
    }
    if let Some(index) = index_key(key) {
        return Some(arr.borrow().get(index).cloned().unwrap_or(Value::Undefined));
    }
    let value = match key {
        "push" => method(key, |this, args| {
            let arr = this_array(this)?;
            let mut items = arr.borrow_mut();
            items.extend(args.iter().cloned());
            Ok(Value::Number(items.len() as f64))
        }),
        "pop" => method(key, |this, _| {
            Ok(this_array(this)?.borrow_mut().pop().unwrap_or(Value::Undefined))
        }),
        "join" => method(key, |this, args| {
            let separator = match args.first() {
                None | Some(Value::Undefined) => ",".to_string(),
                Some(sep) => sep.to_display_string(),
            };
            let arr = this_array(this)?;
            let joined = arr
                .borrow()
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    other => other.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(&separator);
            Ok(Value::String(joined))
        }),
        "slice" => method(key, |this, args| {
            let arr = this_array(this)?;
            let items = arr.borrow();
            let start = relative_index(args.first(), items.len(), 0);
            let end = relative_index(args.get(1), items.len(), items.len());
            let sliced = items.get(start..end.max(start)).unwrap_or_default().to_vec();
            Ok(Value::Array(ArrayRef::new(sliced)))
        }),
        "indexOf" => method(key, |this, args| {
            let needle = args.first().cloned().unwrap_or_default();
            let arr = this_array(this)?;
            let position = arr.borrow().iter().position(|v| *v == needle);
            Ok(Value::Number(position.map(|p| p as f64).unwrap_or(-1.0)))
        }),
        "toString" => method(key, |this, _| Ok(Value::String(this.to_display_string()))),
        _ => return None,
    };
    Some(value)
}

/// Index assignment and `length` changes on arrays. Neither may grow the array past
/// `max_len` elements.
pub(crate) fn set_array_property(
    arr: &ArrayRef,
    key: &str,
    value: Value,
    max_len: usize,
) -> ProvenanceResult<()> {
    let mut items = arr.borrow_mut();
    if key == "length" {
        let n = value.to_number();
        if n.is_nan() || n < 0.0 || n.fract() != 0.0 || n > max_len as f64 {
            return Err(ProvenanceError::Runtime(format!(
                "Invalid array length {}",
                format_number(n)
            )));
        }
        items.resize(n as usize, Value::Undefined);
        return Ok(());
    }
    match index_key(key) {
        Some(index) => {
            if index >= max_len {
                return Err(ProvenanceError::Runtime(format!(
                    "Array index {index} exceeds the {max_len}-element limit"
                )));
            }
            if index >= items.len() {
                items.resize(index + 1, Value::Undefined);
            }
            items[index] = value;
            Ok(())
        }
        None => Err(ProvenanceError::Runtime(format!(
            "Cannot set non-index property '{key}' on an array"
        ))),
    }
}

/// The globals every interpreter starts with.
pub(crate) fn default_globals() -> Vec<(&'static str, Value)> {
    let mut console = JsObject::new();
    console.properties.insert(
        "log".to_string(),
        PropertySlot::Data(method("log", |_, args| {
            let line = args
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(" ");
            log::info!("console.log: {line}");
            Ok(Value::Undefined)
        })),
    );

    vec![
        ("console", Value::Object(ObjectRef::new(console))),
        (
            "String",
            method("String", |_, args| {
                Ok(Value::String(
                    args.first()
                        .map(Value::to_display_string)
                        .unwrap_or_default(),
                ))
            }),
        ),
        (
            "Number",
            method("Number", |_, args| {
                Ok(Value::Number(args.first().map(Value::to_number).unwrap_or(0.0)))
            }),
        ),
    ]
}
