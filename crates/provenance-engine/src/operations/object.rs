use indexmap::IndexMap;

use crate::ast::{
    ArgExpr, Expr, ExprKind, ObjectProperty, OperationExpr, PropertyValue, SourceLocation,
    TrackingExpr,
};
use crate::error::{ProvenanceError, ProvenanceResult};
use crate::operation::{OperationId, OperationKind, OperationLog, StaticValue};
use crate::value::{JsObject, ObjectRef, PropertySlot, Value};

use super::{
    array, operation_expr, record_side_log, static_list, tracking_for, EvaluatedArgs,
    ExecOutput, OperationHost,
};

/// Instrument an object literal. Property values must already be instrumented.
///
/// Keys and property kinds (`init`, `method`, `get`, `set`) are compile-time constants; only
/// values carry origins. Functions installed as methods or accessors are untracked.
pub fn rewrite(properties: Vec<ObjectProperty>, loc: Option<SourceLocation>) -> Expr {
    let mut keys = Vec::with_capacity(properties.len());
    let mut kinds = Vec::with_capacity(properties.len());
    let mut values = Vec::with_capacity(properties.len());
    for property in properties {
        kinds.push(property.value.kind_str().to_string());
        keys.push(property.key);
        values.push(match property.value {
            PropertyValue::Init(expr) => {
                let tracking = tracking_for(&expr);
                (expr, tracking)
            }
            PropertyValue::Method(def)
            | PropertyValue::Getter(def)
            | PropertyValue::Setter(def) => {
                (Expr::generated(ExprKind::Function(def)), TrackingExpr::Null)
            }
        });
    }

    let mut args = IndexMap::new();
    args.insert("properties".to_string(), ArgExpr::Array(values));
    let mut static_args = IndexMap::new();
    static_args.insert("keys".to_string(), StaticValue::List(keys));
    static_args.insert("kinds".to_string(), StaticValue::List(kinds));
    operation_expr(OperationKind::ObjectExpression, args, static_args, loc)
}

pub fn exec<H: OperationHost + ?Sized>(
    op: &OperationExpr,
    args: &EvaluatedArgs,
    host: &mut H,
) -> ProvenanceResult<ExecOutput> {
    let values = array(args, "properties")?;
    let keys = static_list(op, "keys")?;
    let kinds = static_list(op, "kinds")?;
    if keys.len() != values.len() || kinds.len() != values.len() {
        return Err(ProvenanceError::Unsupported(
            "object expression keys, kinds and values differ in length".to_string(),
        ));
    }

    let mut object = JsObject::new();
    let mut tracked_writes = Vec::new();
    for ((key, kind), value) in keys.iter().zip(kinds).zip(values) {
        match kind.as_str() {
            "init" => {
                let id = record_side_log(
                    host,
                    OperationKind::ObjectExpression,
                    &[("propertyValue", value)],
                    &[],
                    IndexMap::new(),
                    &value.value,
                );
                tracked_writes.push((key.as_str(), id));
                object
                    .properties
                    .insert(key.clone(), PropertySlot::Data(value.value.clone()));
            }
            "method" => {
                object
                    .properties
                    .insert(key.clone(), PropertySlot::Data(value.value.clone()));
            }
            "get" | "set" => {
                let Value::Function(function) = &value.value else {
                    return Err(ProvenanceError::Unsupported(format!(
                        "accessor `{key}` is not a function"
                    )));
                };
                object.define_accessor(key, kind == "get", function.clone());
            }
            other => {
                return Err(ProvenanceError::Unsupported(format!(
                    "unknown object property kind `{other}`"
                )))
            }
        }
    }

    let object = Value::Object(ObjectRef::new(object));
    let tracking = host.tracking();
    for (key, id) in tracked_writes {
        tracking.track_object_property_assignment(&object, key, id);
    }
    Ok(ExecOutput::value(object))
}

/// Both the literal's own log and its per-property logs follow their first argument.
pub fn traverse_step(log: &OperationLog, char_index: usize) -> Option<(OperationId, usize)> {
    let first = log.arguments_array().into_iter().next()?;
    first.origin.map(|origin| (origin, char_index))
}
