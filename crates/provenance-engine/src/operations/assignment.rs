use indexmap::IndexMap;

use crate::ast::{AssignOp, Expr, ExprKind, OperationExpr, SourceLocation};
use crate::error::{ProvenanceError, ProvenanceResult};
use crate::operation::{OperationId, OperationKind, OperationLog, StaticValue, TrackedArg};
use crate::value::{add, apply_binary, Value};

use super::member::property_name_expr;
use super::{
    concat_step, follow, operation_expr, record_side_log, single, static_text, tracked_arg,
    EvaluatedArgs, ExecOutput, OperationHost, TrackedValue,
};

const IDENTIFIER_TARGET: &str = "Identifier";
const MEMBER_TARGET: &str = "MemberExpression";

/// Instrument `target op= value`. `value` must already be instrumented; `target` must not be,
/// except for the object expression of a member target.
///
/// An identifier target is wrapped in a shadow update so the variable's tracking follows the
/// assignment record.
pub fn rewrite(
    op: AssignOp,
    target: Expr,
    value: Expr,
    loc: Option<SourceLocation>,
) -> ProvenanceResult<Expr> {
    let mut static_args = IndexMap::new();
    static_args.insert("operator".to_string(), StaticValue::from(op.as_str()));
    let mut args = IndexMap::new();

    match target.kind {
        ExprKind::Identifier(name) => {
            static_args.insert("type".to_string(), StaticValue::from(IDENTIFIER_TARGET));
            static_args.insert("name".to_string(), StaticValue::Text(name.clone()));
            args.insert("argument".to_string(), tracked_arg(value));
            let operation =
                operation_expr(OperationKind::AssignmentExpression, args, static_args, loc);
            Ok(Expr::new(
                ExprKind::ShadowUpdate {
                    name,
                    value: Box::new(operation),
                },
                loc,
            ))
        }
        ExprKind::Member { object, property } => {
            static_args.insert("type".to_string(), StaticValue::from(MEMBER_TARGET));
            args.insert("object".to_string(), tracked_arg(*object));
            args.insert(
                "propertyName".to_string(),
                tracked_arg(property_name_expr(property, target.loc)),
            );
            args.insert("argument".to_string(), tracked_arg(value));
            Ok(operation_expr(OperationKind::AssignmentExpression, args, static_args, loc))
        }
        other => Err(ProvenanceError::Unsupported(format!(
            "unhandled assignment target {}",
            target_description(&other)
        ))),
    }
}

fn target_description(kind: &ExprKind) -> String {
    let debug = format!("{kind:?}");
    let name = debug.split(['(', ' ', '{']).next().unwrap_or_default();
    format!("`{name}`")
}

fn parse_operator(symbol: &str) -> ProvenanceResult<AssignOp> {
    [
        AssignOp::Assign,
        AssignOp::AddAssign,
        AssignOp::SubAssign,
        AssignOp::MulAssign,
        AssignOp::DivAssign,
    ]
    .into_iter()
    .find(|op| op.as_str() == symbol)
    .ok_or_else(|| {
        ProvenanceError::Unsupported(format!("unknown assignment operator `{symbol}`"))
    })
}

pub fn exec<H: OperationHost + ?Sized>(
    op: &OperationExpr,
    args: &EvaluatedArgs,
    host: &mut H,
) -> ProvenanceResult<ExecOutput> {
    let operator = parse_operator(static_text(op, "operator")?)?;
    match static_text(op, "type")? {
        IDENTIFIER_TARGET => assign_variable(op, operator, args, host),
        MEMBER_TARGET => assign_property(operator, args, host),
        other => Err(ProvenanceError::Unsupported(format!(
            "unhandled assignment target `{other}`"
        ))),
    }
}

fn assign_variable<H: OperationHost + ?Sized>(
    op: &OperationExpr,
    operator: AssignOp,
    args: &EvaluatedArgs,
    host: &mut H,
) -> ProvenanceResult<ExecOutput> {
    let name = static_text(op, "name")?;
    let argument = single(args, "argument")?;
    let current = host.read_variable(name);

    let new_value = match operator.binary_op() {
        None => argument.value.clone(),
        Some(binary) => {
            let Some((current, _)) = &current else {
                return Err(ProvenanceError::Runtime(format!("{name} is not defined")));
            };
            apply_binary(binary, current, &argument.value)
        }
    };
    host.write_variable(name, new_value.clone())?;

    let (current_value, current_origin) = current.unwrap_or((Value::Undefined, None));
    Ok(ExecOutput::value(new_value)
        .with_extra("currentValue", TrackedValue::new(current_value, current_origin)))
}

fn assign_property<H: OperationHost + ?Sized>(
    operator: AssignOp,
    args: &EvaluatedArgs,
    host: &mut H,
) -> ProvenanceResult<ExecOutput> {
    let object = single(args, "object")?;
    let property_name = single(args, "propertyName")?;
    let argument = single(args, "argument")?;
    let key = property_name.value.to_property_key();

    let current_value = host.get_property(&object.value, &key)?;
    let prior_write = host.tracking().object_property_tracking(&object.value, &key);
    let target_log = record_side_log(
        host,
        OperationKind::MemexpAsLeftAssExp,
        &[("object", object), ("propertyName", property_name)],
        &[(
            "propertyValue",
            &TrackedValue::new(current_value.clone(), prior_write),
        )],
        IndexMap::new(),
        &current_value,
    );
    let current = TrackedValue::new(current_value, Some(target_log));

    let new_value = match operator {
        AssignOp::Assign => argument.value.clone(),
        AssignOp::AddAssign => add(&current.value, &argument.value),
        other => {
            return Err(ProvenanceError::Unsupported(format!(
                "unknown assignment operator `{}` for property targets",
                other.as_str()
            )))
        }
    };
    host.set_property(&object.value, &key, new_value.clone())?;

    let mut static_args = IndexMap::new();
    static_args.insert("operator".to_string(), StaticValue::from(operator.as_str()));
    let write_log = record_side_log(
        host,
        OperationKind::AssignmentExpression,
        &[("currentValue", &current), ("argument", argument)],
        &[],
        static_args,
        &new_value,
    );
    host.tracking()
        .track_object_property_assignment(&object.value, &key, write_log);

    Ok(ExecOutput::value(new_value).with_extra("currentValue", current))
}

fn current_value_arg(log: &OperationLog) -> Option<&TrackedArg> {
    log.arg("currentValue").or_else(|| log.extra_arg("currentValue"))
}

/// `+=` of two strings splits the index between the previous value and the argument;
/// everything else follows the assigned argument.
pub fn traverse_step(log: &OperationLog, char_index: usize) -> Option<(OperationId, usize)> {
    let argument = log.arg("argument");
    if log.static_arg("operator") == Some(AssignOp::AddAssign.as_str()) {
        if let (Some(current), Some(argument)) = (current_value_arg(log), argument) {
            if let Some(step) = concat_step(current, argument, char_index) {
                return step;
            }
        }
    }
    follow(argument, char_index)
}

/// The read of a property about to be overwritten follows the property's previous write.
pub fn target_traverse_step(
    log: &OperationLog,
    char_index: usize,
) -> Option<(OperationId, usize)> {
    follow(log.extra_arg("propertyValue"), char_index)
}
