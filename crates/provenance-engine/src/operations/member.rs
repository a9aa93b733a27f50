use indexmap::IndexMap;

use crate::ast::{Expr, MemberProperty, SourceLocation};
use crate::error::ProvenanceResult;
use crate::operation::{OperationId, OperationKind, OperationLog};

use super::{
    follow, literal, operation_expr, single, tracked_arg, EvaluatedArgs, ExecOutput,
    OperationHost, TrackedValue,
};

/// The expression producing the property name: `obj.name` reads a string literal.
pub(crate) fn property_name_expr(property: MemberProperty, loc: Option<SourceLocation>) -> Expr {
    match property {
        MemberProperty::Named(name) => literal::string(name, loc),
        MemberProperty::Computed(expr) => *expr,
    }
}

/// Instrument a property read. `object` and `property` must already be instrumented.
pub fn rewrite(object: Expr, property: MemberProperty, loc: Option<SourceLocation>) -> Expr {
    let mut args = IndexMap::new();
    args.insert("object".to_string(), tracked_arg(object));
    args.insert(
        "propName".to_string(),
        tracked_arg(property_name_expr(property, loc)),
    );
    operation_expr(OperationKind::MemberExpression, args, IndexMap::new(), loc)
}

pub fn exec<H: OperationHost + ?Sized>(
    args: &EvaluatedArgs,
    host: &mut H,
) -> ProvenanceResult<ExecOutput> {
    let object = single(args, "object")?;
    let key = single(args, "propName")?.value.to_property_key();
    let value = host.get_property(&object.value, &key)?;

    let tracking = host.tracking();
    let property_origin = tracking.object_property_tracking(&object.value, &key);
    tracking.set_last_member_object(object.value.clone(), object.origin);

    Ok(ExecOutput::value(value.clone())
        .with_extra("propertyValue", TrackedValue::new(value, property_origin)))
}

pub fn traverse_step(log: &OperationLog, char_index: usize) -> Option<(OperationId, usize)> {
    follow(log.extra_arg("propertyValue"), char_index)
}
