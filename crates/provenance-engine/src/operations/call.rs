use indexmap::IndexMap;

use crate::ast::{ArgExpr, Expr, ExprKind, SourceLocation, TrackingExpr};
use crate::error::ProvenanceResult;
use crate::operation::{OperationId, OperationKind, OperationLog};

use super::{
    follow, operation_expr, record_side_log, single, tracked_arg, EvaluatedArg, EvaluatedArgs,
    ExecOutput, OperationHost, TrackedValue,
};

fn is_member_read(expr: &Expr) -> bool {
    matches!(&expr.kind, ExprKind::Operation(op) if op.kind == OperationKind::MemberExpression)
}

/// Instrument a call. A method call (`obj.m(..)`) takes its `this` from the object of the
/// member read that produced the callee.
pub fn rewrite(callee: Expr, arguments: Vec<Expr>, loc: Option<SourceLocation>) -> Expr {
    let context = if is_member_read(&callee) {
        ArgExpr::single(
            Expr::generated(ExprKind::LastMemberObject),
            TrackingExpr::LastMemberObject,
        )
    } else {
        ArgExpr::single(Expr::generated(ExprKind::Undefined), TrackingExpr::Null)
    };

    let mut args = IndexMap::new();
    args.insert("function".to_string(), tracked_arg(callee));
    args.insert("context".to_string(), context);
    for (i, argument) in arguments.into_iter().enumerate() {
        args.insert(format!("arg{i}"), tracked_arg(argument));
    }
    operation_expr(OperationKind::CallExpression, args, IndexMap::new(), loc)
}

pub fn exec<H: OperationHost + ?Sized>(
    args: &EvaluatedArgs,
    host: &mut H,
) -> ProvenanceResult<ExecOutput> {
    let function = single(args, "function")?;
    let context = single(args, "context")?;

    let mut argument_logs = Vec::new();
    let mut values = Vec::new();
    while let Some(EvaluatedArg::Single(arg)) = args.get(&format!("arg{}", values.len())) {
        let id = record_side_log(
            host,
            OperationKind::FunctionArgument,
            &[("value", arg)],
            &[],
            IndexMap::new(),
            &arg.value,
        );
        argument_logs.push(id);
        values.push(arg.value.clone());
    }

    let tracking = host.tracking();
    tracking.set_argument_tracking(Some(argument_logs));
    tracking.set_last_operation(None);
    let ret = host.call_function(&function.value, context.value.clone(), values);
    host.tracking().set_argument_tracking(None);
    let ret = ret?;

    // An instrumented callee leaves its return statement in the register.
    let return_origin = host.tracking().last_operation();
    Ok(ExecOutput::value(ret.clone())
        .with_extra("returnValue", TrackedValue::new(ret, return_origin)))
}

pub fn traverse_step(log: &OperationLog, char_index: usize) -> Option<(OperationId, usize)> {
    follow(log.extra_arg("returnValue"), char_index)
}

/// `functionArgument` records pass straight through to the value the caller supplied.
pub fn argument_traverse_step(
    log: &OperationLog,
    char_index: usize,
) -> Option<(OperationId, usize)> {
    follow(log.arg("value"), char_index)
}
