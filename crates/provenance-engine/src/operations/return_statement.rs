use indexmap::IndexMap;

use crate::ast::{ArgExpr, Expr, ExprKind, SourceLocation, TrackingExpr};
use crate::error::ProvenanceResult;
use crate::operation::{OperationId, OperationKind, OperationLog};

use super::{follow, operation_expr, single, tracked_arg, EvaluatedArgs, ExecOutput};

/// Wrap the argument of a `return`. A bare `return` returns an untracked `undefined`.
///
/// Completing this operation is the last thing the function body does, so the caller's call
/// operation finds it in the tracking register.
pub fn rewrite(argument: Option<Expr>, loc: Option<SourceLocation>) -> Expr {
    let arg = match argument {
        Some(expr) => tracked_arg(expr),
        None => ArgExpr::single(Expr::generated(ExprKind::Undefined), TrackingExpr::Null),
    };
    let mut args = IndexMap::new();
    args.insert("returnValue".to_string(), arg);
    operation_expr(OperationKind::ReturnStatement, args, IndexMap::new(), loc)
}

pub fn exec(args: &EvaluatedArgs) -> ProvenanceResult<ExecOutput> {
    Ok(ExecOutput::value(single(args, "returnValue")?.value.clone()))
}

pub fn traverse_step(log: &OperationLog, char_index: usize) -> Option<(OperationId, usize)> {
    follow(log.arg("returnValue"), char_index)
}
