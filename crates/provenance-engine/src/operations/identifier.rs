use indexmap::IndexMap;

use crate::ast::{ArgExpr, Expr, ExprKind, SourceLocation, TrackingExpr};
use crate::error::ProvenanceResult;
use crate::operation::{OperationId, OperationKind, OperationLog};

use super::{follow, operation_expr, single, EvaluatedArgs, ExecOutput};

/// Names that are read as-is, never wrapped.
const UNTRACKED_NAMES: &[&str] = &["globalFn"];

pub fn is_untracked_name(name: &str) -> bool {
    UNTRACKED_NAMES.contains(&name)
}

/// Wrap a variable read; its origin is the variable's shadow tracking at the time of the read.
pub fn rewrite(name: String, loc: Option<SourceLocation>) -> Expr {
    let mut args = IndexMap::new();
    args.insert(
        "value".to_string(),
        ArgExpr::single(
            Expr::generated(ExprKind::Identifier(name.clone())),
            TrackingExpr::Shadow(name),
        ),
    );
    operation_expr(OperationKind::Identifier, args, IndexMap::new(), loc)
}

pub fn exec(args: &EvaluatedArgs) -> ProvenanceResult<ExecOutput> {
    Ok(ExecOutput::value(single(args, "value")?.value.clone()))
}

pub fn traverse_step(log: &OperationLog, char_index: usize) -> Option<(OperationId, usize)> {
    follow(log.arg("value"), char_index)
}
