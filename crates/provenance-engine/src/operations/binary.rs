use indexmap::IndexMap;

use crate::ast::{BinaryOp, Expr, OperationExpr, SourceLocation};
use crate::error::{ProvenanceError, ProvenanceResult};
use crate::operation::{OperationId, OperationKind, OperationLog, StaticValue};
use crate::value::apply_binary;

use super::{
    concat_step, operation_expr, single, static_text, tracked_arg, EvaluatedArgs, ExecOutput,
};

/// Instrument `left op right`. Only arithmetic operators are recorded; the instrumenter leaves
/// comparisons and equality as plain expressions.
pub fn rewrite(
    op: BinaryOp,
    left: Expr,
    right: Expr,
    loc: Option<SourceLocation>,
) -> ProvenanceResult<Expr> {
    if !op.is_arithmetic() {
        return Err(ProvenanceError::Unsupported(format!(
            "binary operator `{}` is not instrumented",
            op.as_str()
        )));
    }
    let mut args = IndexMap::new();
    args.insert("left".to_string(), tracked_arg(left));
    args.insert("right".to_string(), tracked_arg(right));
    let mut static_args = IndexMap::new();
    static_args.insert("operator".to_string(), StaticValue::from(op.as_str()));
    Ok(operation_expr(OperationKind::BinaryExpression, args, static_args, loc))
}

pub fn exec(op: &OperationExpr, args: &EvaluatedArgs) -> ProvenanceResult<ExecOutput> {
    let symbol = static_text(op, "operator")?;
    let operator = BinaryOp::from_symbol(symbol)
        .filter(|operator| operator.is_arithmetic())
        .ok_or_else(|| {
            ProvenanceError::Unsupported(format!("unknown binary expression operator `{symbol}`"))
        })?;
    let left = single(args, "left")?;
    let right = single(args, "right")?;
    Ok(ExecOutput::value(apply_binary(operator, &left.value, &right.value)))
}

/// `+` of two strings splits the character index between the operands; every other case is
/// terminal.
pub fn traverse_step(log: &OperationLog, char_index: usize) -> Option<(OperationId, usize)> {
    if log.static_arg("operator") != Some("+") {
        return None;
    }
    concat_step(log.arg("left")?, log.arg("right")?, char_index).flatten()
}
