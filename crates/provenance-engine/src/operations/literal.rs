use indexmap::IndexMap;

use crate::ast::{ArgExpr, Expr, ExprKind, SourceLocation, TrackingExpr};
use crate::error::ProvenanceResult;
use crate::operation::OperationKind;

use super::{operation_expr, single, EvaluatedArgs, ExecOutput};

pub fn string(value: String, loc: Option<SourceLocation>) -> Expr {
    wrap(OperationKind::StringLiteral, ExprKind::String(value), loc)
}

pub fn number(value: f64, loc: Option<SourceLocation>) -> Expr {
    wrap(OperationKind::NumericLiteral, ExprKind::Number(value), loc)
}

fn wrap(kind: OperationKind, literal: ExprKind, loc: Option<SourceLocation>) -> Expr {
    let mut args = IndexMap::new();
    args.insert(
        "value".to_string(),
        ArgExpr::single(Expr::generated(literal), TrackingExpr::Null),
    );
    operation_expr(kind, args, IndexMap::new(), loc)
}

pub fn exec(args: &EvaluatedArgs) -> ProvenanceResult<ExecOutput> {
    Ok(ExecOutput::value(single(args, "value")?.value.clone()))
}

