use indexmap::IndexMap;

use crate::ast::{ArgExpr, Expr, SourceLocation};
use crate::error::ProvenanceResult;
use crate::operation::OperationKind;
use crate::value::{ArrayRef, Value};

use super::{array, operation_expr, tracking_for, EvaluatedArgs, ExecOutput};

/// Each element keeps its own origin; the log exposes them as `element0`, `element1`, ...
pub fn rewrite(elements: Vec<Expr>, loc: Option<SourceLocation>) -> Expr {
    let elements = elements
        .into_iter()
        .map(|element| {
            let tracking = tracking_for(&element);
            (element, tracking)
        })
        .collect();
    let mut args = IndexMap::new();
    args.insert("elements".to_string(), ArgExpr::Array(elements));
    operation_expr(OperationKind::ArrayExpression, args, IndexMap::new(), loc)
}

pub fn exec(args: &EvaluatedArgs) -> ProvenanceResult<ExecOutput> {
    let values = array(args, "elements")?
        .iter()
        .map(|element| element.value.clone())
        .collect();
    Ok(ExecOutput::value(Value::Array(ArrayRef::new(values))))
}
