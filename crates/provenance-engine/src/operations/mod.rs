//! The operation kind table.
//!
//! Each kind supplies three things: a `rewrite` constructor used by the instrumenter to build
//! the generated [`OperationExpr`], `exec` semantics run by [`run_operation`] against an
//! [`OperationHost`], and a `traverse_step` rule used by the traversal engine. Dispatch is a
//! `match` on [`OperationKind`].

use indexmap::IndexMap;

use crate::ast::{ArgExpr, Expr, ExprKind, OperationExpr, SourceLocation, TrackingExpr};
use crate::error::{ProvenanceError, ProvenanceResult};
use crate::operation::{
    OperationArg, OperationId, OperationKind, OperationLog, RecordedValue, StaticValue,
    TrackedArg,
};
use crate::tracking::TrackingContext;
use crate::value::Value;

pub mod array;
pub mod assignment;
pub mod binary;
pub mod call;
pub mod identifier;
pub mod literal;
pub mod member;
pub mod object;
pub mod return_statement;

/// A runtime value paired with its origin, as seen by `exec`.
#[derive(Debug, Clone)]
pub struct TrackedValue {
    pub value: Value,
    pub origin: Option<OperationId>,
}

impl TrackedValue {
    pub fn new(value: Value, origin: Option<OperationId>) -> Self {
        Self { value, origin }
    }

    pub fn untracked(value: Value) -> Self {
        Self { value, origin: None }
    }

    fn snapshot(&self) -> TrackedArg {
        TrackedArg::new(RecordedValue::from(&self.value), self.origin)
    }
}

#[derive(Debug, Clone)]
pub enum EvaluatedArg {
    Single(TrackedValue),
    Array(Vec<TrackedValue>),
}

impl EvaluatedArg {
    fn snapshot(&self) -> OperationArg {
        match self {
            Self::Single(arg) => OperationArg::Single(arg.snapshot()),
            Self::Array(items) => {
                OperationArg::Array(items.iter().map(TrackedValue::snapshot).collect())
            }
        }
    }
}

pub type EvaluatedArgs = IndexMap<String, EvaluatedArg>;

/// What an `exec` produced: the operation's value and any arguments discovered while running.
#[derive(Debug, Default)]
pub struct ExecOutput {
    pub result: Value,
    pub extra_args: IndexMap<String, TrackedValue>,
}

impl ExecOutput {
    pub fn value(result: Value) -> Self {
        Self {
            result,
            extra_args: IndexMap::new(),
        }
    }

    pub fn with_extra(mut self, name: &str, arg: TrackedValue) -> Self {
        self.extra_args.insert(name.to_string(), arg);
        self
    }
}

/// The executing environment an operation runs against.
///
/// Implemented by [`crate::Interpreter`]; operations reach program state and the tracking
/// context only through this trait.
pub trait OperationHost {
    fn tracking(&mut self) -> &mut TrackingContext;

    /// `object[key]`, running getters.
    fn get_property(&mut self, object: &Value, key: &str) -> ProvenanceResult<Value>;

    /// `object[key] = value`, running setters.
    fn set_property(&mut self, object: &Value, key: &str, value: Value) -> ProvenanceResult<()>;

    fn call_function(
        &mut self,
        callee: &Value,
        this: Value,
        args: Vec<Value>,
    ) -> ProvenanceResult<Value>;

    /// Current value and shadow tracking of a binding, `None` when the name is unbound.
    fn read_variable(&mut self, name: &str) -> Option<(Value, Option<OperationId>)>;

    fn write_variable(&mut self, name: &str, value: Value) -> ProvenanceResult<()>;
}

/// Run one instrumented operation: exec, then record its log and publish it in the tracking
/// register.
pub fn run_operation<H: OperationHost + ?Sized>(
    op: &OperationExpr,
    args: EvaluatedArgs,
    host: &mut H,
) -> ProvenanceResult<Value> {
    let output = match op.kind {
        OperationKind::StringLiteral | OperationKind::NumericLiteral => literal::exec(&args)?,
        OperationKind::Identifier => identifier::exec(&args)?,
        OperationKind::BinaryExpression => binary::exec(op, &args)?,
        OperationKind::MemberExpression => member::exec(&args, host)?,
        OperationKind::CallExpression => call::exec(&args, host)?,
        OperationKind::ObjectExpression => object::exec(op, &args, host)?,
        OperationKind::ArrayExpression => array::exec(&args)?,
        OperationKind::ReturnStatement => return_statement::exec(&args)?,
        OperationKind::AssignmentExpression => assignment::exec(op, &args, host)?,
        OperationKind::FunctionArgument | OperationKind::MemexpAsLeftAssExp => {
            return Err(ProvenanceError::Unsupported(format!(
                "`{}` records are created by other operations and cannot be executed directly",
                op.kind
            )))
        }
    };

    let tracking = host.tracking();
    let id = tracking.next_id();
    let log = OperationLog {
        id,
        kind: op.kind,
        args: args
            .iter()
            .map(|(name, arg)| (name.clone(), arg.snapshot()))
            .collect(),
        extra_args: output
            .extra_args
            .iter()
            .map(|(name, arg)| (name.clone(), OperationArg::Single(arg.snapshot())))
            .collect(),
        static_args: op.static_args.clone(),
        result: RecordedValue::from(&output.result),
        loc: op.loc,
    };
    log::trace!("{} #{id} -> {}", op.kind, log.result.display());
    tracking.complete_operation(log);
    Ok(output.result)
}

/// Store a log created as a side effect of another operation's exec. Does not touch the
/// tracking register.
pub(crate) fn record_side_log<H: OperationHost + ?Sized>(
    host: &mut H,
    kind: OperationKind,
    args: &[(&str, &TrackedValue)],
    extra_args: &[(&str, &TrackedValue)],
    static_args: IndexMap<String, StaticValue>,
    result: &Value,
) -> OperationId {
    let to_map = |items: &[(&str, &TrackedValue)]| -> IndexMap<String, OperationArg> {
        items
            .iter()
            .map(|(name, arg)| (name.to_string(), OperationArg::Single(arg.snapshot())))
            .collect()
    };
    let tracking = host.tracking();
    let id = tracking.next_id();
    tracking.record(OperationLog {
        id,
        kind,
        args: to_map(args),
        extra_args: to_map(extra_args),
        static_args,
        result: RecordedValue::from(result),
        loc: None,
    })
}

/// The next `(origin, char_index)` to visit from `log`, or `None` when the log is terminal.
pub fn traverse_step(log: &OperationLog, char_index: usize) -> Option<(OperationId, usize)> {
    match log.kind {
        OperationKind::StringLiteral
        | OperationKind::NumericLiteral
        | OperationKind::ArrayExpression => None,
        OperationKind::Identifier => identifier::traverse_step(log, char_index),
        OperationKind::BinaryExpression => binary::traverse_step(log, char_index),
        OperationKind::MemberExpression => member::traverse_step(log, char_index),
        OperationKind::CallExpression => call::traverse_step(log, char_index),
        OperationKind::FunctionArgument => call::argument_traverse_step(log, char_index),
        OperationKind::ObjectExpression => object::traverse_step(log, char_index),
        OperationKind::ReturnStatement => return_statement::traverse_step(log, char_index),
        OperationKind::AssignmentExpression => assignment::traverse_step(log, char_index),
        OperationKind::MemexpAsLeftAssExp => assignment::target_traverse_step(log, char_index),
    }
}

/// Character attribution for `left + right` when both operands are strings: indices inside
/// `left` stay with it, later ones shift into `right`. `None` when either side is not a string.
pub(crate) fn concat_step(
    left: &TrackedArg,
    right: &TrackedArg,
    char_index: usize,
) -> Option<Option<(OperationId, usize)>> {
    let left_len = left.value.char_len()?;
    right.value.as_str()?;
    Some(if char_index < left_len {
        left.origin.map(|origin| (origin, char_index))
    } else {
        right.origin.map(|origin| (origin, char_index - left_len))
    })
}

pub(crate) fn follow(arg: Option<&TrackedArg>, char_index: usize) -> Option<(OperationId, usize)> {
    arg.and_then(|arg| arg.origin).map(|origin| (origin, char_index))
}

/// Whether evaluating `expr` leaves its own origin in the tracking register.
pub(crate) fn is_tracked(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Operation(_) | ExprKind::ShadowUpdate { .. } => true,
        ExprKind::Conditional {
            consequent,
            alternate,
            ..
        } => is_tracked(consequent) && is_tracked(alternate),
        ExprKind::Logical { left, right, .. } => is_tracked(left) && is_tracked(right),
        _ => false,
    }
}

/// How an operation argument wrapping `expr` obtains its origin. Expressions that do not
/// publish an origin are untracked rather than picking up whatever the register last held.
pub(crate) fn tracking_for(expr: &Expr) -> TrackingExpr {
    if is_tracked(expr) {
        TrackingExpr::LastOperation
    } else {
        TrackingExpr::Null
    }
}

pub(crate) fn tracked_arg(expr: Expr) -> ArgExpr {
    let tracking = tracking_for(&expr);
    ArgExpr::single(expr, tracking)
}

pub(crate) fn single<'a>(
    args: &'a EvaluatedArgs,
    name: &str,
) -> ProvenanceResult<&'a TrackedValue> {
    match args.get(name) {
        Some(EvaluatedArg::Single(arg)) => Ok(arg),
        Some(EvaluatedArg::Array(_)) => Err(ProvenanceError::Unsupported(format!(
            "operation argument `{name}` must not be array-valued"
        ))),
        None => Err(ProvenanceError::Unsupported(format!(
            "operation is missing argument `{name}`"
        ))),
    }
}

pub(crate) fn array<'a>(
    args: &'a EvaluatedArgs,
    name: &str,
) -> ProvenanceResult<&'a [TrackedValue]> {
    match args.get(name) {
        Some(EvaluatedArg::Array(items)) => Ok(items),
        _ => Err(ProvenanceError::Unsupported(format!(
            "operation is missing array argument `{name}`"
        ))),
    }
}

pub(crate) fn static_text<'a>(op: &'a OperationExpr, name: &str) -> ProvenanceResult<&'a str> {
    op.static_args
        .get(name)
        .and_then(|value| value.as_text())
        .ok_or_else(|| {
            ProvenanceError::Unsupported(format!("{} is missing static argument `{name}`", op.kind))
        })
}

pub(crate) fn static_list<'a>(
    op: &'a OperationExpr,
    name: &str,
) -> ProvenanceResult<&'a [String]> {
    op.static_args
        .get(name)
        .and_then(|value| value.as_list())
        .ok_or_else(|| {
            ProvenanceError::Unsupported(format!("{} is missing static argument `{name}`", op.kind))
        })
}

pub(crate) fn operation_expr(
    kind: OperationKind,
    args: IndexMap<String, ArgExpr>,
    static_args: IndexMap<String, StaticValue>,
    loc: Option<SourceLocation>,
) -> Expr {
    Expr::new(
        ExprKind::Operation(Box::new(OperationExpr {
            kind,
            args,
            static_args,
            loc,
        })),
        loc,
    )
}
