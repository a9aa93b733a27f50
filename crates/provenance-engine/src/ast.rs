use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::operation::{OperationKind, StaticValue};

/// Deepest statement/expression nesting a program may have. Parsing, instrumentation and
/// evaluation all recurse once per level.
pub const MAX_NESTING_DEPTH: usize = 64;

/// 1-based line / column of a node in the parsed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDeclarator {
    pub name: String,
    pub init: Option<Expr>,
    /// Set by the instrumenter when `init` leaves its origin in the tracking register, so the
    /// new binding's shadow tracking is seeded from it.
    pub track_init: bool,
    pub loc: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub loc: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    VarDecl {
        kind: DeclKind,
        declarations: Vec<VarDeclarator>,
    },
    FunctionDecl(Rc<FunctionDef>),
    Return {
        argument: Option<Expr>,
        loc: Option<SourceLocation>,
    },
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForIn {
        kind: Option<DeclKind>,
        binding: String,
        object: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Break,
    Continue,
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        param: Option<String>,
        handler: Vec<Stmt>,
    },
    Empty,
    /// Generated function prologue: seeds each parameter's shadow tracking from the
    /// `functionArgument` records published by the caller.
    TrackParameters(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::StrictEq => "===",
            Self::StrictNe => "!==",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Mod,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "===" => Self::StrictEq,
            "!==" => Self::StrictNe,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            _ => return None,
        })
    }

    /// Operators recorded by the `binaryExpression` operation.
    pub fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
}

impl AssignOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assign => "=",
            Self::AddAssign => "+=",
            Self::SubAssign => "-=",
            Self::MulAssign => "*=",
            Self::DivAssign => "/=",
        }
    }

    /// The binary operator a compound assignment applies, `None` for plain `=`.
    pub fn binary_op(self) -> Option<BinaryOp> {
        match self {
            Self::Assign => None,
            Self::AddAssign => Some(BinaryOp::Add),
            Self::SubAssign => Some(BinaryOp::Sub),
            Self::MulAssign => Some(BinaryOp::Mul),
            Self::DivAssign => Some(BinaryOp::Div),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberProperty {
    /// `object.name`
    Named(String),
    /// `object[expr]`
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Init(Expr),
    Method(Rc<FunctionDef>),
    Getter(Rc<FunctionDef>),
    Setter(Rc<FunctionDef>),
}

impl PropertyValue {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Method(_) => "method",
            Self::Getter(_) => "get",
            Self::Setter(_) => "set",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectProperty {
    pub key: String,
    pub value: PropertyValue,
    pub loc: Option<SourceLocation>,
}

/// Where the value of an instrumented argument's origin comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingExpr {
    /// Untracked: the value has no recorded provenance.
    Null,
    /// Read the tracking register left behind by the value expression.
    LastOperation,
    /// Read an identifier's shadow tracking, if the identifier is bound.
    Shadow(String),
    /// Origin of the object of the most recent member read.
    LastMemberObject,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgExpr {
    Single { value: Expr, tracking: TrackingExpr },
    /// One origin-carrying slot per element.
    Array(Vec<(Expr, TrackingExpr)>),
}

impl ArgExpr {
    pub fn single(value: Expr, tracking: TrackingExpr) -> Self {
        Self::Single { value, tracking }
    }
}

/// A generated node that evaluates its arguments, runs the operation's exec semantics and
/// records an operation log.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationExpr {
    pub kind: OperationKind,
    pub args: IndexMap<String, ArgExpr>,
    pub static_args: IndexMap<String, StaticValue>,
    pub loc: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Option<SourceLocation>,
}

impl Expr {
    pub fn new(kind: ExprKind, loc: Option<SourceLocation>) -> Self {
        Self { kind, loc }
    }

    /// A node created by the instrumenter; carries no source position.
    pub fn generated(kind: ExprKind) -> Self {
        Self { kind, loc: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    Undefined,
    This,
    Identifier(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        argument: Box<Expr>,
    },
    Update {
        op: UpdateOp,
        prefix: bool,
        argument: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: MemberProperty,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    Object(Vec<ObjectProperty>),
    Array(Vec<Expr>),
    Function(Rc<FunctionDef>),
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Operation(Box<OperationExpr>),
    /// Evaluates `value`, then copies the tracking register into `name`'s shadow tracking.
    ShadowUpdate {
        name: String,
        value: Box<Expr>,
    },
    /// The object of the most recent member read (the `this` of a member call).
    LastMemberObject,
}

enum Node<'a> {
    Stmt(&'a Stmt),
    Expr(&'a Expr),
}

/// Length of the longest chain of nested statements and expressions in `stmts`, counting
/// function bodies. Walks with an explicit stack so arbitrarily deep trees can be measured.
pub fn nesting_depth(stmts: &[Stmt]) -> usize {
    let mut stack: Vec<(Node<'_>, usize)> = stmts.iter().map(|s| (Node::Stmt(s), 1)).collect();
    let mut deepest = 0;
    while let Some((node, depth)) = stack.pop() {
        deepest = deepest.max(depth);
        let next = depth + 1;
        match node {
            Node::Stmt(stmt) => match stmt {
                Stmt::Expr(expr) | Stmt::Throw(expr) => push_expr(&mut stack, expr, next),
                Stmt::VarDecl { declarations, .. } => {
                    for init in declarations.iter().filter_map(|d| d.init.as_ref()) {
                        push_expr(&mut stack, init, next);
                    }
                }
                Stmt::Return { argument, .. } => {
                    if let Some(argument) = argument {
                        push_expr(&mut stack, argument, next);
                    }
                }
                Stmt::If {
                    test,
                    consequent,
                    alternate,
                } => {
                    push_expr(&mut stack, test, next);
                    push_stmt(&mut stack, consequent, next);
                    if let Some(alternate) = alternate {
                        push_stmt(&mut stack, alternate, next);
                    }
                }
                Stmt::While { test, body } => {
                    push_expr(&mut stack, test, next);
                    push_stmt(&mut stack, body, next);
                }
                Stmt::For {
                    init,
                    test,
                    update,
                    body,
                } => {
                    for expr in test.iter().chain(update.iter()) {
                        push_expr(&mut stack, expr, next);
                    }
                    if let Some(init) = init {
                        push_stmt(&mut stack, init, next);
                    }
                    push_stmt(&mut stack, body, next);
                }
                Stmt::ForIn { object, body, .. } => {
                    push_expr(&mut stack, object, next);
                    push_stmt(&mut stack, body, next);
                }
                Stmt::FunctionDecl(def) => push_stmts(&mut stack, &def.body, next),
                Stmt::Block(body) => push_stmts(&mut stack, body, next),
                Stmt::Try { block, handler, .. } => {
                    push_stmts(&mut stack, block, next);
                    push_stmts(&mut stack, handler, next);
                }
                Stmt::Break | Stmt::Continue | Stmt::Empty | Stmt::TrackParameters(_) => {}
            },
            Node::Expr(expr) => match &expr.kind {
                ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                    push_expr(&mut stack, left, next);
                    push_expr(&mut stack, right, next);
                }
                ExprKind::Unary { argument, .. } | ExprKind::Update { argument, .. } => {
                    push_expr(&mut stack, argument, next)
                }
                ExprKind::Member { object, property } => {
                    push_expr(&mut stack, object, next);
                    if let MemberProperty::Computed(property) = property {
                        push_expr(&mut stack, property, next);
                    }
                }
                ExprKind::Call { callee, arguments } => {
                    push_expr(&mut stack, callee, next);
                    for argument in arguments {
                        push_expr(&mut stack, argument, next);
                    }
                }
                ExprKind::Array(elements) => {
                    for element in elements {
                        push_expr(&mut stack, element, next);
                    }
                }
                ExprKind::Assign { target, value, .. } => {
                    push_expr(&mut stack, target, next);
                    push_expr(&mut stack, value, next);
                }
                ExprKind::Conditional {
                    test,
                    consequent,
                    alternate,
                } => {
                    push_expr(&mut stack, test, next);
                    push_expr(&mut stack, consequent, next);
                    push_expr(&mut stack, alternate, next);
                }
                ExprKind::ShadowUpdate { value, .. } => push_expr(&mut stack, value, next),
                ExprKind::Operation(op) => {
                    for arg in op.args.values() {
                        match arg {
                            ArgExpr::Single { value, .. } => push_expr(&mut stack, value, next),
                            ArgExpr::Array(items) => {
                                for (item, _) in items {
                                    push_expr(&mut stack, item, next);
                                }
                            }
                        }
                    }
                }
                ExprKind::Object(properties) => {
                    for property in properties {
                        match &property.value {
                            PropertyValue::Init(value) => push_expr(&mut stack, value, next),
                            PropertyValue::Method(def)
                            | PropertyValue::Getter(def)
                            | PropertyValue::Setter(def) => {
                                push_stmts(&mut stack, &def.body, next)
                            }
                        }
                    }
                }
                ExprKind::Function(def) => push_stmts(&mut stack, &def.body, next),
                ExprKind::Number(_)
                | ExprKind::String(_)
                | ExprKind::Bool(_)
                | ExprKind::Null
                | ExprKind::Undefined
                | ExprKind::This
                | ExprKind::Identifier(_)
                | ExprKind::LastMemberObject => {}
            },
        }
    }
    deepest
}

fn push_expr<'a>(stack: &mut Vec<(Node<'a>, usize)>, expr: &'a Expr, depth: usize) {
    stack.push((Node::Expr(expr), depth));
}

fn push_stmt<'a>(stack: &mut Vec<(Node<'a>, usize)>, stmt: &'a Stmt, depth: usize) {
    stack.push((Node::Stmt(stmt), depth));
}

fn push_stmts<'a>(stack: &mut Vec<(Node<'a>, usize)>, stmts: &'a [Stmt], depth: usize) {
    stack.extend(stmts.iter().map(|stmt| (Node::Stmt(stmt), depth)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Expr {
        Expr::generated(ExprKind::Identifier(name.to_string()))
    }

    #[test]
    fn nesting_depth_counts_statements_expressions_and_function_bodies() {
        assert_eq!(nesting_depth(&[]), 0);
        assert_eq!(nesting_depth(&[Stmt::Empty]), 1);

        let sum = Expr::generated(ExprKind::Binary {
            op: BinaryOp::Add,
            left: Box::new(ident("a")),
            right: Box::new(ident("b")),
        });
        let inner = Rc::new(FunctionDef {
            name: None,
            params: Vec::new(),
            body: vec![Stmt::Return {
                argument: Some(sum),
                loc: None,
            }],
            loc: None,
        });
        let call = Expr::generated(ExprKind::Call {
            callee: Box::new(Expr::generated(ExprKind::Function(inner))),
            arguments: vec![ident("x")],
        });
        // Expr stmt > call > function > return > binary > identifier
        assert_eq!(nesting_depth(&[Stmt::Expr(call)]), 6);
    }

    #[test]
    fn nesting_depth_handles_very_deep_chains() {
        let mut expr = ident("a");
        for _ in 0..10_000 {
            expr = Expr::generated(ExprKind::Unary {
                op: UnaryOp::Not,
                argument: Box::new(expr),
            });
        }
        let program = vec![Stmt::Expr(expr)];
        assert_eq!(nesting_depth(&program), 10_002);
        // Tear down without recursing through ten thousand boxes.
        let Some(Stmt::Expr(mut expr)) = program.into_iter().next() else {
            unreachable!();
        };
        while let ExprKind::Unary { argument, .. } = expr.kind {
            expr = *argument;
        }
    }
}
