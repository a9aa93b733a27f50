//! Source rewriting: turn a parsed [`Program`] into one whose evaluation records provenance.
//!
//! The rewrite is bottom-up. Children are instrumented before their parent, so when a parent
//! operation's argument is evaluated the child operation has just published its origin in the
//! tracking register. Positions where a value is written or only inspected (assignment and
//! update targets, `typeof` operands, the direct test of `if`/`for`) keep plain identifiers.

use std::rc::Rc;

use crate::ast::{
    nesting_depth, Expr, ExprKind, FunctionDef, MemberProperty, ObjectProperty, Program,
    PropertyValue, SourceLocation, Stmt, UnaryOp, VarDeclarator, MAX_NESTING_DEPTH,
};
use crate::config::InstrumentOptions;
use crate::error::{ProvenanceError, ProvenanceResult};
use crate::operations::{
    array, assignment, binary, call, identifier, is_tracked, literal, member, object,
    return_statement,
};

/// Rewrite `program` so that running it builds an operation graph.
///
/// The input must be a plain parsed program; feeding an already instrumented program back in
/// fails with [`ProvenanceError::Unsupported`], as does a hand-built program nested deeper
/// than [`MAX_NESTING_DEPTH`].
pub fn instrument_program(
    program: &Program,
    options: &InstrumentOptions,
) -> ProvenanceResult<Program> {
    let depth = nesting_depth(&program.body);
    if depth > MAX_NESTING_DEPTH {
        return Err(ProvenanceError::Unsupported(format!(
            "program nesting depth {depth} exceeds the {MAX_NESTING_DEPTH}-level limit"
        )));
    }
    let mut instrumenter = Instrumenter {
        options,
        operation_sites: 0,
    };
    let body = instrumenter.stmts(&program.body)?;
    log::debug!(
        "instrumented program: {} statements, {} operation sites",
        body.len(),
        instrumenter.operation_sites
    );
    Ok(Program { body })
}

struct Instrumenter<'a> {
    options: &'a InstrumentOptions,
    operation_sites: usize,
}

impl Instrumenter<'_> {
    fn loc(&self, loc: Option<SourceLocation>) -> Option<SourceLocation> {
        if self.options.preserve_locations {
            loc
        } else {
            None
        }
    }

    fn site(&mut self, expr: Expr) -> Expr {
        self.operation_sites += 1;
        expr
    }

    fn already_instrumented() -> ProvenanceError {
        ProvenanceError::Unsupported("program is already instrumented".to_string())
    }

    fn stmts(&mut self, stmts: &[Stmt]) -> ProvenanceResult<Vec<Stmt>> {
        stmts.iter().map(|stmt| self.stmt(stmt)).collect()
    }

    fn boxed_stmt(&mut self, stmt: &Stmt) -> ProvenanceResult<Box<Stmt>> {
        Ok(Box::new(self.stmt(stmt)?))
    }

    fn stmt(&mut self, stmt: &Stmt) -> ProvenanceResult<Stmt> {
        Ok(match stmt {
            Stmt::Expr(expr) => Stmt::Expr(self.expr(expr)?),
            Stmt::VarDecl { kind, declarations } => Stmt::VarDecl {
                kind: *kind,
                declarations: declarations
                    .iter()
                    .map(|decl| self.declarator(decl))
                    .collect::<ProvenanceResult<_>>()?,
            },
            Stmt::FunctionDecl(def) => Stmt::FunctionDecl(self.function(def)?),
            Stmt::Return { argument, loc } => {
                let argument = argument.as_ref().map(|arg| self.expr(arg)).transpose()?;
                let loc = self.loc(*loc);
                Stmt::Return {
                    argument: Some(self.site(return_statement::rewrite(argument, loc))),
                    loc,
                }
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => Stmt::If {
                test: self.inspected_expr(test)?,
                consequent: self.boxed_stmt(consequent)?,
                alternate: alternate
                    .as_ref()
                    .map(|alt| self.boxed_stmt(alt))
                    .transpose()?,
            },
            Stmt::While { test, body } => Stmt::While {
                test: self.expr(test)?,
                body: self.boxed_stmt(body)?,
            },
            Stmt::For {
                init,
                test,
                update,
                body,
            } => Stmt::For {
                init: init.as_ref().map(|s| self.boxed_stmt(s)).transpose()?,
                test: test.as_ref().map(|e| self.inspected_expr(e)).transpose()?,
                update: update.as_ref().map(|e| self.inspected_expr(e)).transpose()?,
                body: self.boxed_stmt(body)?,
            },
            Stmt::ForIn {
                kind,
                binding,
                object,
                body,
            } => Stmt::ForIn {
                kind: *kind,
                binding: binding.clone(),
                object: self.inspected_expr(object)?,
                body: self.boxed_stmt(body)?,
            },
            Stmt::Block(body) => Stmt::Block(self.stmts(body)?),
            Stmt::Throw(expr) => Stmt::Throw(self.expr(expr)?),
            Stmt::Try {
                block,
                param,
                handler,
            } => Stmt::Try {
                block: self.stmts(block)?,
                param: param.clone(),
                handler: self.stmts(handler)?,
            },
            Stmt::Break => Stmt::Break,
            Stmt::Continue => Stmt::Continue,
            Stmt::Empty => Stmt::Empty,
            Stmt::TrackParameters(_) => return Err(Self::already_instrumented()),
        })
    }

    fn declarator(&mut self, decl: &VarDeclarator) -> ProvenanceResult<VarDeclarator> {
        let init = decl.init.as_ref().map(|init| self.expr(init)).transpose()?;
        Ok(VarDeclarator {
            name: decl.name.clone(),
            track_init: init.as_ref().is_some_and(is_tracked),
            init,
            loc: self.loc(decl.loc),
        })
    }

    fn function(&mut self, def: &Rc<FunctionDef>) -> ProvenanceResult<Rc<FunctionDef>> {
        let mut body = Vec::with_capacity(def.body.len() + 1);
        if !def.params.is_empty() {
            body.push(Stmt::TrackParameters(def.params.clone()));
        }
        body.extend(self.stmts(&def.body)?);
        Ok(Rc::new(FunctionDef {
            name: def.name.clone(),
            params: def.params.clone(),
            body,
            loc: self.loc(def.loc),
        }))
    }

    /// An expression whose value is only tested: a bare identifier stays a plain read.
    fn inspected_expr(&mut self, expr: &Expr) -> ProvenanceResult<Expr> {
        match &expr.kind {
            ExprKind::Identifier(_) => Ok(self.plain(expr.kind.clone(), expr.loc)),
            _ => self.expr(expr),
        }
    }

    fn plain(&self, kind: ExprKind, loc: Option<SourceLocation>) -> Expr {
        Expr::new(kind, self.loc(loc))
    }

    fn boxed(&mut self, expr: &Expr) -> ProvenanceResult<Box<Expr>> {
        Ok(Box::new(self.expr(expr)?))
    }

    fn property(&mut self, property: &MemberProperty) -> ProvenanceResult<MemberProperty> {
        Ok(match property {
            MemberProperty::Named(name) => MemberProperty::Named(name.clone()),
            MemberProperty::Computed(expr) => MemberProperty::Computed(self.boxed(expr)?),
        })
    }

    /// A write target: the object expression of a member target is read (and instrumented),
    /// the target itself is not.
    fn target(&mut self, target: &Expr) -> ProvenanceResult<Expr> {
        Ok(match &target.kind {
            ExprKind::Member { object, property } => {
                let kind = ExprKind::Member {
                    object: self.boxed(object)?,
                    property: self.property(property)?,
                };
                self.plain(kind, target.loc)
            }
            other => self.plain(other.clone(), target.loc),
        })
    }

    fn expr(&mut self, expr: &Expr) -> ProvenanceResult<Expr> {
        let loc = self.loc(expr.loc);
        Ok(match &expr.kind {
            ExprKind::String(value) => self.site(literal::string(value.clone(), loc)),
            ExprKind::Number(value) => self.site(literal::number(*value, loc)),
            ExprKind::Bool(_)
            | ExprKind::Null
            | ExprKind::Undefined
            | ExprKind::This
            | ExprKind::Function(_) => {
                let kind = match &expr.kind {
                    ExprKind::Function(def) => ExprKind::Function(self.function(def)?),
                    other => other.clone(),
                };
                Expr::new(kind, loc)
            }
            ExprKind::Identifier(name) => {
                if identifier::is_untracked_name(name) {
                    Expr::new(expr.kind.clone(), loc)
                } else {
                    self.site(identifier::rewrite(name.clone(), loc))
                }
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                if op.is_arithmetic() {
                    self.site(binary::rewrite(*op, left, right, loc)?)
                } else {
                    Expr::new(
                        ExprKind::Binary {
                            op: *op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        loc,
                    )
                }
            }
            ExprKind::Logical { op, left, right } => Expr::new(
                ExprKind::Logical {
                    op: *op,
                    left: self.boxed(left)?,
                    right: self.boxed(right)?,
                },
                loc,
            ),
            ExprKind::Unary { op, argument } => {
                let argument = match (op, &argument.kind) {
                    (UnaryOp::Typeof, ExprKind::Identifier(_)) => {
                        Box::new(self.plain(argument.kind.clone(), argument.loc))
                    }
                    _ => self.boxed(argument)?,
                };
                Expr::new(ExprKind::Unary { op: *op, argument }, loc)
            }
            ExprKind::Update {
                op,
                prefix,
                argument,
            } => Expr::new(
                ExprKind::Update {
                    op: *op,
                    prefix: *prefix,
                    argument: Box::new(self.target(argument)?),
                },
                loc,
            ),
            ExprKind::Member { object, property } => {
                let object = self.expr(object)?;
                let property = self.property(property)?;
                self.site(member::rewrite(object, property, loc))
            }
            ExprKind::Call { callee, arguments } => {
                let callee = self.expr(callee)?;
                let arguments = arguments
                    .iter()
                    .map(|arg| self.expr(arg))
                    .collect::<ProvenanceResult<Vec<_>>>()?;
                self.site(call::rewrite(callee, arguments, loc))
            }
            ExprKind::Object(properties) => {
                let properties = properties
                    .iter()
                    .map(|property| self.object_property(property))
                    .collect::<ProvenanceResult<Vec<_>>>()?;
                self.site(object::rewrite(properties, loc))
            }
            ExprKind::Array(elements) => {
                let elements = elements
                    .iter()
                    .map(|element| self.expr(element))
                    .collect::<ProvenanceResult<Vec<_>>>()?;
                self.site(array::rewrite(elements, loc))
            }
            ExprKind::Assign { op, target, value } => {
                let value = self.expr(value)?;
                let target = self.target(target)?;
                self.site(assignment::rewrite(*op, target, value, loc)?)
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => Expr::new(
                ExprKind::Conditional {
                    test: self.boxed(test)?,
                    consequent: self.boxed(consequent)?,
                    alternate: self.boxed(alternate)?,
                },
                loc,
            ),
            ExprKind::Operation(_)
            | ExprKind::ShadowUpdate { .. }
            | ExprKind::LastMemberObject => return Err(Self::already_instrumented()),
        })
    }

    fn object_property(&mut self, property: &ObjectProperty) -> ProvenanceResult<ObjectProperty> {
        let value = match &property.value {
            PropertyValue::Init(expr) => PropertyValue::Init(self.expr(expr)?),
            PropertyValue::Method(def) => PropertyValue::Method(self.function(def)?),
            PropertyValue::Getter(def) => PropertyValue::Getter(self.function(def)?),
            PropertyValue::Setter(def) => PropertyValue::Setter(self.function(def)?),
        };
        Ok(ObjectProperty {
            key: property.key.clone(),
            value,
            loc: self.loc(property.loc),
        })
    }
}
