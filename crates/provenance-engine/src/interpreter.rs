//! Tree-walking evaluator for parsed and instrumented programs.
//!
//! Plain programs run without touching the [`TrackingContext`]. Instrumented programs reach it
//! through [`ExprKind::Operation`] nodes, which are executed by [`run_operation`] with the
//! interpreter acting as the [`OperationHost`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{
    ArgExpr, AssignOp, DeclKind, Expr, ExprKind, FunctionDef, LogicalOp, MemberProperty,
    Program, PropertyValue, Stmt, TrackingExpr, UnaryOp, UpdateOp, VarDeclarator,
};
use crate::builtins::{default_globals, primitive_property, set_array_property};
use crate::config::ExecutionPolicy;
use crate::error::{ProvenanceError, ProvenanceResult, ThrownValue};
use crate::operation::OperationId;
use crate::operations::{
    is_tracked, run_operation, EvaluatedArg, EvaluatedArgs, OperationHost, TrackedValue,
};
use crate::tracking::TrackingContext;
use crate::value::{
    apply_binary, ArrayRef, JsFunction, JsObject, NativeFunction, ObjectRef, PropertySlot,
    Value,
};

#[derive(Debug)]
struct Binding {
    value: Value,
    /// Shadow tracking: the log that last wrote this binding in an instrumented program.
    tracking: Option<OperationId>,
    mutable: bool,
}

/// A lexical environment.
#[derive(Debug, Default)]
pub struct Scope {
    bindings: HashMap<String, Binding>,
    parent: Option<ScopeRef>,
    /// `var` declarations land in the nearest function scope.
    function_scope: bool,
}

pub type ScopeRef = Rc<RefCell<Scope>>;

impl Scope {
    fn new_ref(parent: Option<ScopeRef>, function_scope: bool) -> ScopeRef {
        Rc::new(RefCell::new(Self {
            bindings: HashMap::new(),
            parent,
            function_scope,
        }))
    }

    fn define(&mut self, name: &str, value: Value, tracking: Option<OperationId>, mutable: bool) {
        self.bindings.insert(
            name.to_string(),
            Binding {
                value,
                tracking,
                mutable,
            },
        );
    }
}

/// The scope in the chain starting at `scope` that binds `name`.
fn resolve(scope: &ScopeRef, name: &str) -> Option<ScopeRef> {
    let mut current = Some(scope.clone());
    while let Some(candidate) = current {
        if candidate.borrow().bindings.contains_key(name) {
            return Some(candidate);
        }
        current = candidate.borrow().parent.clone();
    }
    None
}

fn function_scope_of(scope: &ScopeRef) -> ScopeRef {
    let mut current = scope.clone();
    loop {
        let parent = {
            let borrowed = current.borrow();
            if borrowed.function_scope {
                None
            } else {
                borrowed.parent.clone()
            }
        };
        match parent {
            Some(parent) => current = parent,
            None => return current,
        }
    }
}

/// Break the `scope -> function -> scope` cycles a finished call leaves behind when its
/// functions never escaped: every handle on `scope` other than the caller's belongs to a
/// function held only by one of the scope's own bindings.
///
/// Functions reachable through objects or nested block scopes are not detected and keep
/// the scope alive.
fn release_call_scope(scope: ScopeRef) {
    let internal = scope
        .borrow()
        .bindings
        .values()
        .filter(|binding| match &binding.value {
            Value::Function(func) => {
                Rc::strong_count(func) == 1
                    && matches!(
                        func.as_ref(),
                        JsFunction::Script { closure, .. } if Rc::ptr_eq(closure, &scope)
                    )
            }
            _ => false,
        })
        .count();
    if internal > 0 && Rc::strong_count(&scope) == internal + 1 {
        let bindings = std::mem::take(&mut scope.borrow_mut().bindings);
        drop(bindings);
    }
}

enum Completion {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Value of the last top-level expression statement and the log that produced it.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub value: Value,
    /// `None` for plain programs, or when the final expression publishes no origin.
    pub origin: Option<OperationId>,
}

pub struct Interpreter {
    policy: ExecutionPolicy,
    tracking: TrackingContext,
    globals: ScopeRef,
    scope: ScopeRef,
    this: Value,
    steps: u64,
    depth: usize,
}

impl Interpreter {
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self::with_tracking(policy, TrackingContext::new())
    }

    /// Run against an existing tracking context, e.g. one created with
    /// [`TrackingContext::starting_at`].
    pub fn with_tracking(policy: ExecutionPolicy, tracking: TrackingContext) -> Self {
        let globals = Scope::new_ref(None, true);
        {
            let mut scope = globals.borrow_mut();
            for (name, value) in default_globals() {
                scope.define(name, value, None, true);
            }
        }
        Self {
            policy,
            tracking,
            scope: globals.clone(),
            globals,
            this: Value::Undefined,
            steps: 0,
            depth: 0,
        }
    }

    /// Expose a host function to programs as a global.
    pub fn define_native(
        &mut self,
        name: &str,
        func: impl Fn(&Value, &[Value]) -> ProvenanceResult<Value> + 'static,
    ) {
        let value = Value::Function(Rc::new(JsFunction::Native(NativeFunction::new(name, func))));
        self.define_global(name, value);
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.globals.borrow_mut().define(name, value, None, true);
    }

    pub fn tracking(&self) -> &TrackingContext {
        &self.tracking
    }

    pub fn tracking_mut(&mut self) -> &mut TrackingContext {
        &mut self.tracking
    }

    pub fn into_tracking(mut self) -> TrackingContext {
        std::mem::take(&mut self.tracking)
    }

    /// Execute `program` in the global scope. Globals persist between runs.
    ///
    /// The outcome is the value of the last top-level expression statement, or the value of a
    /// top-level `return`, which ends the run early.
    pub fn run(&mut self, program: &Program) -> ProvenanceResult<RunOutcome> {
        self.steps = 0;
        self.depth = 0;
        self.scope = self.globals.clone();
        self.tracking.set_last_operation(None);
        let result = self.run_top_level(&program.body);
        self.tracking.reset_transient();
        if let Err(err) = &result {
            log::debug!("run failed after {} steps: {err}", self.steps);
        }
        result
    }

    fn run_top_level(&mut self, body: &[Stmt]) -> ProvenanceResult<RunOutcome> {
        self.hoist(body);
        let mut outcome = RunOutcome {
            value: Value::Undefined,
            origin: None,
        };
        for stmt in body {
            if let Stmt::Expr(expr) = stmt {
                self.tick()?;
                let value = self.eval(expr)?;
                let origin = if is_tracked(expr) {
                    self.tracking.last_operation()
                } else {
                    None
                };
                outcome = RunOutcome { value, origin };
                continue;
            }
            match self.exec_stmt(stmt)? {
                Completion::Normal => {}
                // An instrumented `return` completes its operation last, so the register
                // holds the returned value's origin. Plain programs leave it empty.
                Completion::Return(value) => {
                    return Ok(RunOutcome {
                        value,
                        origin: self.tracking.last_operation(),
                    })
                }
                Completion::Break | Completion::Continue => {
                    return Err(ProvenanceError::Runtime(
                        "Illegal break or continue statement".to_string(),
                    ))
                }
            }
        }
        Ok(outcome)
    }

    fn tick(&mut self) -> ProvenanceResult<()> {
        self.steps += 1;
        if self.steps > self.policy.max_steps {
            return Err(ProvenanceError::StepLimit);
        }
        Ok(())
    }

    fn with_scope<T>(
        &mut self,
        scope: ScopeRef,
        f: impl FnOnce(&mut Self) -> ProvenanceResult<T>,
    ) -> ProvenanceResult<T> {
        let saved = std::mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = saved;
        result
    }

    fn child_scope(&self) -> ScopeRef {
        Scope::new_ref(Some(self.scope.clone()), false)
    }

    fn closure(&self, def: &Rc<FunctionDef>) -> Value {
        Value::Function(Rc::new(JsFunction::Script {
            def: def.clone(),
            closure: self.scope.clone(),
        }))
    }

    /// Bind the function declarations of `body` before any of its statements run.
    fn hoist(&mut self, body: &[Stmt]) {
        for stmt in body {
            if let Stmt::FunctionDecl(def) = stmt {
                if let Some(name) = &def.name {
                    let function = self.closure(def);
                    self.scope.borrow_mut().define(name, function, None, true);
                }
            }
        }
    }

    fn exec_statements(&mut self, body: &[Stmt]) -> ProvenanceResult<Completion> {
        self.hoist(body);
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_block(&mut self, body: &[Stmt]) -> ProvenanceResult<Completion> {
        let scope = self.child_scope();
        self.with_scope(scope, |interp| interp.exec_statements(body))
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> ProvenanceResult<Completion> {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::VarDecl { kind, declarations } => {
                for decl in declarations {
                    self.declare(*kind, decl)?;
                }
            }
            Stmt::FunctionDecl(_) | Stmt::Empty => {}
            Stmt::Return { argument, .. } => {
                let value = match argument {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                return Ok(Completion::Return(value));
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.is_truthy() {
                    return self.exec_stmt(consequent);
                }
                if let Some(alternate) = alternate {
                    return self.exec_stmt(alternate);
                }
            }
            Stmt::While { test, body } => {
                while self.eval(test)?.is_truthy() {
                    match self.exec_stmt(body)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let scope = self.child_scope();
                return self.with_scope(scope, |interp| {
                    interp.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body)
                });
            }
            Stmt::ForIn {
                kind,
                binding,
                object,
                body,
            } => {
                let object = self.eval(object)?;
                return self.exec_for_in(*kind, binding, &object, body);
            }
            Stmt::Block(body) => return self.exec_block(body),
            Stmt::Break => return Ok(Completion::Break),
            Stmt::Continue => return Ok(Completion::Continue),
            Stmt::Throw(expr) => {
                let value = self.eval(expr)?;
                return Err(ProvenanceError::Thrown(ThrownValue(value)));
            }
            Stmt::Try {
                block,
                param,
                handler,
            } => {
                return match self.exec_block(block) {
                    Err(err) if err.is_catchable() => {
                        let scope = self.child_scope();
                        if let Some(param) = param {
                            scope
                                .borrow_mut()
                                .define(param, err.into_caught_value(), None, true);
                        }
                        self.with_scope(scope, |interp| interp.exec_statements(handler))
                    }
                    other => other,
                };
            }
            Stmt::TrackParameters(params) => {
                let origins = self.tracking.take_argument_tracking().unwrap_or_default();
                let mut scope = self.scope.borrow_mut();
                for (param, origin) in params.iter().zip(origins) {
                    if let Some(binding) = scope.bindings.get_mut(param) {
                        binding.tracking = Some(origin);
                    }
                }
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> ProvenanceResult<Completion> {
        if let Some(init) = init {
            self.exec_stmt(init)?;
        }
        loop {
            if let Some(test) = test {
                if !self.eval(test)?.is_truthy() {
                    break;
                }
            }
            match self.exec_stmt(body)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
            if let Some(update) = update {
                self.eval(update)?;
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_for_in(
        &mut self,
        kind: Option<DeclKind>,
        binding: &str,
        object: &Value,
        body: &Stmt,
    ) -> ProvenanceResult<Completion> {
        let keys: Vec<String> = match object {
            Value::Object(obj) => obj.borrow().properties.keys().cloned().collect(),
            Value::Array(arr) => (0..arr.borrow().len()).map(|i| i.to_string()).collect(),
            Value::String(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        };

        for key in keys {
            let scope = self.child_scope();
            let key = Value::String(key);
            match kind {
                Some(DeclKind::Let) | Some(DeclKind::Const) => {
                    let mutable = kind != Some(DeclKind::Const);
                    scope.borrow_mut().define(binding, key, None, mutable);
                }
                Some(DeclKind::Var) => {
                    function_scope_of(&self.scope)
                        .borrow_mut()
                        .define(binding, key, None, true);
                }
                None => {
                    self.write_binding(binding, key)?;
                    self.set_binding_tracking(binding, None);
                }
            }
            match self.with_scope(scope, |interp| interp.exec_stmt(body))? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
        }
        Ok(Completion::Normal)
    }

    fn declare(&mut self, kind: DeclKind, decl: &VarDeclarator) -> ProvenanceResult<()> {
        let value = match &decl.init {
            Some(init) => self.eval(init)?,
            None => Value::Undefined,
        };
        let tracking = if decl.track_init {
            self.tracking.last_operation()
        } else {
            None
        };
        match kind {
            DeclKind::Var => {
                let scope = function_scope_of(&self.scope);
                let mut scope = scope.borrow_mut();
                // `var x;` keeps an existing value.
                if decl.init.is_none() && scope.bindings.contains_key(&decl.name) {
                    return Ok(());
                }
                scope.define(&decl.name, value, tracking, true);
            }
            DeclKind::Let | DeclKind::Const => {
                self.scope
                    .borrow_mut()
                    .define(&decl.name, value, tracking, kind == DeclKind::Let);
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<(Value, Option<OperationId>)> {
        let scope = resolve(&self.scope, name)?;
        let scope = scope.borrow();
        let binding = scope.bindings.get(name)?;
        Some((binding.value.clone(), binding.tracking))
    }

    /// Assign to an existing binding; unbound names become globals.
    fn write_binding(&mut self, name: &str, value: Value) -> ProvenanceResult<()> {
        let Some(scope) = resolve(&self.scope, name) else {
            self.globals.borrow_mut().define(name, value, None, true);
            return Ok(());
        };
        let mut scope = scope.borrow_mut();
        match scope.bindings.get_mut(name) {
            Some(binding) if !binding.mutable => Err(ProvenanceError::Runtime(format!(
                "Assignment to constant variable '{name}'"
            ))),
            Some(binding) => {
                binding.value = value;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn set_binding_tracking(&mut self, name: &str, origin: Option<OperationId>) {
        if let Some(scope) = resolve(&self.scope, name) {
            if let Some(binding) = scope.borrow_mut().bindings.get_mut(name) {
                binding.tracking = origin;
            }
        }
    }

    fn read_identifier(&self, name: &str) -> ProvenanceResult<Value> {
        self.lookup(name)
            .map(|(value, _)| value)
            .ok_or_else(|| ProvenanceError::Runtime(format!("{name} is not defined")))
    }

    fn property_key(&mut self, property: &MemberProperty) -> ProvenanceResult<String> {
        match property {
            MemberProperty::Named(name) => Ok(name.clone()),
            MemberProperty::Computed(expr) => Ok(self.eval(expr)?.to_property_key()),
        }
    }

    fn eval_tracked(
        &mut self,
        expr: &Expr,
        tracking: &TrackingExpr,
    ) -> ProvenanceResult<TrackedValue> {
        let value = self.eval(expr)?;
        let origin = match tracking {
            TrackingExpr::Null => None,
            TrackingExpr::LastOperation => self.tracking.last_operation(),
            TrackingExpr::Shadow(name) => self.lookup(name).and_then(|(_, origin)| origin),
            TrackingExpr::LastMemberObject => self.tracking.last_member_object().1,
        };
        Ok(TrackedValue::new(value, origin))
    }

    fn eval(&mut self, expr: &Expr) -> ProvenanceResult<Value> {
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::String(s) => Ok(Value::String(s.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Undefined => Ok(Value::Undefined),
            ExprKind::This => Ok(self.this.clone()),
            ExprKind::Identifier(name) => self.read_identifier(name),
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(apply_binary(*op, &left, &right))
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval(left)?;
                match (op, left.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            ExprKind::Unary { op, argument } => self.eval_unary(*op, argument),
            ExprKind::Update {
                op,
                prefix,
                argument,
            } => self.eval_update(*op, *prefix, argument),
            ExprKind::Member { object, property } => {
                let object = self.eval(object)?;
                let key = self.property_key(property)?;
                self.get_property(&object, &key)
            }
            ExprKind::Call { callee, arguments } => {
                let (function, this) = match &callee.kind {
                    ExprKind::Member { object, property } => {
                        let object = self.eval(object)?;
                        let key = self.property_key(property)?;
                        (self.get_property(&object, &key)?, object)
                    }
                    _ => (self.eval(callee)?, Value::Undefined),
                };
                let args = arguments
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<ProvenanceResult<Vec<_>>>()?;
                self.call_value(&function, this, args)
            }
            ExprKind::Object(properties) => {
                let mut object = JsObject::new();
                for property in properties {
                    match &property.value {
                        PropertyValue::Init(value) => {
                            let value = self.eval(value)?;
                            object
                                .properties
                                .insert(property.key.clone(), PropertySlot::Data(value));
                        }
                        PropertyValue::Method(def) => {
                            let function = self.closure(def);
                            object
                                .properties
                                .insert(property.key.clone(), PropertySlot::Data(function));
                        }
                        PropertyValue::Getter(def) | PropertyValue::Setter(def) => {
                            if let Value::Function(function) = self.closure(def) {
                                let is_getter = matches!(property.value, PropertyValue::Getter(_));
                                object.define_accessor(&property.key, is_getter, function);
                            }
                        }
                    }
                }
                Ok(Value::Object(ObjectRef::new(object)))
            }
            ExprKind::Array(elements) => {
                let values = elements
                    .iter()
                    .map(|element| self.eval(element))
                    .collect::<ProvenanceResult<Vec<_>>>()?;
                Ok(Value::Array(ArrayRef::new(values)))
            }
            ExprKind::Function(def) => Ok(self.closure(def)),
            ExprKind::Assign { op, target, value } => self.eval_assign(*op, target, value),
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            ExprKind::Operation(op) => {
                let mut args = EvaluatedArgs::new();
                for (name, arg) in &op.args {
                    let evaluated = match arg {
                        ArgExpr::Single { value, tracking } => {
                            EvaluatedArg::Single(self.eval_tracked(value, tracking)?)
                        }
                        ArgExpr::Array(items) => EvaluatedArg::Array(
                            items
                                .iter()
                                .map(|(value, tracking)| self.eval_tracked(value, tracking))
                                .collect::<ProvenanceResult<Vec<_>>>()?,
                        ),
                    };
                    args.insert(name.clone(), evaluated);
                }
                run_operation(op, args, self)
            }
            ExprKind::ShadowUpdate { name, value } => {
                let value = self.eval(value)?;
                let origin = self.tracking.last_operation();
                self.set_binding_tracking(name, origin);
                Ok(value)
            }
            ExprKind::LastMemberObject => Ok(self.tracking.last_member_object().0),
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, argument: &Expr) -> ProvenanceResult<Value> {
        if op == UnaryOp::Typeof {
            if let ExprKind::Identifier(name) = &argument.kind {
                if self.lookup(name).is_none() {
                    return Ok(Value::from("undefined"));
                }
            }
        }
        let value = self.eval(argument)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.is_truthy()),
            UnaryOp::Minus => Value::Number(-value.to_number()),
            UnaryOp::Plus => Value::Number(value.to_number()),
            UnaryOp::Typeof => Value::from(value.type_of()),
        })
    }

    fn eval_update(&mut self, op: UpdateOp, prefix: bool, argument: &Expr) -> ProvenanceResult<Value> {
        let delta = match op {
            UpdateOp::Increment => 1.0,
            UpdateOp::Decrement => -1.0,
        };
        let (old, new) = match &argument.kind {
            ExprKind::Identifier(name) => {
                let old = self.read_identifier(name)?.to_number();
                let new = old + delta;
                self.write_binding(name, Value::Number(new))?;
                // The written number no longer derives from any recorded operation.
                self.set_binding_tracking(name, None);
                (old, new)
            }
            ExprKind::Member { object, property } => {
                let object = self.eval(object)?;
                let key = self.property_key(property)?;
                let old = self.get_property(&object, &key)?.to_number();
                let new = old + delta;
                self.set_property(&object, &key, Value::Number(new))?;
                (old, new)
            }
            _ => {
                return Err(ProvenanceError::Runtime(
                    "Invalid left-hand side in update expression".to_string(),
                ))
            }
        };
        Ok(Value::Number(if prefix { new } else { old }))
    }

    fn eval_assign(&mut self, op: AssignOp, target: &Expr, value: &Expr) -> ProvenanceResult<Value> {
        match &target.kind {
            ExprKind::Identifier(name) => {
                let new = match op.binary_op() {
                    None => self.eval(value)?,
                    Some(binary) => {
                        let current = self.read_identifier(name)?;
                        let value = self.eval(value)?;
                        apply_binary(binary, &current, &value)
                    }
                };
                self.write_binding(name, new.clone())?;
                Ok(new)
            }
            ExprKind::Member { object, property } => {
                let object = self.eval(object)?;
                let key = self.property_key(property)?;
                let new = match op.binary_op() {
                    None => self.eval(value)?,
                    Some(binary) => {
                        let current = self.get_property(&object, &key)?;
                        let value = self.eval(value)?;
                        apply_binary(binary, &current, &value)
                    }
                };
                self.set_property(&object, &key, new.clone())?;
                Ok(new)
            }
            _ => Err(ProvenanceError::Runtime(
                "Invalid left-hand side in assignment".to_string(),
            )),
        }
    }

    fn call_value(&mut self, callee: &Value, this: Value, args: Vec<Value>) -> ProvenanceResult<Value> {
        let Value::Function(function) = callee else {
            return Err(ProvenanceError::Runtime(format!(
                "{} is not a function",
                callee.to_display_string()
            )));
        };
        match function.as_ref() {
            JsFunction::Native(native) => (native.func)(&this, &args),
            JsFunction::Script { def, closure } => self.call_script(def, closure, this, args),
        }
    }

    fn call_script(
        &mut self,
        def: &Rc<FunctionDef>,
        closure: &ScopeRef,
        this: Value,
        args: Vec<Value>,
    ) -> ProvenanceResult<Value> {
        if self.depth >= self.policy.max_call_depth {
            return Err(ProvenanceError::CallDepth);
        }
        // Argument records are addressed to a parameter prologue; functions without one must
        // not leave them for a nested call to pick up.
        if !matches!(def.body.first(), Some(Stmt::TrackParameters(_))) {
            self.tracking.take_argument_tracking();
        }

        let scope = Scope::new_ref(Some(closure.clone()), true);
        {
            let mut scope = scope.borrow_mut();
            if let Some(name) = &def.name {
                let function = Value::Function(Rc::new(JsFunction::Script {
                    def: def.clone(),
                    closure: closure.clone(),
                }));
                scope.define(name, function, None, true);
            }
            let mut args = args.into_iter();
            for param in &def.params {
                scope.define(param, args.next().unwrap_or_default(), None, true);
            }
        }

        let saved_this = std::mem::replace(&mut self.this, this);
        self.depth += 1;
        let result = self.with_scope(scope.clone(), |interp| interp.exec_statements(&def.body));
        self.depth -= 1;
        self.this = saved_this;
        release_call_scope(scope);

        match result? {
            Completion::Return(value) => Ok(value),
            Completion::Normal => {
                // Falling off the end returns an untracked `undefined`.
                self.tracking.set_last_operation(None);
                Ok(Value::Undefined)
            }
            Completion::Break | Completion::Continue => Err(ProvenanceError::Runtime(
                "Illegal break or continue statement".to_string(),
            )),
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        // Script functions hold their defining scope; clearing the globals breaks the
        // scope -> function -> scope cycles of top-level declarations.
        if let Ok(mut globals) = self.globals.try_borrow_mut() {
            globals.bindings.clear();
        }
    }
}

impl OperationHost for Interpreter {
    fn tracking(&mut self) -> &mut TrackingContext {
        &mut self.tracking
    }

    fn get_property(&mut self, object: &Value, key: &str) -> ProvenanceResult<Value> {
        match object {
            Value::Undefined | Value::Null => Err(ProvenanceError::Runtime(format!(
                "Cannot read properties of {} (reading '{key}')",
                object.to_display_string()
            ))),
            Value::Object(obj) => {
                let slot = obj.borrow().properties.get(key).cloned();
                match slot {
                    Some(PropertySlot::Data(value)) => Ok(value),
                    Some(PropertySlot::Accessor {
                        get: Some(getter), ..
                    }) => self.call_value(&Value::Function(getter), object.clone(), Vec::new()),
                    Some(PropertySlot::Accessor { get: None, .. }) | None => Ok(Value::Undefined),
                }
            }
            other => Ok(primitive_property(other, key).unwrap_or_default()),
        }
    }

    fn set_property(&mut self, object: &Value, key: &str, value: Value) -> ProvenanceResult<()> {
        match object {
            Value::Undefined | Value::Null => Err(ProvenanceError::Runtime(format!(
                "Cannot set properties of {} (setting '{key}')",
                object.to_display_string()
            ))),
            Value::Object(obj) => {
                let accessor = match obj.borrow().properties.get(key) {
                    Some(PropertySlot::Accessor { set, .. }) => Some(set.clone()),
                    _ => None,
                };
                match accessor {
                    Some(Some(setter)) => {
                        self.call_value(&Value::Function(setter), object.clone(), vec![value])?;
                    }
                    // Getter-only properties ignore writes.
                    Some(None) => {}
                    None => {
                        obj.borrow_mut()
                            .properties
                            .insert(key.to_string(), PropertySlot::Data(value));
                    }
                }
                Ok(())
            }
            Value::Array(arr) => {
                set_array_property(arr, key, value, self.policy.max_array_length)
            }
            _ => Ok(()),
        }
    }

    fn call_function(
        &mut self,
        callee: &Value,
        this: Value,
        args: Vec<Value>,
    ) -> ProvenanceResult<Value> {
        self.call_value(callee, this, args)
    }

    fn read_variable(&mut self, name: &str) -> Option<(Value, Option<OperationId>)> {
        self.lookup(name)
    }

    fn write_variable(&mut self, name: &str, value: Value) -> ProvenanceResult<()> {
        self.write_binding(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn run(src: &str) -> ProvenanceResult<Value> {
        let program = parse_program(src)?;
        let mut interp = Interpreter::new(ExecutionPolicy::default());
        Ok(interp.run(&program)?.value)
    }

    #[test]
    fn closures_capture_their_defining_scope() {
        let value = run(
            "function counter() { var n = 0; return function () { n += 1; return n; }; }
             var c = counter(); c(); c();",
        )
        .unwrap();
        assert_eq!(value, Value::Number(2.0));
    }

    #[test]
    fn methods_receive_this_and_accessors_run() {
        let value = run(
            "var o = { name: 'a', get upper() { return this.name.toUpperCase(); },
                       set upper(v) { this.name = v.toLowerCase(); },
                       greet: function (p) { return p + this.upper; } };
             o.upper = 'XY';
             o.greet('hi ');",
        )
        .unwrap();
        assert_eq!(value, Value::from("hi XY"));
    }

    #[test]
    fn loops_and_control_flow() {
        let value = run(
            "var out = '';
             for (var i = 0; i < 10; i++) { if (i == 2) continue; if (i > 4) break; out += i; }
             var keys = [];
             for (var k in { a: 1, b: 2 }) keys.push(k);
             var j = 0; while (true) { j++; if (j === 3) break; }
             out + '|' + keys.join(',') + '|' + j;",
        )
        .unwrap();
        assert_eq!(value, Value::from("0134|a,b|3"));
    }

    #[test]
    fn try_catch_observes_thrown_values_and_runtime_errors() {
        let value = run(
            "var a; try { throw 'boom'; } catch (e) { a = e; }
             var b; try { undefinedName; } catch (e) { b = e; }
             a + ' / ' + b;",
        )
        .unwrap();
        assert_eq!(
            value,
            Value::from("boom / Runtime error: undefinedName is not defined")
        );
    }

    #[test]
    fn uncaught_throw_surfaces_as_error() {
        let err = run("throw 'x';").unwrap_err();
        assert!(matches!(err, ProvenanceError::Thrown(_)));
    }

    #[test]
    fn const_bindings_reject_writes() {
        let err = run("const x = 1; x = 2;").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Runtime error: Assignment to constant variable 'x'"
        );
    }

    #[test]
    fn block_scoped_let_does_not_leak() {
        let value = run("let x = 'outer'; { let x = 'inner'; } x;").unwrap();
        assert_eq!(value, Value::from("outer"));
    }

    #[test]
    fn released_call_scopes_keep_escaping_closures_working() {
        let value = run(
            "function outer() {
                 function helper() { return 'h'; }
                 return function () { return helper(); };
             }
             var f = outer();
             f() + f();",
        )
        .unwrap();
        assert_eq!(value, Value::from("hh"));

        let value = run(
            "function twice(s) {
                 function wrap(x) { return '<' + x + '>'; }
                 return wrap(wrap(s));
             }
             twice('a') + twice('b');",
        )
        .unwrap();
        assert_eq!(value, Value::from("<<a>><<b>>"));
    }

    #[test]
    fn top_level_return_ends_the_run() {
        let value = run("var s = 'done'; if (s) { return s; } s = 'late'; s;").unwrap();
        assert_eq!(value, Value::from("done"));
        assert_eq!(run("return;").unwrap(), Value::Undefined);
        assert!(matches!(run("break;"), Err(ProvenanceError::Runtime(_))));
    }

    #[test]
    fn oversized_array_writes_are_runtime_errors() {
        let value = run(
            "var a = []; var r;
             try { a[4000000000] = 1; r = 'no'; } catch (e) { r = 'caught'; }
             r + a.length;",
        )
        .unwrap();
        assert_eq!(value, Value::from("caught0"));

        let program = parse_program("var b = [1, 2]; b.length = 8;").unwrap();
        let mut interp = Interpreter::new(ExecutionPolicy {
            max_array_length: 4,
            ..ExecutionPolicy::default()
        });
        assert!(matches!(
            interp.run(&program),
            Err(ProvenanceError::Runtime(_))
        ));
    }

    #[test]
    fn limits_are_not_catchable() {
        let program = parse_program("try { while (true) {} } catch (e) {}").unwrap();
        let mut interp = Interpreter::new(ExecutionPolicy {
            max_steps: 100,
            ..ExecutionPolicy::default()
        });
        assert!(matches!(
            interp.run(&program).unwrap_err(),
            ProvenanceError::StepLimit
        ));

        let program = parse_program("function f() { return f(); } f();").unwrap();
        let mut interp = Interpreter::new(ExecutionPolicy {
            max_call_depth: 16,
            ..ExecutionPolicy::default()
        });
        assert!(matches!(
            interp.run(&program).unwrap_err(),
            ProvenanceError::CallDepth
        ));
    }

    #[test]
    fn natives_are_callable_from_programs() {
        let program = parse_program("twice('ab');").unwrap();
        let mut interp = Interpreter::new(ExecutionPolicy::default());
        interp.define_native("twice", |_, args| {
            let s = args.first().map(Value::to_display_string).unwrap_or_default();
            Ok(Value::String(s.repeat(2)))
        });
        let outcome = interp.run(&program).unwrap();
        assert_eq!(outcome.value, Value::from("abab"));
        assert_eq!(outcome.origin, None);
        assert!(interp.tracking().logs().is_empty());
    }

    #[test]
    fn typeof_tolerates_unbound_names() {
        assert_eq!(run("typeof nothing;").unwrap(), Value::from("undefined"));
        assert_eq!(run("typeof 'a';").unwrap(), Value::from("string"));
    }
}
