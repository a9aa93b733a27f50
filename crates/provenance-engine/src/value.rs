use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::ast::{BinaryOp, FunctionDef};
use crate::error::ProvenanceResult;
use crate::interpreter::ScopeRef;

/// A property stored on a [`JsObject`].
#[derive(Clone, Debug)]
pub enum PropertySlot {
    Data(Value),
    Accessor {
        get: Option<FunctionRef>,
        set: Option<FunctionRef>,
    },
}

#[derive(Debug, Default)]
pub struct JsObject {
    pub properties: IndexMap<String, PropertySlot>,
}

impl JsObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a getter (`is_getter`) or setter for `key`, keeping the other half of an existing
    /// accessor pair. Replaces a data property of the same name.
    pub fn define_accessor(&mut self, key: &str, is_getter: bool, function: FunctionRef) {
        let slot = self
            .properties
            .entry(key.to_string())
            .or_insert(PropertySlot::Accessor {
                get: None,
                set: None,
            });
        if !matches!(slot, PropertySlot::Accessor { .. }) {
            *slot = PropertySlot::Accessor {
                get: None,
                set: None,
            };
        }
        if let PropertySlot::Accessor { get, set } = slot {
            if is_getter {
                *get = Some(function);
            } else {
                *set = Some(function);
            }
        }
    }
}

#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<JsObject>>);

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef(..)")
    }
}

impl ObjectRef {
    pub fn new(obj: JsObject) -> Self {
        Self(Rc::new(RefCell::new(obj)))
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, JsObject> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, JsObject> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> Weak<RefCell<JsObject>> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

#[derive(Clone)]
pub struct ArrayRef(Rc<RefCell<Vec<Value>>>);

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArrayRef(len={})", self.0.borrow().len())
    }
}

impl ArrayRef {
    pub fn new(values: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(values)))
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, Vec<Value>> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, Vec<Value>> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> Weak<RefCell<Vec<Value>>> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

pub type NativeFn = dyn Fn(&Value, &[Value]) -> ProvenanceResult<Value>;

/// A host-provided function. Calls into it are opaque to provenance tracking.
#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    pub func: Rc<NativeFn>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&Value, &[Value]) -> ProvenanceResult<Value> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
        }
    }
}

pub enum JsFunction {
    Script {
        def: Rc<FunctionDef>,
        closure: ScopeRef,
    },
    Native(NativeFunction),
}

impl JsFunction {
    pub fn name(&self) -> &str {
        match self {
            Self::Script { def, .. } => def.name.as_deref().unwrap_or(""),
            Self::Native(native) => &native.name,
        }
    }
}

impl fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script { .. } => write!(f, "Script({})", self.name()),
            Self::Native(native) => write!(f, "Native({})", native.name),
        }
    }
}

pub type FunctionRef = Rc<JsFunction>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(ObjectRef),
    Array(ArrayRef),
    Function(FunctionRef),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "Undefined"),
            Self::Null => write!(f, "Null"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Number(v) => write!(f, "Number({v})"),
            Self::String(v) => write!(f, "String({v:?})"),
            Self::Object(_) => write!(f, "Object(..)"),
            Self::Array(v) => write!(f, "Array(len={})", v.borrow().len()),
            Self::Function(func) => write!(f, "Function({})", func.name()),
        }
    }
}

/// Strict (`===`) equality; reference types compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) => true,
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(v) => *v,
            Self::Number(v) => *v != 0.0 && !v.is_nan(),
            Self::String(v) => !v.is_empty(),
            Self::Object(_) | Self::Array(_) | Self::Function(_) => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Object(_) | Self::Array(_) => "object",
            Self::Function(_) => "function",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Number(v) => *v,
            Self::String(s) => string_to_number(s),
            Self::Array(_) => string_to_number(&self.to_display_string()),
            Self::Object(_) | Self::Function(_) => f64::NAN,
        }
    }

    /// The string conversion used by concatenation and `String(value)`.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(v) => v.to_string(),
            Self::Number(v) => format_number(*v),
            Self::String(v) => v.clone(),
            Self::Object(_) => "[object Object]".to_string(),
            Self::Array(values) => values
                .borrow()
                .iter()
                .map(|v| match v {
                    Self::Undefined | Self::Null => String::new(),
                    other => other.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Self::Function(func) => format!("function {}() {{ [code] }}", func.name()),
        }
    }

    /// Convert a value used in `object[key]` position into a property name.
    pub fn to_property_key(&self) -> String {
        self.to_display_string()
    }

    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined | Self::Null, Self::Undefined | Self::Null) => true,
            (Self::Undefined | Self::Null, _) | (_, Self::Undefined | Self::Null) => false,
            (Self::Number(_), Self::String(_))
            | (Self::String(_), Self::Number(_))
            | (Self::Bool(_), _)
            | (_, Self::Bool(_)) => self.to_number() == other.to_number(),
            _ => self == other,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// `Number.prototype.toString()` for radix 10: shortest round-trip digits, switching to
/// exponent notation below `1e-6` and from `1e21` up.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        // Covers negative zero as well.
        return "0".to_string();
    }

    let sign = if n < 0.0 { "-" } else { "" };
    // `{:e}` yields the shortest round-trip mantissa, e.g. `1.2345e-7`.
    let sci = format!("{:e}", n.abs());
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let k = digits.len() as i32;
    let point = exponent + 1;

    let body = if k <= point && point <= 21 {
        format!("{digits}{}", "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{int}.{frac}")
    } else if -6 < point && point <= 0 {
        format!("0.{}{digits}", "0".repeat((-point) as usize))
    } else {
        let exp_sign = if point - 1 < 0 { '-' } else { '+' };
        let (first, rest) = digits.split_at(1);
        let frac = if rest.is_empty() {
            String::new()
        } else {
            format!(".{rest}")
        };
        format!("{first}{frac}e{exp_sign}{}", (point - 1).abs())
    };
    format!("{sign}{body}")
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// Evaluate a binary operator with the target language's coercion rules.
///
/// Both the plain interpreter and the instrumented `binaryExpression` operation go through
/// this function, so instrumented programs observe the same values as uninstrumented ones.
pub fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Mod => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::StrictEq => Value::Bool(left == right),
        BinaryOp::StrictNe => Value::Bool(left != right),
        BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
        BinaryOp::Ne => Value::Bool(!left.loose_eq(right)),
        BinaryOp::Lt => compare(left, right, |o| o.is_lt()),
        BinaryOp::Le => compare(left, right, |o| o.is_le()),
        BinaryOp::Gt => compare(left, right, |o| o.is_gt()),
        BinaryOp::Ge => compare(left, right, |o| o.is_ge()),
    }
}

pub fn add(left: &Value, right: &Value) -> Value {
    let is_stringish =
        |v: &Value| matches!(v, Value::String(_) | Value::Object(_) | Value::Array(_));
    if is_stringish(left) || is_stringish(right) {
        let mut out = left.to_display_string();
        out.push_str(&right.to_display_string());
        Value::String(out)
    } else {
        Value::Number(left.to_number() + right.to_number())
    }
}

fn compare(left: &Value, right: &Value, pred: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return Value::Bool(pred(a.cmp(b)));
    }
    match left.to_number().partial_cmp(&right.to_number()) {
        Some(ordering) => Value::Bool(pred(ordering)),
        None => Value::Bool(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_concatenates_when_either_side_is_a_string() {
        assert_eq!(
            add(&Value::from("a"), &Value::Number(1.0)),
            Value::from("a1")
        );
        assert_eq!(
            add(&Value::Number(2.0), &Value::Number(3.0)),
            Value::Number(5.0)
        );
        assert_eq!(add(&Value::Null, &Value::from("x")), Value::from("nullx"));
    }

    #[test]
    fn numbers_format_like_the_target_language() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(123.456), "123.456");
        assert_eq!(format_number(-42.0), "-42");
        assert_eq!(format_number(0.000001), "0.000001");
    }

    #[test]
    fn large_and_small_numbers_switch_to_exponent_notation() {
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1.5e21), "1.5e+21");
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(1e-7), "1e-7");
        assert_eq!(format_number(-2.5e-8), "-2.5e-8");
        assert_eq!(Value::Number(1e21).to_display_string().chars().count(), 5);
    }

    #[test]
    fn functions_debug_print_their_name() {
        let native = JsFunction::Native(NativeFunction::new("upper", |_, _| Ok(Value::Undefined)));
        assert_eq!(format!("{native:?}"), "Native(upper)");
        let slot = PropertySlot::Accessor {
            get: Some(Rc::new(native)),
            set: None,
        };
        assert_eq!(format!("{slot:?}"), "Accessor { get: Some(Native(upper)), set: None }");
    }

    #[test]
    fn loose_equality_coerces_numbers_and_strings() {
        assert!(Value::from("1").loose_eq(&Value::Number(1.0)));
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.loose_eq(&Value::Number(0.0)));
    }

    #[test]
    fn arrays_display_as_comma_joined_elements() {
        let arr = Value::Array(ArrayRef::new(vec![
            Value::Number(1.0),
            Value::Null,
            Value::from("x"),
        ]));
        assert_eq!(arr.to_display_string(), "1,,x");
    }
}
