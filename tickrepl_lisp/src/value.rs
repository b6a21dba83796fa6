// Runtime values and the printer.
//
// `Value` is both code and data (forms read by `reader.rs` are evaluated
// directly by `eval.rs`). Functions close over an `Rc<Env>`, so values are
// deliberately `!Send`: the runtime lives on the host thread and nowhere else.
//
// Two printers:
// - `pr_str` — readable form (`"a"` keeps its quotes). This is what an eval
//   reply's `value` carries.
// - `display_str` — human form (`a`). Used by `str`, `print`, `println`.
//
// Printing, equality and drop recurse once per level of nesting, so no value
// may nest deeper than `MAX_VALUE_DEPTH`. The reader enforces it for forms;
// the interpreter checks every collection or closure it builds (`bounded`).

use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::error::EvalError;
use crate::eval::Interpreter;

/// Deepest collection or closure nesting a value may reach.
pub const MAX_VALUE_DEPTH: usize = 256;

/// Native function signature.
pub type NativeFn = fn(&mut Interpreter, &[Value]) -> Result<Value, EvalError>;

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Keyword(String),
    Symbol(String),
    List(Vec<Value>),
    Vector(Vec<Value>),
    Fn(Rc<Lambda>),
    Native(Native),
}

#[derive(Clone, Copy)]
pub struct Native {
    pub name: &'static str,
    pub func: NativeFn,
}

/// A user-defined function.
pub struct Lambda {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Vec<Value>,
    pub env: Option<Rc<Env>>,
    /// Namespace the function was defined in; its body resolves globals there.
    pub ns: String,
    /// One more than the deepest value reachable through `env`.
    pub depth: usize,
}

/// Lexical scope for `let` and function parameters.
pub struct Env {
    pub vars: HashMap<String, Value>,
    pub parent: Option<Rc<Env>>,
}

impl Env {
    pub fn child(parent: Option<Rc<Env>>, vars: HashMap<String, Value>) -> Rc<Env> {
        Rc::new(Env { vars, parent })
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        let mut env = self;
        loop {
            if let Some(v) = env.vars.get(name) {
                return Some(v);
            }
            env = env.parent.as_deref()?;
        }
    }

    /// Deepest value bound anywhere along this scope chain.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut env = Some(self);
        while let Some(scope) = env {
            let own = scope.vars.values().map(Value::depth).max().unwrap_or(0);
            deepest = deepest.max(own);
            env = scope.parent.as_deref();
        }
        deepest
    }
}

// A long `let` builds one scope per binding; unlink the chain iteratively so
// dropping it does not recurse once per scope.
impl Drop for Env {
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(env) = parent {
            parent = match Rc::try_unwrap(env) {
                Ok(mut env) => env.parent.take(),
                Err(_) => None,
            };
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::Fn(_) | Value::Native(_) => "function",
        }
    }

    /// Clojure truthiness: only `nil` and `false` are falsey.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Nesting depth: atoms are 0, a list or vector is one more than its
    /// deepest element, a function carries the depth of what it closes over.
    pub fn depth(&self) -> usize {
        match self {
            Value::List(items) | Value::Vector(items) => {
                1 + items.iter().map(Value::depth).max().unwrap_or(0)
            }
            Value::Fn(lambda) => lambda.depth,
            _ => 0,
        }
    }

    /// `self`, unless it nests deeper than `MAX_VALUE_DEPTH`.
    pub fn bounded(self) -> Result<Value, EvalError> {
        if self.depth() > MAX_VALUE_DEPTH {
            return Err(EvalError::Limit(format!(
                "value nested deeper than {MAX_VALUE_DEPTH} levels"
            )));
        }
        Ok(self)
    }

    /// Elements of a list or vector; `nil` is the empty sequence.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Vector(items) => Some(items),
            Value::Nil => Some(&[]),
            _ => None,
        }
    }

    pub fn pr_str(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out, true);
        out
    }

    pub fn display_str(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out, false);
        out
    }

    fn write_to(&self, out: &mut String, readably: bool) {
        match self {
            Value::Nil => out.push_str("nil"),
            Value::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            Value::Int(n) => {
                let _ = write!(out, "{n}");
            }
            Value::Float(f) => {
                let _ = write!(out, "{f:?}");
            }
            Value::Str(s) if readably => write_escaped(s, out),
            Value::Str(s) => out.push_str(s),
            Value::Keyword(k) => {
                out.push(':');
                out.push_str(k);
            }
            Value::Symbol(s) => out.push_str(s),
            Value::List(items) => write_seq(items, "(", ")", out, readably),
            Value::Vector(items) => write_seq(items, "[", "]", out, readably),
            Value::Fn(lambda) => {
                let _ = write!(out, "#<fn {}>", lambda.name.as_deref().unwrap_or("anonymous"));
            }
            Value::Native(native) => {
                let _ = write!(out, "#<fn {}>", native.name);
            }
        }
    }
}

fn write_seq(items: &[Value], open: &str, close: &str, out: &mut String, readably: bool) {
    out.push_str(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        item.write_to(out, readably);
    }
    out.push_str(close);
}

fn write_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Structural equality (`=`). Numbers of different kinds are not equal,
/// matching Clojure's `(= 1 1.0) ;=> false`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Str(x), Value::Str(y))
        | (Value::Keyword(x), Value::Keyword(y))
        | (Value::Symbol(x), Value::Symbol(y)) => x == y,
        (
            Value::List(x) | Value::Vector(x),
            Value::List(y) | Value::Vector(y),
        ) => x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b)),
        (Value::Fn(x), Value::Fn(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => x.name == y.name,
        _ => false,
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pr_str())
    }
}
