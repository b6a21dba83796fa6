// Evaluator core: namespaces, special forms, function application.
//
// Globals live in namespaces (`user`, `clojure.core`, anything created with
// `ns`). Symbol resolution order is: lexical scope, then `ns/name` if
// qualified, then the current namespace, then `clojure.core` (which holds the
// native functions from `builtins.rs`). Functions remember the namespace they
// were defined in and resolve globals there, so a session that switches
// namespace can still call functions defined elsewhere.
//
// Side output (`print`, `println`, `prn`) is appended to `output` instead of
// going to stdout; the caller decides where it goes. For the server this
// becomes an `out` frame ahead of the value.
//
// Recursion is bounded by `MAX_EVAL_DEPTH` so a runaway user function
// produces an error reply instead of overflowing the host thread's stack.

use std::collections::HashMap;
use std::rc::Rc;

use crate::builtins;
use crate::error::EvalError;
use crate::value::{Env, Lambda, MAX_VALUE_DEPTH, Value};

pub const CORE_NAMESPACE: &str = "clojure.core";

/// Deepest nesting of evaluations before `StackOverflow`.
pub const MAX_EVAL_DEPTH: usize = 128;

pub struct Interpreter {
    namespaces: HashMap<String, HashMap<String, Value>>,
    pub(crate) current_ns: String,
    pub(crate) output: String,
    depth: usize,
}

impl Interpreter {
    pub fn new(initial_ns: &str) -> Self {
        let mut core = HashMap::new();
        builtins::install(&mut core);
        let mut namespaces = HashMap::new();
        namespaces.insert(CORE_NAMESPACE.to_string(), core);
        namespaces.insert(initial_ns.to_string(), HashMap::new());
        Self {
            namespaces,
            current_ns: initial_ns.to_string(),
            output: String::new(),
            depth: 0,
        }
    }

    /// Evaluate a sequence of top-level forms; the result is the last value.
    pub fn eval_forms(&mut self, forms: &[Value]) -> Result<Value, EvalError> {
        let mut last = Value::Nil;
        for form in forms {
            last = self.eval(form, None)?;
        }
        Ok(last)
    }

    pub fn eval(&mut self, form: &Value, env: Option<&Rc<Env>>) -> Result<Value, EvalError> {
        match form {
            Value::Symbol(name) => self.resolve(name, env),
            Value::List(items) if items.is_empty() => Ok(Value::List(Vec::new())),
            Value::List(items) => {
                self.depth += 1;
                let result = if self.depth > MAX_EVAL_DEPTH {
                    Err(EvalError::StackOverflow)
                } else {
                    self.eval_list(items, env)
                };
                self.depth -= 1;
                result
            }
            Value::Vector(items) => items
                .iter()
                .map(|item| self.eval(item, env))
                .collect::<Result<Vec<_>, _>>()
                .and_then(|items| Value::Vector(items).bounded()),
            other => Ok(other.clone()),
        }
    }

    /// Call `f` with already-evaluated arguments.
    pub fn apply(&mut self, f: &Value, args: &[Value]) -> Result<Value, EvalError> {
        match f {
            // Builtins that wrap their arguments add a level of nesting.
            Value::Native(native) => (native.func)(self, args)?.bounded(),
            Value::Fn(lambda) => self.call_lambda(lambda, args),
            other => Err(EvalError::NotCallable(other.pr_str())),
        }
    }

    /// Namespaces known to the runtime, sorted.
    pub fn namespace_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.keys().cloned().collect();
        names.sort();
        names
    }

    /// Make `ns` current, creating it if needed.
    pub fn enter_namespace(&mut self, ns: &str) {
        self.namespaces.entry(ns.to_string()).or_default();
        self.current_ns = ns.to_string();
    }

    fn resolve(&self, name: &str, env: Option<&Rc<Env>>) -> Result<Value, EvalError> {
        if let Some(v) = env.and_then(|e| e.lookup(name)) {
            return Ok(v.clone());
        }
        let qualified = name
            .split_once('/')
            .filter(|(ns, local)| !ns.is_empty() && !local.is_empty());
        if let Some((ns, local)) = qualified {
            return self
                .namespaces
                .get(ns)
                .and_then(|vars| vars.get(local))
                .cloned()
                .ok_or_else(|| EvalError::Unbound(name.to_string()));
        }
        [self.current_ns.as_str(), CORE_NAMESPACE]
            .iter()
            .find_map(|ns| self.namespaces.get(*ns).and_then(|vars| vars.get(name)))
            .cloned()
            .ok_or_else(|| EvalError::Unbound(name.to_string()))
    }

    fn eval_list(&mut self, items: &[Value], env: Option<&Rc<Env>>) -> Result<Value, EvalError> {
        if let Value::Symbol(head) = &items[0] {
            let args = &items[1..];
            match head.as_str() {
                "quote" => return expect_args("quote", args, 1).map(|_| args[0].clone()),
                "if" => return self.eval_if(args, env),
                "when" => {
                    let (test, body) = args
                        .split_first()
                        .ok_or_else(|| EvalError::syntax("when", "missing test"))?;
                    if self.eval(test, env)?.is_truthy() {
                        return self.eval_body(body, env);
                    }
                    return Ok(Value::Nil);
                }
                "do" => return self.eval_body(args, env),
                "def" => return self.eval_def(args, env),
                "defn" => return self.eval_defn(args, env),
                "let" => return self.eval_let(args, env),
                "fn" => return self.make_fn(None, args, env),
                "ns" => return self.eval_ns(args),
                _ => {}
            }
        }
        let f = self.eval(&items[0], env)?;
        let args = items[1..]
            .iter()
            .map(|arg| self.eval(arg, env))
            .collect::<Result<Vec<_>, _>>()?;
        self.apply(&f, &args)
    }

    fn eval_body(&mut self, body: &[Value], env: Option<&Rc<Env>>) -> Result<Value, EvalError> {
        let mut last = Value::Nil;
        for form in body {
            last = self.eval(form, env)?;
        }
        Ok(last)
    }

    fn eval_if(&mut self, args: &[Value], env: Option<&Rc<Env>>) -> Result<Value, EvalError> {
        if !(2..=3).contains(&args.len()) {
            return Err(EvalError::syntax("if", "expected (if test then else?)"));
        }
        if self.eval(&args[0], env)?.is_truthy() {
            self.eval(&args[1], env)
        } else if let Some(otherwise) = args.get(2) {
            self.eval(otherwise, env)
        } else {
            Ok(Value::Nil)
        }
    }

    fn eval_def(&mut self, args: &[Value], env: Option<&Rc<Env>>) -> Result<Value, EvalError> {
        let name = match args.first() {
            Some(Value::Symbol(name)) if args.len() <= 2 => name.clone(),
            _ => return Err(EvalError::syntax("def", "expected (def name value?)")),
        };
        let value = match args.get(1) {
            Some(form) => self.eval(form, env)?,
            None => Value::Nil,
        };
        self.define(&name, value);
        Ok(Value::Symbol(format!("#'{}/{}", self.current_ns, name)))
    }

    fn eval_defn(&mut self, args: &[Value], env: Option<&Rc<Env>>) -> Result<Value, EvalError> {
        let name = match args.first() {
            Some(Value::Symbol(name)) => name.clone(),
            _ => return Err(EvalError::syntax("defn", "expected a name")),
        };
        // Skip an optional docstring.
        let rest = match args.get(1) {
            Some(Value::Str(_)) => &args[2..],
            _ => &args[1..],
        };
        let lambda = self.make_fn(Some(name.clone()), rest, env)?;
        self.define(&name, lambda);
        Ok(Value::Symbol(format!("#'{}/{}", self.current_ns, name)))
    }

    fn define(&mut self, name: &str, value: Value) {
        self.namespaces
            .entry(self.current_ns.clone())
            .or_default()
            .insert(name.to_string(), value);
    }

    fn eval_let(&mut self, args: &[Value], env: Option<&Rc<Env>>) -> Result<Value, EvalError> {
        let (bindings, body) = match args.split_first() {
            Some((Value::Vector(bindings), body)) if bindings.len() % 2 == 0 => (bindings, body),
            _ => {
                return Err(EvalError::syntax(
                    "let",
                    "expected a vector with an even number of forms",
                ));
            }
        };
        let mut scope = env.cloned();
        for pair in bindings.chunks(2) {
            let Value::Symbol(name) = &pair[0] else {
                return Err(EvalError::syntax("let", "binding names must be symbols"));
            };
            let value = self.eval(&pair[1], scope.as_ref())?;
            scope = Some(Env::child(scope, HashMap::from([(name.clone(), value)])));
        }
        self.eval_body(body, scope.as_ref())
    }

    fn make_fn(
        &mut self,
        name: Option<String>,
        args: &[Value],
        env: Option<&Rc<Env>>,
    ) -> Result<Value, EvalError> {
        // (fn name? [params] body...)
        let (name, args) = match args.first() {
            Some(Value::Symbol(n)) if name.is_none() => (Some(n.clone()), &args[1..]),
            _ => (name, args),
        };
        let Some((Value::Vector(param_forms), body)) = args.split_first() else {
            return Err(EvalError::syntax("fn", "expected a parameter vector"));
        };
        let mut params = Vec::new();
        let mut rest = None;
        let mut iter = param_forms.iter();
        while let Some(param) = iter.next() {
            match param {
                Value::Symbol(s) if s == "&" => match (iter.next(), iter.next()) {
                    (Some(Value::Symbol(r)), None) => rest = Some(r.clone()),
                    _ => return Err(EvalError::syntax("fn", "expected one name after &")),
                },
                Value::Symbol(s) => params.push(s.clone()),
                _ => return Err(EvalError::syntax("fn", "parameters must be symbols")),
            }
        }
        let depth = 1 + env.map_or(0, |env| env.depth());
        if depth > MAX_VALUE_DEPTH {
            return Err(EvalError::Limit(format!(
                "closure nested deeper than {MAX_VALUE_DEPTH} levels"
            )));
        }
        Ok(Value::Fn(Rc::new(Lambda {
            name,
            params,
            rest,
            body: body.to_vec(),
            env: env.cloned(),
            ns: self.current_ns.clone(),
            depth,
        })))
    }

    fn eval_ns(&mut self, args: &[Value]) -> Result<Value, EvalError> {
        // Trailing clauses such as (:require ...) are accepted and ignored:
        // every namespace can already see clojure.core.
        let Some(Value::Symbol(name)) = args.first() else {
            return Err(EvalError::syntax("ns", "expected a namespace name"));
        };
        self.namespaces.entry(name.clone()).or_default();
        self.current_ns = name.clone();
        Ok(Value::Nil)
    }

    fn call_lambda(&mut self, lambda: &Rc<Lambda>, args: &[Value]) -> Result<Value, EvalError> {
        let arity_ok = if lambda.rest.is_some() {
            args.len() >= lambda.params.len()
        } else {
            args.len() == lambda.params.len()
        };
        if !arity_ok {
            return Err(EvalError::Arity {
                name: lambda.name.clone().unwrap_or_else(|| "fn".into()),
                got: args.len(),
            });
        }
        let mut vars: HashMap<String, Value> = lambda
            .params
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect();
        if let Some(rest) = &lambda.rest {
            let extra = args[lambda.params.len()..].to_vec();
            vars.insert(
                rest.clone(),
                if extra.is_empty() {
                    Value::Nil
                } else {
                    Value::List(extra).bounded()?
                },
            );
        }
        if let Some(name) = &lambda.name {
            vars.entry(name.clone())
                .or_insert_with(|| Value::Fn(Rc::clone(lambda)));
        }
        let scope = Env::child(lambda.env.clone(), vars);

        let caller_ns = std::mem::replace(&mut self.current_ns, lambda.ns.clone());
        let result = self.eval_body(&lambda.body, Some(&scope));
        // A body that ran (ns ...) keeps its switch, like Clojure's in-ns.
        if self.current_ns == lambda.ns {
            self.current_ns = caller_ns;
        }
        result
    }
}

fn expect_args(form: &'static str, args: &[Value], n: usize) -> Result<(), EvalError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(EvalError::syntax(form, format!("expected {n} argument(s)")))
    }
}
