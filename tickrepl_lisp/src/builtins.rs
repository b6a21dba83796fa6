// Native functions installed into `clojure.core`.
//
// Arithmetic stays in `i64` with checked operations and promotes to `f64`
// as soon as any argument is a float. `/` on integers returns an integer when
// the division is exact and a float otherwise (there are no ratios here).

use std::collections::HashMap;

use crate::error::EvalError;
use crate::eval::Interpreter;
use crate::value::{Native, Value, values_equal};

/// Largest sequence `range` will materialise.
pub const MAX_RANGE_LEN: i64 = 1_000_000;

pub fn install(core: &mut HashMap<String, Value>) {
    let natives: &[(&'static str, crate::value::NativeFn)] = &[
        ("+", add),
        ("-", sub),
        ("*", mul),
        ("/", div),
        ("mod", modulo),
        ("inc", inc),
        ("dec", dec),
        ("=", eq),
        ("not=", not_eq),
        ("<", lt),
        (">", gt),
        ("<=", le),
        (">=", ge),
        ("not", not),
        ("nil?", is_nil),
        ("str", str_),
        ("pr-str", pr_str),
        ("print", print),
        ("println", println),
        ("prn", prn),
        ("list", list),
        ("vector", vector),
        ("count", count),
        ("first", first),
        ("rest", rest),
        ("cons", cons),
        ("conj", conj),
        ("range", range),
        ("reduce", reduce),
        ("map", map),
        ("filter", filter),
        ("apply", apply),
        ("identity", identity),
    ];
    for (name, func) in natives {
        core.insert(
            (*name).to_string(),
            Value::Native(Native {
                name: *name,
                func: *func,
            }),
        );
    }
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(n) => Value::Int(n),
            Num::Float(f) => Value::Float(f),
        }
    }
}

fn num(op: &str, v: &Value) -> Result<Num, EvalError> {
    match v {
        Value::Int(n) => Ok(Num::Int(*n)),
        Value::Float(f) => Ok(Num::Float(*f)),
        other => Err(type_error(op, "number", other)),
    }
}

fn type_error(op: &str, expected: &'static str, got: &Value) -> EvalError {
    EvalError::Type {
        op: op.to_string(),
        expected,
        got: got.type_name(),
    }
}

fn arity(name: &str, args: &[Value], ok: bool) -> Result<(), EvalError> {
    if ok {
        Ok(())
    } else {
        Err(EvalError::Arity {
            name: name.to_string(),
            got: args.len(),
        })
    }
}

fn combine(
    a: Num,
    b: Num,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Num, EvalError> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => int_op(x, y).map(Num::Int).ok_or(EvalError::Overflow),
        _ => Ok(Num::Float(float_op(a.as_f64(), b.as_f64()))),
    }
}

fn fold_numbers(
    op: &str,
    args: &[Value],
    identity: i64,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    let mut acc = Num::Int(identity);
    for arg in args {
        acc = combine(acc, num(op, arg)?, int_op, float_op)?;
    }
    Ok(acc.into_value())
}

fn add(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    fold_numbers("+", args, 0, i64::checked_add, |a, b| a + b)
}

fn mul(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    fold_numbers("*", args, 1, i64::checked_mul, |a, b| a * b)
}

fn sub(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("-", args, !args.is_empty())?;
    if args.len() == 1 {
        return combine(Num::Int(0), num("-", &args[0])?, i64::checked_sub, |a, b| a - b)
            .map(Num::into_value);
    }
    let mut acc = num("-", &args[0])?;
    for arg in &args[1..] {
        acc = combine(acc, num("-", arg)?, i64::checked_sub, |a, b| a - b)?;
    }
    Ok(acc.into_value())
}

fn div(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("/", args, !args.is_empty())?;
    let (mut acc, rest) = if args.len() == 1 {
        (Num::Int(1), args)
    } else {
        (num("/", &args[0])?, &args[1..])
    };
    for arg in rest {
        let divisor = num("/", arg)?;
        acc = match (acc, divisor) {
            (_, Num::Int(0)) => return Err(EvalError::DivideByZero),
            (Num::Int(x), Num::Int(y)) if x.checked_rem(y) == Some(0) => {
                Num::Int(x.checked_div(y).ok_or(EvalError::Overflow)?)
            }
            _ => Num::Float(acc.as_f64() / divisor.as_f64()),
        };
    }
    Ok(acc.into_value())
}

fn modulo(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("mod", args, args.len() == 2)?;
    match (num("mod", &args[0])?, num("mod", &args[1])?) {
        (_, Num::Int(0)) => Err(EvalError::DivideByZero),
        (Num::Int(x), Num::Int(y)) => x
            .checked_rem_euclid(y)
            .map(Value::Int)
            .ok_or(EvalError::Overflow),
        (a, b) => Ok(Value::Float(a.as_f64().rem_euclid(b.as_f64()))),
    }
}

fn inc(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("inc", args, args.len() == 1)?;
    combine(num("inc", &args[0])?, Num::Int(1), i64::checked_add, |a, b| a + b).map(Num::into_value)
}

fn dec(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("dec", args, args.len() == 1)?;
    combine(num("dec", &args[0])?, Num::Int(1), i64::checked_sub, |a, b| a - b).map(Num::into_value)
}

fn eq(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("=", args, !args.is_empty())?;
    Ok(Value::Bool(args.windows(2).all(|w| values_equal(&w[0], &w[1]))))
}

fn not_eq(interp: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    eq(interp, args).map(|v| Value::Bool(!v.is_truthy()))
}

fn compare_chain(op: &str, args: &[Value], ok: fn(f64, f64) -> bool) -> Result<Value, EvalError> {
    arity(op, args, !args.is_empty())?;
    let nums = args
        .iter()
        .map(|a| num(op, a))
        .collect::<Result<Vec<_>, _>>()?;
    let holds = nums.windows(2).all(|w| match (w[0], w[1]) {
        (Num::Int(x), Num::Int(y)) => ok(f64::from(x.cmp(&y) as i8), 0.0),
        (a, b) => ok(a.as_f64(), b.as_f64()),
    });
    Ok(Value::Bool(holds))
}

// Integer pairs compare via `cmp` mapped onto (ordering, 0) so large values
// don't lose precision through f64: `x < y` becomes `-1 < 0`.
fn lt(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    compare_chain("<", args, |a, b| a < b)
}

fn gt(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    compare_chain(">", args, |a, b| a > b)
}

fn le(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    compare_chain("<=", args, |a, b| a <= b)
}

fn ge(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    compare_chain(">=", args, |a, b| a >= b)
}

fn not(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("not", args, args.len() == 1)?;
    Ok(Value::Bool(!args[0].is_truthy()))
}

fn is_nil(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("nil?", args, args.len() == 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Nil)))
}

fn str_(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    let joined: String = args
        .iter()
        .map(|a| match a {
            Value::Nil => String::new(),
            other => other.display_str(),
        })
        .collect();
    Ok(Value::Str(joined))
}

fn pr_str(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Str(join(args, Value::pr_str)))
}

fn join(args: &[Value], render: fn(&Value) -> String) -> String {
    args.iter().map(render).collect::<Vec<_>>().join(" ")
}

fn print(interp: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    let text = join(args, Value::display_str);
    interp.output.push_str(&text);
    Ok(Value::Nil)
}

fn println(interp: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    let text = join(args, Value::display_str);
    interp.output.push_str(&text);
    interp.output.push('\n');
    Ok(Value::Nil)
}

fn prn(interp: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    let text = join(args, Value::pr_str);
    interp.output.push_str(&text);
    interp.output.push('\n');
    Ok(Value::Nil)
}

fn list(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::List(args.to_vec()))
}

fn vector(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Vector(args.to_vec()))
}

fn seq_arg<'a>(op: &str, v: &'a Value) -> Result<&'a [Value], EvalError> {
    v.as_seq().ok_or_else(|| type_error(op, "sequence", v))
}

fn count(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("count", args, args.len() == 1)?;
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        other => seq_arg("count", other)?.len(),
    };
    Ok(Value::Int(i64::try_from(n).map_err(|_| EvalError::Overflow)?))
}

fn first(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("first", args, args.len() == 1)?;
    Ok(seq_arg("first", &args[0])?
        .first()
        .cloned()
        .unwrap_or(Value::Nil))
}

fn rest(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("rest", args, args.len() == 1)?;
    let items = seq_arg("rest", &args[0])?;
    Ok(Value::List(items.iter().skip(1).cloned().collect()))
}

fn cons(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("cons", args, args.len() == 2)?;
    let mut items = vec![args[0].clone()];
    items.extend_from_slice(seq_arg("cons", &args[1])?);
    Ok(Value::List(items))
}

fn conj(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("conj", args, !args.is_empty())?;
    // Lists grow at the front, vectors at the back.
    match &args[0] {
        Value::Vector(items) => {
            let mut items = items.clone();
            items.extend_from_slice(&args[1..]);
            Ok(Value::Vector(items))
        }
        other => {
            let mut items: Vec<Value> = args[1..].iter().rev().cloned().collect();
            items.extend_from_slice(seq_arg("conj", other)?);
            Ok(Value::List(items))
        }
    }
}

fn int_arg(op: &str, v: &Value) -> Result<i64, EvalError> {
    match v {
        Value::Int(n) => Ok(*n),
        other => Err(type_error(op, "integer", other)),
    }
}

fn range(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("range", args, (1..=3).contains(&args.len()))?;
    let ints = args
        .iter()
        .map(|a| int_arg("range", a))
        .collect::<Result<Vec<_>, _>>()?;
    let (start, end, step) = match ints.as_slice() {
        [end] => (0, *end, 1),
        [start, end] => (*start, *end, 1),
        [start, end, step] => (*start, *end, *step),
        _ => unreachable!("arity checked above"),
    };
    if step == 0 {
        return Err(EvalError::Limit("range step must not be zero".into()));
    }
    let span = if step > 0 {
        end.saturating_sub(start)
    } else {
        start.saturating_sub(end)
    };
    let len = if span <= 0 {
        0
    } else {
        (span - 1) / step.abs() + 1
    };
    if len > MAX_RANGE_LEN {
        return Err(EvalError::Limit(format!(
            "range of {len} elements exceeds {MAX_RANGE_LEN}"
        )));
    }
    let items = (0..len).map(|i| Value::Int(start + i * step)).collect();
    Ok(Value::List(items))
}

fn reduce(interp: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("reduce", args, args.len() == 2 || args.len() == 3)?;
    let f = &args[0];
    let (init, items) = if args.len() == 3 {
        (Some(args[1].clone()), seq_arg("reduce", &args[2])?)
    } else {
        (None, seq_arg("reduce", &args[1])?)
    };
    let (mut acc, items) = match (init, items.split_first()) {
        (Some(init), _) => (init, items),
        (None, Some((first, rest))) => (first.clone(), rest),
        // (reduce f []) calls f with no arguments, as Clojure does.
        (None, None) => return interp.apply(f, &[]),
    };
    for item in items {
        acc = interp.apply(f, &[acc, item.clone()])?;
    }
    Ok(acc)
}

fn map(interp: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("map", args, args.len() == 2)?;
    let items = seq_arg("map", &args[1])?;
    let mapped = items
        .iter()
        .map(|item| interp.apply(&args[0], std::slice::from_ref(item)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::List(mapped))
}

fn filter(interp: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("filter", args, args.len() == 2)?;
    let mut kept = Vec::new();
    for item in seq_arg("filter", &args[1])? {
        if interp.apply(&args[0], std::slice::from_ref(item))?.is_truthy() {
            kept.push(item.clone());
        }
    }
    Ok(Value::List(kept))
}

fn apply(interp: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("apply", args, args.len() >= 2)?;
    let Some((last, middle)) = args[1..].split_last() else {
        return Err(EvalError::Arity {
            name: "apply".into(),
            got: args.len(),
        });
    };
    let mut call_args = middle.to_vec();
    call_args.extend_from_slice(seq_arg("apply", last)?);
    interp.apply(&args[0], &call_args)
}

fn identity(_: &mut Interpreter, args: &[Value]) -> Result<Value, EvalError> {
    arity("identity", args, args.len() == 1)?;
    Ok(args[0].clone())
}
