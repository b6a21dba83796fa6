// tickrepl_lisp — small Clojure-flavoured Lisp runtime.
//
// This is the evaluator the `tickrepl` server ships with. It is deliberately
// small: enough of Clojure's surface for interactive use over nREPL (numbers,
// strings, keywords, lists/vectors, `def`/`defn`/`fn`/`let`/`if`/`when`/`do`,
// namespaces, printing) without macros, laziness or a persistent-collection
// library.
//
// Module overview:
// - `reader.rs`:   Source text to `Value` forms.
// - `value.rs`:    `Value`, lexical `Env`, the two printers (`pr_str`,
//                  `display_str`) and structural equality.
// - `eval.rs`:     `Interpreter`: namespaces, special forms, application,
//                  recursion and nesting limits.
// - `builtins.rs`: Native functions installed into `clojure.core`.
// - `runtime.rs`:  `Runtime`: per-session current namespace, side output
//                  capture, `eval_str` / `eval_file`.
// - `error.rs`:    `ReadError`, `EvalError`.
//
// Values hold `Rc`s, so none of this is `Send`. The server keeps its
// `Runtime` on the host thread and only ever calls it from the tick.

pub mod builtins;
pub mod error;
pub mod eval;
pub mod reader;
pub mod runtime;
pub mod value;

pub use error::{EvalError, ReadError};
pub use eval::Interpreter;
pub use reader::read_all;
pub use runtime::{DEFAULT_NAMESPACE, Outcome, Runtime};
pub use value::Value;
