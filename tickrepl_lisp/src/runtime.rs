// Session-aware front end over the interpreter.
//
// One `Runtime` holds one `Interpreter`; sessions share its global namespaces
// and differ only in which namespace they are currently in. Every evaluation
// switches the interpreter into the session's namespace, runs, and records
// where the code left it (so `(ns foo)` in one session doesn't move another).

use std::collections::HashMap;
use std::path::Path;

use crate::error::EvalError;
use crate::eval::Interpreter;
use crate::reader::read_all;
use crate::value::Value;

/// Namespace new sessions (and session-less evaluation) start in.
pub const DEFAULT_NAMESPACE: &str = "user";

/// Result of one evaluation request.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub result: Result<Value, EvalError>,
    /// Everything printed while evaluating, in order.
    pub output: String,
    /// Namespace after evaluation.
    pub ns: String,
}

pub struct Runtime {
    interp: Interpreter,
    /// Session id -> current namespace.
    sessions: HashMap<String, String>,
    /// Namespace of session-less evaluation (`eval_str`, `eval_file`).
    default_ns: String,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            interp: Interpreter::new(DEFAULT_NAMESPACE),
            sessions: HashMap::new(),
            default_ns: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Evaluate `code` outside any session.
    pub fn eval_str(&mut self, code: &str) -> Outcome {
        let ns = std::mem::take(&mut self.default_ns);
        let outcome = self.run(&ns, code);
        self.default_ns = outcome.ns.clone();
        outcome
    }

    /// Read and evaluate a whole source file outside any session.
    pub fn eval_file(&mut self, path: &Path) -> Outcome {
        match std::fs::read_to_string(path) {
            Ok(code) => self.eval_str(&code),
            Err(e) => Outcome {
                result: Err(EvalError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }),
                output: String::new(),
                ns: self.default_ns.clone(),
            },
        }
    }

    /// Evaluate `code` in `session`, creating the session if it is new.
    pub fn eval_in_session(&mut self, session: &str, code: &str) -> Outcome {
        let ns = self
            .sessions
            .get(session)
            .cloned()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let outcome = self.run(&ns, code);
        self.sessions.insert(session.to_string(), outcome.ns.clone());
        outcome
    }

    /// Start `child` in the namespace `parent` is in (or the default).
    pub fn clone_session(&mut self, parent: Option<&str>, child: &str) {
        let ns = parent
            .and_then(|p| self.sessions.get(p))
            .cloned()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        self.sessions.insert(child.to_string(), ns);
    }

    /// Forget a session. Returns whether it existed.
    pub fn close_session(&mut self, session: &str) -> bool {
        self.sessions.remove(session).is_some()
    }

    pub fn session_namespace(&self, session: &str) -> &str {
        self.sessions
            .get(session)
            .map_or(DEFAULT_NAMESPACE, String::as_str)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.interp.namespace_names()
    }

    fn run(&mut self, ns: &str, code: &str) -> Outcome {
        self.interp.enter_namespace(ns);
        self.interp.output.clear();
        let result = read_all(code)
            .map_err(EvalError::from)
            .and_then(|forms| self.interp.eval_forms(&forms));
        Outcome {
            result,
            output: std::mem::take(&mut self.interp.output),
            ns: self.interp.current_ns.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::ReadError;

    fn value(outcome: &Outcome) -> String {
        outcome.result.as_ref().unwrap().pr_str()
    }

    #[test]
    fn eval_str_returns_value() {
        let mut rt = Runtime::new();
        let outcome = rt.eval_str("(+ 1 2)");
        assert_eq!(value(&outcome), "3");
        assert_eq!(outcome.ns, "user");
        assert!(outcome.output.is_empty());
    }

    #[test]
    fn eval_file_captures_printed_output() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"(print (str :result " " (+ 4 3)))"#).unwrap();

        let mut rt = Runtime::new();
        let outcome = rt.eval_file(file.path());
        assert_eq!(outcome.output, ":result 7");
        assert_eq!(value(&outcome), "nil");
    }

    #[test]
    fn eval_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = Runtime::new();
        let outcome = rt.eval_file(&dir.path().join("absent.clj"));
        assert!(matches!(outcome.result, Err(EvalError::Io { .. })));
    }

    #[test]
    fn sessions_track_their_own_namespace() {
        let mut rt = Runtime::new();
        rt.eval_in_session("a", "(ns scratch) (def x 1)");
        assert_eq!(rt.session_namespace("a"), "scratch");

        let b = rt.eval_in_session("b", "(def y 2)");
        assert_eq!(b.ns, "user");
        // Globals are shared, reachable by qualified name.
        assert_eq!(value(&rt.eval_in_session("b", "(+ scratch/x y)")), "3");
        assert_eq!(value(&rt.eval_in_session("a", "x")), "1");
    }

    #[test]
    fn clone_inherits_parent_namespace() {
        let mut rt = Runtime::new();
        rt.eval_in_session("parent", "(ns lab)");
        rt.clone_session(Some("parent"), "child");
        rt.clone_session(None, "fresh");
        assert_eq!(rt.session_namespace("child"), "lab");
        assert_eq!(rt.session_namespace("fresh"), "user");
    }

    #[test]
    fn close_forgets_session() {
        let mut rt = Runtime::new();
        rt.clone_session(None, "s");
        assert!(rt.close_session("s"));
        assert!(!rt.close_session("s"));
        assert_eq!(rt.session_count(), 0);
    }

    #[test]
    fn read_errors_surface_as_eval_errors() {
        let mut rt = Runtime::new();
        let outcome = rt.eval_in_session("s", "(+ 1");
        assert!(matches!(outcome.result, Err(EvalError::Read(_))));
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let mut rt = Runtime::new();
        let read = rt.eval_str(&"(".repeat(200_000));
        assert!(matches!(read.result, Err(EvalError::Read(ReadError::TooDeep(_)))));
        assert_eq!(read.result.unwrap_err().class(), "ReaderException");

        let built = rt.eval_str("(reduce (fn [a x] (list a)) nil (range 300000))");
        assert!(matches!(built.result, Err(EvalError::Limit(_))));
        assert_eq!(value(&rt.eval_str("(+ 1 2)")), "3");
    }

    #[test]
    fn output_does_not_leak_between_evaluations() {
        let mut rt = Runtime::new();
        let first = rt.eval_in_session("s", r#"(println "one")"#);
        let second = rt.eval_in_session("s", "(+ 1 1)");
        assert_eq!(first.output, "one\n");
        assert!(second.output.is_empty());
    }
}
