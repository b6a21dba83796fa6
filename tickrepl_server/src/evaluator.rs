// Evaluator contract.
//
// The server knows nothing about the language it serves. Everything it needs
// from a language runtime is behind `Evaluator`: evaluate code in a session,
// fork and drop session state, report a session's namespace. Implementations
// are only ever called from the host thread (inside the tick), so they need
// not be `Send` or `Sync`.
//
// `tickrepl_lisp::Runtime` is the bundled implementation.

use thiserror::Error;
use tickrepl_lisp::Runtime;
use tickrepl_protocol::SessionId;

/// A failed evaluation, as reported to the client.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{class}: {message}")]
pub struct EvaluationError {
    /// Short exception class name, sent as `ex`.
    pub class: String,
    /// Human-readable message, sent as `err`.
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    /// Printed value on success.
    pub result: Result<String, EvaluationError>,
    /// Side output produced while evaluating, if any.
    pub output: Option<String>,
}

pub trait Evaluator {
    fn evaluate(&mut self, session: &SessionId, code: &str) -> Evaluation;

    /// Give `child` a copy of `parent`'s state (or fresh state).
    fn clone_session(&mut self, parent: Option<&SessionId>, child: &SessionId);

    fn close_session(&mut self, session: &SessionId);

    /// The session's current namespace, sent as `ns` with each value.
    fn namespace(&self, session: &SessionId) -> String;
}

impl Evaluator for Runtime {
    fn evaluate(&mut self, session: &SessionId, code: &str) -> Evaluation {
        let outcome = self.eval_in_session(&session.to_string(), code);
        Evaluation {
            result: outcome
                .result
                .map(|value| value.pr_str())
                .map_err(|e| EvaluationError {
                    class: e.class().to_string(),
                    message: e.to_string(),
                }),
            output: Some(outcome.output).filter(|out| !out.is_empty()),
        }
    }

    fn clone_session(&mut self, parent: Option<&SessionId>, child: &SessionId) {
        let parent = parent.map(SessionId::to_string);
        Runtime::clone_session(self, parent.as_deref(), &child.to_string());
    }

    fn close_session(&mut self, session: &SessionId) {
        Runtime::close_session(self, &session.to_string());
    }

    fn namespace(&self, session: &SessionId) -> String {
        self.session_namespace(&session.to_string()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_reports_value_and_output() {
        let mut runtime = Runtime::new();
        let session = SessionId::new();
        let evaluation =
            Evaluator::evaluate(&mut runtime, &session, r#"(println "hello") (+ 1 2)"#);
        assert_eq!(evaluation.result, Ok("3".to_string()));
        assert_eq!(evaluation.output.as_deref(), Some("hello\n"));
        assert_eq!(Evaluator::namespace(&runtime, &session), "user");
    }

    #[test]
    fn runtime_errors_carry_a_class() {
        let mut runtime = Runtime::new();
        let evaluation = Evaluator::evaluate(&mut runtime, &SessionId::new(), "(/ 1 0)");
        let err = evaluation.result.unwrap_err();
        assert_eq!(err.class, "ArithmeticException");
        assert_eq!(err.message, "divide by zero");
        assert_eq!(evaluation.output, None);
    }

    #[test]
    fn cloned_session_starts_in_parent_namespace() {
        let mut runtime = Runtime::new();
        let parent = SessionId::new();
        let child = SessionId::new();
        Evaluator::evaluate(&mut runtime, &parent, "(ns workbench)");
        Evaluator::clone_session(&mut runtime, Some(&parent), &child);
        assert_eq!(Evaluator::namespace(&runtime, &child), "workbench");
    }
}
