//! Trace output plumbing.
//!
//! `trace(expr)` logs the expression's source text and value, then
//! re-raises nothing: the value passes through. Where those log lines
//! go is the host's choice.

use std::{cell::RefCell, fmt, rc::Rc};

/// Sink for `trace(expr)` output and evaluator diagnostics.
pub trait TraceWriter: fmt::Debug {
    fn trace(&mut self, message: &str);
}

/// Writes trace output to stderr (the default).
#[derive(Debug, Default)]
pub struct StderrTrace;

impl TraceWriter for StderrTrace {
    fn trace(&mut self, message: &str) {
        eprintln!("pkl: TRACE: {message}");
    }
}

/// Discards trace output.
#[derive(Debug, Default)]
pub struct NoTrace;

impl TraceWriter for NoTrace {
    fn trace(&mut self, _message: &str) {}
}

/// Collects trace output for inspection, via a shared handle that
/// outlives the evaluator owning the writer.
#[derive(Debug, Default)]
pub struct CollectTrace {
    messages: Rc<RefCell<Vec<String>>>,
}

impl CollectTrace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn handle(&self) -> TraceHandle {
        TraceHandle(Rc::clone(&self.messages))
    }
}

impl TraceWriter for CollectTrace {
    fn trace(&mut self, message: &str) {
        self.messages.borrow_mut().push(message.to_owned());
    }
}

/// Read side of a [`CollectTrace`].
#[derive(Debug, Clone)]
pub struct TraceHandle(Rc<RefCell<Vec<String>>>);

impl TraceHandle {
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}
