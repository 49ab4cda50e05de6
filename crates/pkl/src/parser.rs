use std::fmt;

use crate::{
    cst::Tree,
    error::{EvalError, EvalResult},
    span::Span,
    uri::ModuleUri,
};

/// A parse failure: one or more spans with messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub diagnostics: Vec<(Span, String)>,
}

impl ParseError {
    #[must_use]
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![(span, message.into())],
        }
    }

    pub(crate) fn into_eval_error(self, uri: &ModuleUri) -> Box<EvalError> {
        let detail = self
            .diagnostics
            .iter()
            .map(|(span, message)| format!("{message} (at {span})"))
            .collect::<Vec<_>>()
            .join("; ");
        EvalError::parse(format!("Cannot parse module `{uri}`: {detail}"))
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (span, message)) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{message} (at {span})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// The external parser collaborator.
///
/// The evaluator treats parsing as a pure function from source text to
/// the CST shape of [`crate::cst`]; any front-end producing that shape
/// works. Implementations must give every node a span (the tree builder
/// enforces this structurally).
pub trait ModuleParser: fmt::Debug {
    fn parse(&self, source: &str, uri: &ModuleUri) -> Result<Tree, ParseError>;
}

/// A parser stub for configurations that only evaluate natively built
/// or pre-parsed modules; any attempt to parse text fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoParser;

impl ModuleParser for NoParser {
    fn parse(&self, _source: &str, uri: &ModuleUri) -> Result<Tree, ParseError> {
        Err(ParseError::new(
            Span::new(0, 0),
            format!("no parser is configured; cannot parse `{uri}`"),
        ))
    }
}

pub(crate) fn parse_with(
    parser: &dyn ModuleParser,
    source: &str,
    uri: &ModuleUri,
) -> EvalResult<Tree> {
    parser
        .parse(source, uri)
        .map_err(|e| e.into_eval_error(uri))
}
