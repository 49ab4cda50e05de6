use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::span::SourceLocation;

/// Result type alias for operations that can produce an evaluation error.
///
/// Errors are boxed: the happy path stays a single pointer wide and the
/// frame stack inside `EvalError` never bloats `Ok` values.
pub type EvalResult<T> = Result<T, Box<EvalError>>;

/// The closed set of error categories surfaced by the evaluator.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and
/// `Into<&'static str>` implementations; the string form matches the
/// variant name exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed source rejected by the external parser.
    Parse,
    /// Unknown scheme, not-found, policy denial, checksum mismatch,
    /// relative URI at top level, missing dependency.
    Resolve,
    /// Value of the wrong type at a use site (property type annotation,
    /// cast, argument).
    Type,
    /// Undefined identifier or missing property.
    Name,
    /// Overflow, division by zero, NaN where a finite number is required,
    /// out-of-range unit conversion.
    Arithmetic,
    /// Re-entry on an in-flight member.
    Cycle,
    /// The shared evaluation deadline was exceeded.
    Timeout,
    /// `throw(expr)`.
    User,
    /// A reader failure, surfaced with the underlying message.
    Io,
    /// External-reader message stream or binary-encoding violation.
    Protocol,
}

/// One frame of evaluation context attached to an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// URI of the module the frame points into.
    pub uri: String,
    /// 1-based position of the failing expression.
    pub location: SourceLocation,
    /// The source text of the failing expression (may be empty for
    /// synthetic frames).
    pub snippet: String,
}

/// An evaluation error: a category, a message, and the stack of frames
/// accumulated while unwinding.
///
/// Frames are pushed outermost-last, so `frames[0]` is the innermost
/// (failing) expression. Re-raising an error preserves the chain; only
/// frame-boundary sites append to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalError {
    kind: ErrorKind,
    message: String,
    frames: Vec<StackFrame>,
}

/// Number of times a frame segment must repeat before the renderer
/// collapses it.
const REPETITION_THRESHOLD: usize = 4;

impl EvalError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            kind,
            message: message.into(),
            frames: Vec::new(),
        })
    }

    #[must_use]
    pub fn parse(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::Parse, message)
    }

    #[must_use]
    pub fn resolve(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::Resolve, message)
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::Type, message)
    }

    #[must_use]
    pub fn name_error(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::Name, message)
    }

    #[must_use]
    pub fn arithmetic(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::Arithmetic, message)
    }

    /// The cycle error produced by re-entering an in-flight member.
    #[must_use]
    pub fn stack_overflow() -> Box<Self> {
        Self::new(ErrorKind::Cycle, "A stack overflow occurred.")
    }

    /// The deadline-exceeded error.
    #[must_use]
    pub fn timed_out() -> Box<Self> {
        Self::new(ErrorKind::Timeout, "Evaluation timed out.")
    }

    #[must_use]
    pub fn user(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::User, message)
    }

    #[must_use]
    pub fn io(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::Io, message)
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::Protocol, message)
    }

    /// The error returned by every entry point of a closed evaluator.
    #[must_use]
    pub fn closed() -> Box<Self> {
        Self::new(ErrorKind::Io, "Cannot evaluate because this evaluator has been closed.")
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub(crate) fn push_frame(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    /// Renders the user-visible form: banner, message, and the frame
    /// stack with long repetitions collapsed.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("\u{2013}\u{2013} Pkl Error \u{2013}\u{2013}\n");
        out.push_str(&self.message);
        out.push('\n');
        let blocks = collapse_repetitions(&self.frames);
        for block in blocks {
            out.push('\n');
            match block {
                FrameBlock::Single(frame) => render_frame(&mut out, frame, ""),
                FrameBlock::Repeated { count, segment } => {
                    out.push_str(&format!("\u{250c}\u{2500} {count} repetitions of:\n"));
                    for frame in segment {
                        render_frame(&mut out, frame, "\u{2502} ");
                    }
                    out.push_str("\u{2514}\u{2500}\n");
                }
            }
        }
        out
    }
}

fn render_frame(out: &mut String, frame: &StackFrame, prefix: &str) {
    if !frame.snippet.is_empty() {
        out.push_str(&format!("{prefix}{} | {}\n", frame.location.line, frame.snippet));
    }
    out.push_str(&format!("{prefix}at {} ({})\n", frame.uri, frame.location));
}

enum FrameBlock<'a> {
    Single(&'a StackFrame),
    Repeated { count: usize, segment: &'a [StackFrame] },
}

/// Splits the frame stack into literal frames and collapsed repetition
/// blocks. A segment of period `p` repeated at least
/// `REPETITION_THRESHOLD` times becomes one block.
fn collapse_repetitions(frames: &[StackFrame]) -> Vec<FrameBlock<'_>> {
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < frames.len() {
        let mut collapsed = false;
        for period in 1..=(frames.len() - i) / REPETITION_THRESHOLD {
            let segment = &frames[i..i + period];
            let mut count = 1;
            while frames[i + count * period..].len() >= period
                && &frames[i + count * period..i + (count + 1) * period] == segment
            {
                count += 1;
            }
            if count >= REPETITION_THRESHOLD {
                blocks.push(FrameBlock::Repeated { count, segment });
                i += count * period;
                collapsed = true;
                break;
            }
        }
        if !collapsed {
            blocks.push(FrameBlock::Single(&frames[i]));
            i += 1;
        }
    }
    blocks
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EvalError {}
