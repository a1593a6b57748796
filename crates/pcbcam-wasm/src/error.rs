//! Error types for the parsing and interpretation pipeline.

use thiserror::Error;

/// Fatal errors that abort a parse.
///
/// Recoverable problems (undefined apertures, ambiguous arcs, unknown
/// commands, ...) do not use this type; they accumulate as
/// [`Note`](crate::model::Note)s on the output instead.
#[derive(Debug, Error)]
pub enum CamError {
    /// A disallowed byte or an unterminated block in the input stream.
    #[error("lex error at line {line}: {reason}")]
    Lex {
        /// 1-based source line of the offending byte or block.
        line: usize,
        /// Human-readable description of the problem.
        reason: String,
    },

    /// A missing or duplicated format directive (`FS`, `MO`).
    #[error("format error: {0}")]
    Format(String),

    /// A digit string inconsistent with the active coordinate format.
    #[error("number overflow: {0}")]
    NumberOverflow(String),

    /// An aperture macro definition could not be parsed or evaluated.
    #[error("macro error: {0}")]
    Macro(String),

    /// The input matched neither the Gerber nor the Excellon heuristics.
    #[error("unknown file format")]
    UnknownFormat,

    /// The Excellon body was too short to infer a coordinate format.
    #[error("could not infer drill coordinate format")]
    UnknownDialect,

    /// Malformed input outside any more specific category.
    #[error("parse error: {0}")]
    Parse(String),
}
