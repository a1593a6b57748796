//! Gerber lexical reader.
//!
//! Segments the raw byte stream into `*`-terminated data blocks and tracks
//! `%...%` parameter delimiters. The reader does not interpret commands; it
//! only tags each block with its parameter context and source line.

use crate::error::CamError;

/// One `*`-terminated logical unit of a Gerber stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    /// Block text without the terminating `*`. Interior spaces are kept
    /// (significant inside G04 comments and string modifiers); line breaks
    /// are not.
    pub text: String,
    /// `Some(group)` when the block sits inside a `%...%` parameter
    /// statement; blocks of the same statement share a group id.
    pub parameter_group: Option<usize>,
    /// 1-based line on which the block starts.
    pub line: usize,
}

impl DataBlock {
    /// True when this block is part of a parameter statement.
    pub const fn in_parameter(&self) -> bool {
        self.parameter_group.is_some()
    }
}

/// Streaming block reader over a Gerber byte slice.
///
/// Yields [`DataBlock`]s in source order; lexical problems surface as
/// [`CamError::Lex`] items and end the stream.
#[derive(Debug)]
pub struct BlockReader<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
    parameter_group: Option<usize>,
    next_group: usize,
    failed: bool,
}

impl<'a> BlockReader<'a> {
    /// Creates a reader over the raw file contents.
    pub const fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            parameter_group: None,
            next_group: 0,
            failed: false,
        }
    }

    fn lex_error(&mut self, reason: String) -> CamError {
        self.failed = true;
        CamError::Lex {
            line: self.line,
            reason,
        }
    }
}

impl<'a> Iterator for BlockReader<'a> {
    type Item = Result<DataBlock, CamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let mut text = String::new();
        let mut block_line = 0usize;

        while let Some(&byte) = self.input.get(self.pos) {
            self.pos += 1;
            match byte {
                b'\n' => self.line += 1,
                b'\r' => {}
                b'*' => {
                    if text.is_empty() {
                        // Stray terminator; nothing to emit.
                        continue;
                    }
                    return Some(Ok(DataBlock {
                        text,
                        parameter_group: self.parameter_group,
                        line: block_line,
                    }));
                }
                b'%' => {
                    if !text.trim().is_empty() {
                        return Some(Err(self.lex_error(format!(
                            "unterminated data block `{text}` before `%`"
                        ))));
                    }
                    if self.parameter_group.is_some() {
                        self.parameter_group = None;
                    } else {
                        self.parameter_group = Some(self.next_group);
                        self.next_group += 1;
                    }
                    text.clear();
                }
                b' ' if text.is_empty() => {}
                32..=126 => {
                    if text.is_empty() {
                        block_line = self.line;
                    }
                    text.push(char::from(byte));
                }
                _ => {
                    return Some(Err(
                        self.lex_error(format!("disallowed byte 0x{byte:02x}"))
                    ));
                }
            }
        }

        if self.parameter_group.is_some() {
            return Some(Err(
                self.lex_error("unterminated parameter statement at end of input".to_string())
            ));
        }
        if !text.trim().is_empty() {
            return Some(Err(self.lex_error(format!(
                "unterminated data block `{text}` at end of input"
            ))));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_blocks(input: &[u8]) -> Vec<DataBlock> {
        let blocks: Result<Vec<_>, _> = BlockReader::new(input).collect();
        assert!(blocks.is_ok(), "expected a clean lex: {:?}", blocks.err());
        blocks.unwrap_or_default()
    }

    #[test]
    fn ut_rdr_001_splits_star_terminated_blocks() {
        let blocks = collect_blocks(b"X0Y0D02*X100Y0D01*M02*");
        let texts: Vec<_> = blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["X0Y0D02", "X100Y0D01", "M02"]);
        assert!(blocks.iter().all(|b| !b.in_parameter()));
    }

    #[test]
    fn ut_rdr_002_parameter_blocks_are_tagged_and_grouped() {
        let blocks = collect_blocks(b"%FSLAX24Y24*%%AMPAD*1,1,0.5,0,0*%D10*");
        assert_eq!(blocks.len(), 4);
        assert_eq!(
            blocks.first().and_then(|b| b.parameter_group),
            Some(0),
            "FS opens group 0"
        );
        assert_eq!(blocks.get(1).and_then(|b| b.parameter_group), Some(1));
        assert_eq!(
            blocks.get(2).and_then(|b| b.parameter_group),
            Some(1),
            "macro body shares the AM group"
        );
        assert_eq!(blocks.get(3).and_then(|b| b.parameter_group), None);
    }

    #[test]
    fn ut_rdr_003_newlines_split_lines_but_not_blocks() {
        let blocks = collect_blocks(b"X0Y0\nD01*\nM02*");
        let texts: Vec<_> = blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["X0Y0D01", "M02"]);
        assert_eq!(blocks.first().map(|b| b.line), Some(1));
        assert_eq!(blocks.get(1).map(|b| b.line), Some(3));
    }

    #[test]
    fn ut_rdr_004_comment_spaces_are_preserved() {
        let blocks = collect_blocks(b"G04 Layer: top  copper*M02*");
        assert_eq!(
            blocks.first().map(|b| b.text.as_str()),
            Some("G04 Layer: top  copper")
        );
    }

    #[test]
    fn bc_rdr_001_disallowed_byte_is_a_lex_error() {
        let result: Result<Vec<_>, _> = BlockReader::new(b"X0Y0D02*\x07M02*").collect();
        assert!(matches!(result, Err(CamError::Lex { .. })));
    }

    #[test]
    fn bc_rdr_002_unterminated_parameter_is_a_lex_error() {
        let result: Result<Vec<_>, _> = BlockReader::new(b"%FSLAX24Y24*").collect();
        assert!(matches!(result, Err(CamError::Lex { .. })));
    }

    #[test]
    fn bc_rdr_003_unterminated_trailing_block_is_a_lex_error() {
        let result: Result<Vec<_>, _> = BlockReader::new(b"M02*X100").collect();
        assert!(matches!(result, Err(CamError::Lex { .. })));
    }

    #[test]
    fn bc_rdr_004_stream_ends_after_lex_error() {
        let mut reader = BlockReader::new(b"\x01X0*");
        let first = reader.next();
        assert!(matches!(first, Some(Err(CamError::Lex { .. }))));
        assert!(reader.next().is_none(), "reader stays stopped after error");
    }
}
