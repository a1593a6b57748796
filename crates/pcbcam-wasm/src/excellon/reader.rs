//! Excellon line reader.
//!
//! Excellon files are line-oriented with a header section delimited by `M48`
//! and `%` (or `M95`). The reader validates bytes, strips blank lines, and
//! tags every remaining line with its section; it does not interpret
//! commands.

use crate::error::CamError;

/// File section a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Between `M48` and the header terminator.
    Header,
    /// Everything else.
    Body,
}

/// One trimmed, non-empty source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// Section the line belongs to.
    pub section: Section,
    /// Line text, surrounding whitespace removed.
    pub text: String,
    /// 1-based line number.
    pub number: usize,
}

/// Reads an Excellon byte stream into tagged lines.
///
/// # Errors
///
/// Returns [`CamError::Parse`] for empty or non-UTF-8 input and
/// [`CamError::Lex`] for bytes outside printable ASCII plus whitespace.
pub fn read_lines(data: &[u8]) -> Result<Vec<SourceLine>, CamError> {
    if data.is_empty() {
        return Err(CamError::Parse("empty input".to_string()));
    }
    let content = std::str::from_utf8(data)
        .map_err(|err| CamError::Parse(format!("invalid UTF-8 input: {err}")))?;

    let mut lines = Vec::new();
    let mut in_header = false;

    for (index, raw_line) in content.lines().enumerate() {
        let number = index + 1;
        if let Some(bad) = raw_line
            .bytes()
            .find(|b| !(32..=126).contains(b) && *b != b'\t')
        {
            return Err(CamError::Lex {
                line: number,
                reason: format!("disallowed byte 0x{bad:02x}"),
            });
        }

        let text = raw_line.trim();
        if text.is_empty() {
            continue;
        }

        let upper = text.to_ascii_uppercase();
        if upper == "M48" {
            in_header = true;
            continue;
        }
        if in_header && (upper == "%" || upper == "M95") {
            in_header = false;
            continue;
        }
        if upper == "%" {
            // Stray rewind-stop outside a header.
            continue;
        }

        lines.push(SourceLine {
            section: if in_header {
                Section::Header
            } else {
                Section::Body
            },
            text: text.to_string(),
            number,
        });
    }

    Ok(lines)
}
