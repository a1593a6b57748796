//! Excellon drill interpreter.
//!
//! Consumes tagged lines from the [`reader`](super::reader), decodes
//! coordinates through the detected [`Dialect`](super::dialect::Dialect),
//! and emits [`Drill`] and [`Slot`] primitives plus the tool table.

use crate::error::CamError;
use crate::excellon::dialect::{self, Confidence, Dialect};
use crate::excellon::reader::{read_lines, Section, SourceLine};
use crate::gerber::format::{parse_decimal, parse_fixed, Notation};
use crate::model::{
    Aperture, CamFile, Drill, FileFormat, NoteKind, Point, Primitive, Slot, Tool, Unit,
};

/// Machine mode driven by G codes in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Coordinate lines emit drill hits.
    Drill,
    /// Coordinate lines move; `G01` moves emit slots.
    Rout,
}

#[derive(Debug)]
struct ParserState {
    dialect: Dialect,
    units: Unit,
    notation: Notation,
    mode: Mode,
    position: Point,
    current_tool: Option<u32>,
    plated_default: Option<bool>,
    format_version: u8,
    output: CamFile,
    ended: bool,
    trailing_lines: usize,
    trailing_line: usize,
}

/// Parses an Excellon byte stream, detecting the dialect from the content.
///
/// # Errors
///
/// Returns [`CamError::Lex`] / [`CamError::Parse`] for unreadable input and
/// [`CamError::UnknownDialect`] when the coordinate format cannot be
/// established. Recoverable problems accumulate as notes.
pub fn parse(data: &[u8]) -> Result<CamFile, CamError> {
    parse_with_dialect(data, None)
}

/// Parses an Excellon byte stream with an optional caller-supplied dialect,
/// bypassing detection (useful when the format is known out of band).
///
/// # Errors
///
/// Same conditions as [`parse`], minus detection when `hint` is given.
pub fn parse_with_dialect(data: &[u8], hint: Option<Dialect>) -> Result<CamFile, CamError> {
    let lines = read_lines(data)?;
    let detected = match hint {
        Some(dialect) => dialect,
        None => dialect::detect(&lines)?,
    };

    let mut state = ParserState::new(detected);
    if detected.confidence == Confidence::Inferred {
        state.output.stats.note(
            0,
            NoteKind::InferredDialect,
            format!(
                "coordinate format {}:{} inferred from body coordinates",
                detected.format.integer_digits, detected.format.decimal_digits
            ),
        );
    }

    for line in &lines {
        if state.ended {
            state.trailing_lines += 1;
            state.trailing_line = line.number;
            continue;
        }
        state.process(line);
    }
    Ok(state.finish())
}

impl ParserState {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            units: dialect.units,
            notation: dialect.format.notation,
            mode: Mode::Drill,
            position: Point::new(0.0, 0.0),
            current_tool: None,
            plated_default: None,
            format_version: 2,
            output: CamFile::new(FileFormat::Excellon),
            ended: false,
            trailing_lines: 0,
            trailing_line: 0,
        }
    }

    fn note(&mut self, line: usize, kind: NoteKind, detail: impl Into<String>) {
        self.output.stats.note(line, kind, detail);
    }

    fn process(&mut self, line: &SourceLine) {
        self.output.stats.command_count += 1;
        let text = line.text.as_str();
        let number = line.number;

        if let Some(comment) = text.strip_prefix(';') {
            self.apply_comment(comment);
            return;
        }

        let upper = text.to_ascii_uppercase();
        if line.section == Section::Header {
            self.apply_header_line(&upper, number);
        } else {
            self.apply_body_line(&upper, number);
        }
    }

    fn apply_comment(&mut self, comment: &str) {
        let trimmed = comment.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper == "TYPE=PLATED" {
            self.plated_default = Some(true);
        } else if upper == "TYPE=NON_PLATED" {
            self.plated_default = Some(false);
        }
        self.output.comments.push(trimmed.to_string());
    }

    fn apply_units_line(&mut self, upper: &str, number: usize) {
        let units = if upper.starts_with("METRIC") {
            Unit::Millimeters
        } else {
            Unit::Inches
        };
        if self.units != units {
            self.note(
                number,
                NoteKind::Deprecated,
                "mixed unit declarations; last declaration wins",
            );
        }
        self.units = units;
        // Zero handling was already folded into the dialect during
        // detection; nothing further to do here.
    }

    fn apply_header_line(&mut self, upper: &str, number: usize) {
        if upper.starts_with("INCH") || upper.starts_with("METRIC") {
            self.apply_units_line(upper, number);
            return;
        }
        if let Some(version) = upper.strip_prefix("FMAT,") {
            self.format_version = if version.trim() == "1" { 1 } else { 2 };
            return;
        }
        if upper.starts_with("ICI") {
            self.notation = if upper.contains("ON") {
                Notation::Incremental
            } else {
                Notation::Absolute
            };
            return;
        }
        if upper.starts_with("VER") || upper.starts_with("DETECT") || upper.starts_with("ATC") {
            return;
        }
        if upper.starts_with('T') {
            self.apply_tool_line(upper, number);
            return;
        }
        self.note(
            number,
            NoteKind::UnknownCommand,
            format!("unrecognized header command `{upper}`"),
        );
    }

    fn apply_body_line(&mut self, upper: &str, number: usize) {
        match upper {
            "M30" | "M00" => {
                self.ended = true;
                return;
            }
            // Tool down / retract markers around routed paths.
            "M15" | "M16" | "M17" => return,
            "M71" => {
                self.apply_units_line("METRIC", number);
                return;
            }
            "M72" => {
                self.apply_units_line("INCH", number);
                return;
            }
            "G90" => {
                self.notation = Notation::Absolute;
                return;
            }
            "G05" => {
                self.mode = Mode::Drill;
                return;
            }
            _ => {}
        }

        if upper.starts_with("INCH") || upper.starts_with("METRIC") {
            self.apply_units_line(upper, number);
            return;
        }
        if upper.starts_with("ICI") {
            self.notation = if upper.contains("ON") {
                Notation::Incremental
            } else {
                Notation::Absolute
            };
            return;
        }
        if let Some(rest) = upper.strip_prefix("G00") {
            self.mode = Mode::Rout;
            if let Some(target) = self.decode_move(rest, number) {
                self.position = target;
            }
            return;
        }
        if let Some(rest) = upper.strip_prefix("G01") {
            let start = self.position;
            if let Some(target) = self.decode_move(rest, number) {
                self.position = target;
                if self.mode == Mode::Rout {
                    self.emit_slot(start, target, number);
                } else {
                    self.note(
                        number,
                        NoteKind::Deprecated,
                        "linear move outside rout mode; treated as a move",
                    );
                }
            }
            return;
        }
        if upper.starts_with("G02") || upper.starts_with("G03") {
            self.note(
                number,
                NoteKind::UnknownCommand,
                "circular routing is not supported; path dropped",
            );
            return;
        }
        if upper.starts_with('T') {
            self.apply_tool_line(upper, number);
            return;
        }
        if let Some(rest) = upper.strip_prefix('R') {
            self.apply_repeat(rest, number);
            return;
        }
        if upper.starts_with('X') || upper.starts_with('Y') {
            self.apply_coordinate_line(upper, number);
            return;
        }
        if upper.starts_with('F') || upper.starts_with('S') {
            // Standalone infeed/speed line; no geometric effect.
            return;
        }

        self.note(
            number,
            NoteKind::UnknownCommand,
            format!("unrecognized command `{upper}`"),
        );
    }

    /// Handles both tool definitions (`T1C0.8F100S5`) and selections (`T1`).
    fn apply_tool_line(&mut self, upper: &str, number: usize) {
        let rest = upper.strip_prefix('T').unwrap_or_default();
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (digits, fields) = rest.split_at(digits_end);
        let Ok(tool_number) = digits.parse::<u32>() else {
            self.note(
                number,
                NoteKind::UnknownCommand,
                format!("malformed tool command `T{rest}`"),
            );
            return;
        };

        if fields.contains('C') {
            self.define_tool(tool_number, fields, number);
            return;
        }

        // Selection. In FMAT,2 (the default) T0 is tool-unselect; FMAT,1
        // files treat it as an ordinary selection.
        if tool_number == 0 && self.format_version == 2 {
            self.current_tool = None;
            return;
        }
        if self.output.tools.contains_key(&tool_number) {
            self.current_tool = Some(tool_number);
        } else {
            self.current_tool = None;
            self.note(
                number,
                NoteKind::UndefinedTool,
                format!("tool T{tool_number} selected but not defined"),
            );
        }
    }

    fn define_tool(&mut self, tool_number: u32, fields: &str, number: usize) {
        let mut diameter = None;
        let mut feed_rate = None;
        let mut spindle_speed = None;

        let mut rest = fields;
        while let Some(letter) = rest.chars().next() {
            let tail = rest.get(1..).unwrap_or_default();
            let end = tail
                .find(|c: char| c.is_ascii_alphabetic())
                .unwrap_or(tail.len());
            let (value_raw, next) = tail.split_at(end);
            let value = parse_decimal(value_raw).ok();
            match letter {
                'C' => diameter = value,
                'F' => feed_rate = value,
                'S' => spindle_speed = value,
                _ => {}
            }
            rest = next;
        }

        let Some(diameter) = diameter else {
            self.note(
                number,
                NoteKind::UnknownCommand,
                format!("tool T{tool_number} definition has no usable diameter"),
            );
            return;
        };
        if diameter <= 0.0 {
            self.note(
                number,
                NoteKind::UnknownCommand,
                format!("tool T{tool_number} has zero or negative diameter and was skipped"),
            );
            return;
        }

        let tool = Tool {
            number: tool_number,
            diameter,
            plated: self.plated_default,
            feed_rate,
            spindle_speed,
            hit_count: 0,
        };
        if self.output.tools.insert(tool_number, tool).is_some() {
            self.note(
                number,
                NoteKind::Redefinition,
                format!("duplicate tool definition for T{tool_number}; last definition wins"),
            );
        }
    }

    /// Decodes X/Y words from a line fragment, retaining the previous value
    /// for missing axes. Returns `None` when a word fails to decode.
    fn decode_move(&mut self, fragment: &str, number: usize) -> Option<Point> {
        let mut x = None;
        let mut y = None;
        let mut rest = fragment;
        while let Some(letter) = rest.chars().next() {
            let tail = rest.get(1..).unwrap_or_default();
            let end = tail
                .find(|c: char| !c.is_ascii_digit() && c != '+' && c != '-' && c != '.')
                .unwrap_or(tail.len());
            let (value_raw, next) = tail.split_at(end);
            match letter {
                'X' => x = Some(value_raw.to_string()),
                'Y' => y = Some(value_raw.to_string()),
                _ => {
                    self.note(
                        number,
                        NoteKind::UnknownCommand,
                        format!("unexpected word `{letter}` in coordinate line"),
                    );
                    return None;
                }
            }
            rest = next;
        }

        let decode = |raw: &Option<String>, previous: f64| -> Result<f64, CamError> {
            let Some(raw) = raw else {
                return Ok(previous);
            };
            let value = parse_fixed(raw, &self.dialect.format)?;
            Ok(match self.notation {
                Notation::Absolute => value,
                Notation::Incremental => previous + value,
            })
        };

        let decoded = decode(&x, self.position.x).and_then(|x_value| {
            decode(&y, self.position.y).map(|y_value| Point::new(x_value, y_value))
        });
        match decoded {
            Ok(point) => Some(point),
            Err(error) => {
                self.note(number, NoteKind::NumberOverflow, error.to_string());
                None
            }
        }
    }

    fn apply_coordinate_line(&mut self, upper: &str, number: usize) {
        // One-line slot form: X..Y..G85X..Y..
        if let Some((lhs, rhs)) = upper.split_once("G85") {
            let Some(start) = self.decode_move(lhs, number) else {
                return;
            };
            let Some(end) = self.decode_move(rhs, number) else {
                return;
            };
            self.position = end;
            self.emit_slot(start, end, number);
            return;
        }

        let Some(target) = self.decode_move(upper, number) else {
            return;
        };
        self.position = target;
        if self.mode == Mode::Drill {
            self.emit_drill(target, number);
        }
    }

    fn apply_repeat(&mut self, rest: &str, number: usize) {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (digits, fragment) = rest.split_at(digits_end);
        let Ok(count) = digits.parse::<u32>() else {
            self.note(
                number,
                NoteKind::UnknownCommand,
                format!("malformed repeat command `R{rest}`"),
            );
            return;
        };

        // The fragment holds deltas regardless of notation.
        let mut dx = 0.0;
        let mut dy = 0.0;
        let mut cursor = fragment;
        while let Some(letter) = cursor.chars().next() {
            let tail = cursor.get(1..).unwrap_or_default();
            let end = tail
                .find(|c: char| !c.is_ascii_digit() && c != '+' && c != '-' && c != '.')
                .unwrap_or(tail.len());
            let (value_raw, next) = tail.split_at(end);
            let value = parse_fixed(value_raw, &self.dialect.format);
            match (letter, value) {
                ('X', Ok(value)) => dx = value,
                ('Y', Ok(value)) => dy = value,
                (_, Ok(_)) => {}
                (_, Err(error)) => {
                    self.note(number, NoteKind::NumberOverflow, error.to_string());
                    return;
                }
            }
            cursor = next;
        }

        for _ in 0..count {
            self.position = Point::new(self.position.x + dx, self.position.y + dy);
            let target = self.position;
            self.emit_drill(target, number);
        }
    }

    fn emit_drill(&mut self, target: Point, number: usize) {
        let Some(tool_number) = self.resolved_tool(target, number) else {
            return;
        };
        self.push_primitive(Primitive::Drill(Drill {
            position: target,
            tool: tool_number,
        }));
    }

    fn emit_slot(&mut self, start: Point, end: Point, number: usize) {
        let Some(tool_number) = self.resolved_tool(end, number) else {
            return;
        };
        self.push_primitive(Primitive::Slot(Slot {
            start,
            end,
            tool: tool_number,
        }));
    }

    fn resolved_tool(&mut self, at: Point, number: usize) -> Option<u32> {
        let Some(tool_number) = self.current_tool else {
            self.note(
                number,
                NoteKind::UndefinedTool,
                format!("hit at ({}, {}) skipped: no tool selected", at.x, at.y),
            );
            return None;
        };
        if !self.output.tools.contains_key(&tool_number) {
            self.note(
                number,
                NoteKind::UndefinedTool,
                format!("hit at ({}, {}) skipped: tool T{tool_number} is undefined", at.x, at.y),
            );
            return None;
        }
        Some(tool_number)
    }

    fn push_primitive(&mut self, primitive: Primitive) {
        if let Some(bounds) = primitive.bounding_box(&self.output.apertures, &self.output.tools) {
            self.output.stats.bounds.merge(&bounds);
        }
        let tool_number = match &primitive {
            Primitive::Drill(drill) => Some(drill.tool),
            Primitive::Slot(slot) => Some(slot.tool),
            _ => None,
        };
        if let Some(tool) = tool_number.and_then(|n| self.output.tools.get_mut(&n)) {
            tool.hit_count += 1;
        }
        self.output.primitives.push(primitive);
    }

    fn finish(mut self) -> CamFile {
        if !self.ended {
            self.note(
                0,
                NoteKind::Deprecated,
                "stream ended without an M30 end-of-program",
            );
        }
        if self.trailing_lines > 0 {
            let count = self.trailing_lines;
            let line = self.trailing_line;
            self.note(
                line,
                NoteKind::TrailingData,
                format!("{count} line(s) after end of program"),
            );
        }

        // Tools double as apertures in the unified dictionary so downstream
        // consumers can resolve every primitive through one lookup.
        for (number, tool) in &self.output.tools {
            if let Ok(dcode) = i32::try_from(*number) {
                self.output.apertures.insert(
                    dcode,
                    Aperture::ToolHole {
                        diameter: tool.diameter,
                    },
                );
            }
        }

        self.output.stats.units = Some(self.units);
        self.output
    }
}
