//! RS-274X graphics-state interpreter.
//!
//! Consumes tagged blocks from the [`reader`](super::reader) and evolves an
//! explicit graphics state, emitting normalized primitives into a
//! [`CamFile`]. Modal state (format, units, interpolation, quadrant mode,
//! region mode, polarity, step-and-repeat) lives in [`GraphicsState`]; there
//! is no hidden global state.

use std::collections::HashMap;
use std::f64::consts::FRAC_PI_2;

use crate::error::CamError;
use crate::gerber::aperture::{self, ApertureDictionary};
use crate::gerber::format::{parse_decimal, parse_fixed, CoordinateFormat, Notation, ZeroSuppression};
use crate::gerber::macros::MacroDefinition;
use crate::gerber::reader::{BlockReader, DataBlock};
use crate::model::{
    sweep_between, Aperture, Arc, ArcDirection, Attribute, AttributeScope, CamFile,
    ContourSegment, FileFormat, Flash, ImagePolarity, Line, NoteKind, Point, Polarity, Primitive,
    QuadrantMode, Region,
};

/// Lowest D-code available for user apertures; smaller codes are operations.
pub const FIRST_USER_DCODE: i32 = 10;

const SWEEP_EPSILON: f64 = 1e-9;

/// Active interpolation mode (G01/G02/G03).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterpolationMode {
    Linear,
    ClockwiseArc,
    CounterClockwiseArc,
}

/// Mutable interpreter state threaded through every block handler.
#[derive(Debug)]
struct GraphicsState {
    current_point: Point,
    current_aperture: Option<i32>,
    interpolation: Option<InterpolationMode>,
    quadrant_mode: Option<QuadrantMode>,
    region_mode: bool,
    level: u32,
    level_polarity: Polarity,
    format: Option<CoordinateFormat>,
    units: Option<crate::model::Unit>,
    last_op: Option<u8>,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            current_point: Point::new(0.0, 0.0),
            current_aperture: None,
            interpolation: None,
            quadrant_mode: None,
            region_mode: false,
            level: 0,
            level_polarity: Polarity::Dark,
            format: None,
            units: None,
            last_op: None,
        }
    }
}

/// An open step-and-repeat window.
#[derive(Debug)]
struct StepRepeatFrame {
    nx: u32,
    ny: u32,
    dx: f64,
    dy: f64,
    buffer: Vec<Primitive>,
}

/// An open `AB` block-aperture frame.
#[derive(Debug)]
struct BlockFrame {
    dcode: i32,
    body: Vec<Primitive>,
}

/// Split of a command block into its coordinate words.
#[derive(Debug, Default)]
struct Words {
    g_codes: Vec<u16>,
    x: Option<String>,
    y: Option<String>,
    i: Option<String>,
    j: Option<String>,
    d_code: Option<i32>,
    m_code: Option<u16>,
}

#[derive(Debug)]
struct Interpreter {
    state: GraphicsState,
    apertures: ApertureDictionary,
    macros: HashMap<String, MacroDefinition>,
    output: CamFile,
    contour: Vec<ContourSegment>,
    step_repeat: Option<StepRepeatFrame>,
    block_stack: Vec<BlockFrame>,
    pending_object_attrs: Vec<Attribute>,
    collecting_macro: Option<(usize, MacroDefinition)>,
    ended: bool,
    trailing_blocks: usize,
    trailing_line: usize,
}

/// Parses a Gerber byte stream into a [`CamFile`].
///
/// # Errors
///
/// Returns [`CamError::Lex`] for malformed bytes, and [`CamError::Format`] /
/// [`CamError::Macro`] for violations that make the rest of the stream
/// undecodable (missing or duplicated `FS`/`MO`, malformed macro bodies).
/// Recoverable problems are reported through `stats.notes` instead.
pub fn parse(data: &[u8]) -> Result<CamFile, CamError> {
    if data.is_empty() {
        return Err(CamError::Parse("empty input".to_string()));
    }

    let mut interpreter = Interpreter::new();
    for item in BlockReader::new(data) {
        match item {
            Ok(block) => {
                if interpreter.ended {
                    interpreter.trailing_blocks += 1;
                    interpreter.trailing_line = block.line;
                } else {
                    interpreter.process(&block)?;
                }
            }
            Err(error) => {
                if interpreter.ended {
                    // The image is already complete; record and stop.
                    interpreter.output.stats.note(
                        interpreter.trailing_line,
                        NoteKind::TrailingData,
                        format!("unreadable data after end of program: {error}"),
                    );
                    break;
                }
                return Err(error);
            }
        }
    }
    interpreter.finish()
}

impl Interpreter {
    fn new() -> Self {
        Self {
            state: GraphicsState::default(),
            apertures: ApertureDictionary::new(),
            macros: HashMap::new(),
            output: CamFile::new(FileFormat::Gerber),
            contour: Vec::new(),
            step_repeat: None,
            block_stack: Vec::new(),
            pending_object_attrs: Vec::new(),
            collecting_macro: None,
            ended: false,
            trailing_blocks: 0,
            trailing_line: 0,
        }
    }

    fn note(&mut self, line: usize, kind: NoteKind, detail: impl Into<String>) {
        self.output.stats.note(line, kind, detail);
    }

    fn process(&mut self, block: &DataBlock) -> Result<(), CamError> {
        self.output.stats.command_count += 1;

        let macro_group = self.collecting_macro.as_ref().map(|(group, _)| *group);
        if let Some(group) = macro_group {
            if block.parameter_group == Some(group) {
                if let Some((_, definition)) = self.collecting_macro.as_mut() {
                    definition.push_line(&block.text)?;
                }
                return Ok(());
            }
            self.finish_macro();
        }

        if block.in_parameter() {
            self.process_parameter(block)
        } else {
            self.process_function(block)
        }
    }

    fn finish_macro(&mut self) {
        if let Some((_, definition)) = self.collecting_macro.take() {
            self.macros.insert(definition.name.clone(), definition);
        }
    }

    fn process_parameter(&mut self, block: &DataBlock) -> Result<(), CamError> {
        let text = block.text.as_str();
        let line = block.line;

        if let Some(rest) = text.strip_prefix("FS") {
            return self.apply_format(rest, line);
        }
        if let Some(rest) = text.strip_prefix("MO") {
            return self.apply_units(rest, line);
        }
        if let Some(rest) = text.strip_prefix("AM") {
            let group = block.parameter_group.unwrap_or(0);
            self.collecting_macro = Some((group, MacroDefinition::new(rest.trim().to_string())));
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("AD") {
            self.apply_aperture_definition(rest, line);
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("LP") {
            match rest.trim() {
                "D" => {
                    self.state.level += 1;
                    self.state.level_polarity = Polarity::Dark;
                }
                "C" => {
                    self.state.level += 1;
                    self.state.level_polarity = Polarity::Clear;
                }
                other => self.note(
                    line,
                    NoteKind::UnknownCommand,
                    format!("unknown level polarity `{other}`"),
                ),
            }
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("SR") {
            self.apply_step_repeat(rest, line);
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("IP") {
            match rest.trim() {
                "POS" => self.output.image_polarity = ImagePolarity::Positive,
                "NEG" => self.output.image_polarity = ImagePolarity::Negative,
                other => self.note(
                    line,
                    NoteKind::UnknownCommand,
                    format!("unknown image polarity `{other}`"),
                ),
            }
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("AB") {
            self.apply_aperture_block(rest, line);
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("TF") {
            let attribute = parse_attribute(AttributeScope::File, rest, line);
            self.output.attributes.push(attribute);
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("TA") {
            let attribute = parse_attribute(AttributeScope::Aperture, rest, line);
            self.output.attributes.push(attribute);
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("TO") {
            let attribute = parse_attribute(AttributeScope::Object, rest, line);
            self.pending_object_attrs.push(attribute);
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("TD") {
            let name = rest.trim();
            if name.is_empty() {
                self.pending_object_attrs.clear();
            } else {
                self.pending_object_attrs.retain(|attr| attr.name != name);
            }
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("IN") {
            self.output.comments.push(format!("image name: {rest}"));
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("LN") {
            self.output.comments.push(format!("level name: {rest}"));
            return Ok(());
        }

        self.note(
            line,
            NoteKind::UnknownCommand,
            format!("unrecognized parameter `{text}`"),
        );
        Ok(())
    }

    fn apply_format(&mut self, rest: &str, line: usize) -> Result<(), CamError> {
        if self.state.format.is_some() {
            return Err(CamError::Format(
                "FS coordinate format specified twice".to_string(),
            ));
        }

        let x_pos = rest
            .find('X')
            .ok_or_else(|| CamError::Format(format!("FS parameter `{rest}` missing X field")))?;
        let (flags, coords) = rest.split_at(x_pos);

        let mut suppression = ZeroSuppression::None;
        let mut notation = Notation::Absolute;
        for flag in flags.chars() {
            match flag {
                'L' => suppression = ZeroSuppression::Leading,
                'T' => suppression = ZeroSuppression::Trailing,
                'D' => suppression = ZeroSuppression::None,
                'A' => notation = Notation::Absolute,
                'I' => notation = Notation::Incremental,
                other => self.note(
                    line,
                    NoteKind::UnknownCommand,
                    format!("unknown FS flag `{other}`"),
                ),
            }
        }

        let bytes = coords.as_bytes();
        let digit = |index: usize| -> Option<u8> {
            bytes
                .get(index)
                .filter(|b| b.is_ascii_digit())
                .map(|b| b - b'0')
        };
        let (Some(x_int), Some(x_dec)) = (digit(1), digit(2)) else {
            return Err(CamError::Format(format!(
                "FS parameter `{rest}` has malformed X digits"
            )));
        };
        if bytes.get(3) != Some(&b'Y') {
            return Err(CamError::Format(format!(
                "FS parameter `{rest}` missing Y field"
            )));
        }
        let (Some(y_int), Some(y_dec)) = (digit(4), digit(5)) else {
            return Err(CamError::Format(format!(
                "FS parameter `{rest}` has malformed Y digits"
            )));
        };
        if (x_int, x_dec) != (y_int, y_dec) {
            self.note(
                line,
                NoteKind::Deprecated,
                format!("asymmetric FS digits {x_int}.{x_dec}/{y_int}.{y_dec}; using X"),
            );
        }

        self.state.format = Some(CoordinateFormat::new(x_int, x_dec, suppression, notation)?);
        Ok(())
    }

    fn apply_units(&mut self, rest: &str, line: usize) -> Result<(), CamError> {
        let units = match rest.trim() {
            "MM" => crate::model::Unit::Millimeters,
            "IN" => crate::model::Unit::Inches,
            other => {
                self.note(
                    line,
                    NoteKind::UnknownCommand,
                    format!("unknown unit mode `{other}`"),
                );
                return Ok(());
            }
        };
        if self.state.units.is_some() {
            return Err(CamError::Format("MO unit mode specified twice".to_string()));
        }
        self.state.units = Some(units);
        Ok(())
    }

    fn apply_aperture_definition(&mut self, rest: &str, line: usize) {
        match aperture::parse_definition(rest, &self.macros) {
            Ok((dcode, aperture)) => {
                if dcode < FIRST_USER_DCODE {
                    self.note(
                        line,
                        NoteKind::Deprecated,
                        format!("aperture D{dcode} uses a reserved D-code"),
                    );
                }
                if let Some(warning) = self.apertures.define(dcode, aperture) {
                    self.note(line, NoteKind::Redefinition, warning);
                }
            }
            Err(CamError::Macro(detail)) => {
                // The AD is lost but the stream remains decodable.
                self.note(line, NoteKind::UnknownCommand, detail);
            }
            Err(error) => {
                self.note(line, NoteKind::UnknownCommand, error.to_string());
            }
        }
    }

    fn apply_step_repeat(&mut self, rest: &str, line: usize) {
        // Close (and materialize) any open window first.
        if let Some(frame) = self.step_repeat.take() {
            self.materialize_step_repeat(frame);
        }
        if rest.trim().is_empty() {
            return;
        }

        let mut nx = 1u32;
        let mut ny = 1u32;
        let mut dx = 0.0f64;
        let mut dy = 0.0f64;
        let mut cursor = rest;
        let mut valid = true;
        while let Some(letter) = cursor.chars().next() {
            let tail = cursor.get(1..).unwrap_or_default();
            let value_end = tail
                .find(|c: char| c.is_ascii_alphabetic())
                .unwrap_or(tail.len());
            let (value_raw, next) = tail.split_at(value_end);
            match letter {
                'X' => nx = value_raw.parse().unwrap_or_else(|_| {
                    valid = false;
                    1
                }),
                'Y' => ny = value_raw.parse().unwrap_or_else(|_| {
                    valid = false;
                    1
                }),
                'I' => dx = parse_decimal(value_raw).unwrap_or_else(|_| {
                    valid = false;
                    0.0
                }),
                'J' => dy = parse_decimal(value_raw).unwrap_or_else(|_| {
                    valid = false;
                    0.0
                }),
                _ => valid = false,
            }
            cursor = next;
        }

        if !valid {
            self.note(
                line,
                NoteKind::UnknownCommand,
                format!("malformed step-repeat parameter `SR{rest}`"),
            );
            return;
        }

        self.step_repeat = Some(StepRepeatFrame {
            nx,
            ny,
            dx,
            dy,
            buffer: Vec::new(),
        });
    }

    fn materialize_step_repeat(&mut self, frame: StepRepeatFrame) {
        for iy in 0..frame.ny {
            for ix in 0..frame.nx {
                let offset_x = f64::from(ix) * frame.dx;
                let offset_y = f64::from(iy) * frame.dy;
                for primitive in &frame.buffer {
                    let copy = primitive.translated(offset_x, offset_y);
                    self.push_output(copy);
                }
            }
        }
    }

    fn apply_aperture_block(&mut self, rest: &str, line: usize) {
        let rest = rest.trim();
        if rest.is_empty() {
            let Some(frame) = self.block_stack.pop() else {
                self.note(
                    line,
                    NoteKind::UnknownCommand,
                    "AB close without an open aperture block",
                );
                return;
            };
            if let Some(warning) = self
                .apertures
                .define(frame.dcode, Aperture::Block { body: frame.body })
            {
                self.note(line, NoteKind::Redefinition, warning);
            }
            return;
        }

        let dcode = rest
            .strip_prefix('D')
            .and_then(|digits| digits.parse::<i32>().ok());
        let Some(dcode) = dcode else {
            self.note(
                line,
                NoteKind::UnknownCommand,
                format!("malformed aperture block open `AB{rest}`"),
            );
            return;
        };
        self.block_stack.push(BlockFrame {
            dcode,
            body: Vec::new(),
        });
    }

    fn process_function(&mut self, block: &DataBlock) -> Result<(), CamError> {
        let text = block.text.as_str();
        let line = block.line;

        if let Some(comment) = text.strip_prefix("G04") {
            self.output
                .comments
                .push(comment.trim_start().to_string());
            return Ok(());
        }

        let words = match parse_words(text) {
            Ok(words) => words,
            Err(detail) => {
                self.note(line, NoteKind::UnknownCommand, detail);
                return Ok(());
            }
        };

        if words.m_code == Some(2) {
            self.end_of_stream(line);
            return Ok(());
        }
        if let Some(m) = words.m_code {
            self.note(
                line,
                NoteKind::Deprecated,
                format!("program stop M{m:02} ignored"),
            );
            return Ok(());
        }

        let g_codes = words.g_codes.clone();
        for g_code in g_codes {
            self.apply_g_code(g_code, &words, line)?;
        }

        match words.d_code {
            Some(op @ 1..=3) => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let op = op as u8;
                self.state.last_op = Some(op);
                self.apply_operation(op, &words, line)?;
            }
            Some(dcode) if dcode >= FIRST_USER_DCODE => {
                self.state.current_aperture = Some(dcode);
            }
            Some(dcode) => {
                self.note(
                    line,
                    NoteKind::UnknownCommand,
                    format!("unsupported operation code D{dcode:02}"),
                );
            }
            None if words.has_coordinates() => {
                // Deprecated: coordinate block without an operation code
                // repeats the previous operation.
                if let Some(op) = self.state.last_op {
                    self.note(
                        line,
                        NoteKind::Deprecated,
                        format!("coordinate block without operation; repeating D{op:02}"),
                    );
                    self.apply_operation(op, &words, line)?;
                } else {
                    self.note(
                        line,
                        NoteKind::UnknownCommand,
                        "coordinate block before any operation code",
                    );
                }
            }
            None => {}
        }

        Ok(())
    }

    fn apply_g_code(&mut self, g_code: u16, words: &Words, line: usize) -> Result<(), CamError> {
        match g_code {
            // Short comment form; the long form is handled before word split.
            4 => {}
            1 => self.state.interpolation = Some(InterpolationMode::Linear),
            2 => self.state.interpolation = Some(InterpolationMode::ClockwiseArc),
            3 => self.state.interpolation = Some(InterpolationMode::CounterClockwiseArc),
            36 => {
                self.state.region_mode = true;
                self.contour.clear();
            }
            37 => {
                self.close_contour(line);
                self.state.region_mode = false;
            }
            74 => self.state.quadrant_mode = Some(QuadrantMode::Single),
            75 => self.state.quadrant_mode = Some(QuadrantMode::Multi),
            70 | 71 => {
                let units = if g_code == 70 {
                    crate::model::Unit::Inches
                } else {
                    crate::model::Unit::Millimeters
                };
                self.note(
                    line,
                    NoteKind::Deprecated,
                    format!("legacy unit code G{g_code}"),
                );
                if self.state.units.is_none() {
                    self.state.units = Some(units);
                }
            }
            90 | 91 => {
                let notation = if g_code == 90 {
                    Notation::Absolute
                } else {
                    Notation::Incremental
                };
                self.note(
                    line,
                    NoteKind::Deprecated,
                    format!("legacy notation code G{g_code}"),
                );
                if let Some(format) = self.state.format.as_mut() {
                    format.notation = notation;
                }
            }
            54 | 55 => {
                // Legacy aperture-select prefix; the D-code in the same
                // block does the real work.
                if words.d_code.is_none() {
                    self.note(
                        line,
                        NoteKind::Deprecated,
                        format!("G{g_code} without an aperture D-code"),
                    );
                }
            }
            other => self.note(
                line,
                NoteKind::UnknownCommand,
                format!("unknown function code G{other:02}"),
            ),
        }
        Ok(())
    }

    fn end_of_stream(&mut self, line: usize) {
        if self.state.region_mode {
            self.note(
                line,
                NoteKind::UnclosedRegion,
                "end of program inside region mode; contour dropped",
            );
            self.contour.clear();
            self.state.region_mode = false;
        }
        if let Some(frame) = self.step_repeat.take() {
            self.materialize_step_repeat(frame);
        }
        self.ended = true;
    }

    /// Decodes one axis word, retaining the previous value when absent.
    fn decode_axis(
        raw: Option<&String>,
        previous: f64,
        format: &CoordinateFormat,
    ) -> Result<f64, CamError> {
        let Some(raw) = raw else {
            return Ok(previous);
        };
        let value = parse_fixed(raw, format)?;
        Ok(match format.notation {
            Notation::Absolute => value,
            Notation::Incremental => previous + value,
        })
    }

    /// Decodes an I/J offset word (always a delta, zero when absent).
    fn decode_offset(raw: Option<&String>, format: &CoordinateFormat) -> Result<f64, CamError> {
        raw.map_or(Ok(0.0), |raw| parse_fixed(raw, format))
    }

    fn apply_operation(&mut self, op: u8, words: &Words, line: usize) -> Result<(), CamError> {
        let Some(format) = self.state.format else {
            return Err(CamError::Format(
                "coordinate data before FS format parameter".to_string(),
            ));
        };
        if self.state.units.is_none() {
            return Err(CamError::Format(
                "coordinate data before MO unit parameter".to_string(),
            ));
        }

        let start = self.state.current_point;
        let decoded = (|| -> Result<(Point, f64, f64), CamError> {
            let x = Self::decode_axis(words.x.as_ref(), start.x, &format)?;
            let y = Self::decode_axis(words.y.as_ref(), start.y, &format)?;
            let i = Self::decode_offset(words.i.as_ref(), &format)?;
            let j = Self::decode_offset(words.j.as_ref(), &format)?;
            Ok((Point::new(x, y), i, j))
        })();
        let (target, i_offset, j_offset) = match decoded {
            Ok(values) => values,
            Err(CamError::NumberOverflow(detail)) => {
                // The block is lost; the stream remains decodable.
                self.note(line, NoteKind::NumberOverflow, detail);
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        match op {
            1 => self.apply_draw(start, target, i_offset, j_offset, line),
            2 => {
                if self.state.region_mode {
                    self.close_contour(line);
                }
                self.state.current_point = target;
            }
            3 => self.apply_flash(target, line),
            _ => {}
        }
        Ok(())
    }

    fn interpolation_or_default(&mut self, line: usize) -> InterpolationMode {
        self.state.interpolation.map_or_else(
            || {
                self.note(
                    line,
                    NoteKind::Deprecated,
                    "draw before any interpolation mode; assuming linear",
                );
                self.state.interpolation = Some(InterpolationMode::Linear);
                InterpolationMode::Linear
            },
            |mode| mode,
        )
    }

    fn quadrant_or_default(&mut self, line: usize) -> QuadrantMode {
        self.state.quadrant_mode.map_or_else(
            || {
                self.note(
                    line,
                    NoteKind::Deprecated,
                    "arc before any quadrant mode; assuming multi-quadrant",
                );
                self.state.quadrant_mode = Some(QuadrantMode::Multi);
                QuadrantMode::Multi
            },
            |mode| mode,
        )
    }

    fn apply_draw(&mut self, start: Point, target: Point, i: f64, j: f64, line: usize) {
        let interpolation = self.interpolation_or_default(line);
        self.state.current_point = target;

        if self.state.region_mode {
            // Contours do not use the aperture; no resolution needed.
            let segment = if interpolation == InterpolationMode::Linear {
                Some(ContourSegment::Line { start, end: target })
            } else {
                let direction = direction_of(interpolation);
                self.resolve_arc_center(start, target, i, j, direction, line)
                    .map(|center| ContourSegment::Arc {
                        start,
                        end: target,
                        center,
                        direction,
                    })
            };
            if let Some(segment) = segment {
                self.contour.push(segment);
            }
            return;
        }

        let Some(dcode) = self.resolved_aperture(line) else {
            return;
        };

        let primitive = if interpolation == InterpolationMode::Linear {
            Some(Primitive::Line(Line {
                start,
                end: target,
                aperture: dcode,
                level: self.state.level,
                polarity: self.state.level_polarity,
            }))
        } else {
            let direction = direction_of(interpolation);
            let quadrant_mode = self.quadrant_or_default(line);
            self.resolve_arc_center(start, target, i, j, direction, line)
                .map(|center| {
                    Primitive::Arc(Arc {
                        start,
                        end: target,
                        center,
                        direction,
                        quadrant_mode,
                        aperture: dcode,
                        level: self.state.level,
                        polarity: self.state.level_polarity,
                    })
                })
        };
        if let Some(primitive) = primitive {
            self.emit(primitive);
        }
    }

    fn apply_flash(&mut self, target: Point, line: usize) {
        self.state.current_point = target;

        if self.state.region_mode {
            self.note(
                line,
                NoteKind::FlashInRegion,
                "flash inside region mode dropped",
            );
            return;
        }

        let Some(dcode) = self.resolved_aperture(line) else {
            return;
        };

        // Block apertures flash by materializing their body at the target.
        if let Some(Aperture::Block { body }) = self.apertures.lookup(dcode) {
            let copies: Vec<Primitive> = body
                .iter()
                .map(|primitive| primitive.translated(target.x, target.y))
                .collect();
            for copy in copies {
                self.emit(copy);
            }
            return;
        }

        self.emit(Primitive::Flash(Flash {
            position: target,
            aperture: dcode,
            level: self.state.level,
            polarity: self.state.level_polarity,
        }));
    }

    /// Resolves the current aperture for an emitting operation, noting and
    /// dropping when it is missing or undefined.
    fn resolved_aperture(&mut self, line: usize) -> Option<i32> {
        let Some(dcode) = self.state.current_aperture else {
            self.note(
                line,
                NoteKind::UndefinedAperture,
                "operation before any aperture selection",
            );
            return None;
        };
        if self.apertures.lookup(dcode).is_none() {
            self.note(
                line,
                NoteKind::UndefinedAperture,
                format!("aperture D{dcode} is not defined"),
            );
            return None;
        }
        Some(dcode)
    }

    /// Resolves an arc center from I/J offsets per the active quadrant mode.
    ///
    /// In single-quadrant mode the offsets are unsigned; all four sign
    /// combinations are tried and the one producing a valid <= 90 degree arc
    /// wins. Returns `None` (with a note) when no combination qualifies.
    fn resolve_arc_center(
        &mut self,
        start: Point,
        end: Point,
        i: f64,
        j: f64,
        direction: ArcDirection,
        line: usize,
    ) -> Option<Point> {
        let quadrant_mode = self.quadrant_or_default(line);
        if quadrant_mode == QuadrantMode::Multi {
            return Some(Point::new(start.x + i, start.y + j));
        }

        let tolerance = self.state.format.map_or(1e-6, |format| {
            10f64.powi(-(i32::from(format.decimal_digits) + 1))
        });

        let magnitude_i = i.abs();
        let magnitude_j = j.abs();
        let mut best: Option<(f64, f64, Point)> = None;
        for (sign_i, sign_j) in [(1.0f64, 1.0f64), (-1.0, 1.0), (1.0, -1.0), (-1.0, -1.0)] {
            let center = Point::new(
                sign_i.mul_add(magnitude_i, start.x),
                sign_j.mul_add(magnitude_j, start.y),
            );
            let radius_start = (start.x - center.x).hypot(start.y - center.y);
            let radius_end = (end.x - center.x).hypot(end.y - center.y);
            let mismatch = (radius_start - radius_end).abs();
            if mismatch > tolerance || radius_start <= f64::EPSILON {
                continue;
            }
            let start_angle = (start.y - center.y).atan2(start.x - center.x);
            let end_angle = (end.y - center.y).atan2(end.x - center.x);
            let sweep = sweep_between(start_angle, end_angle, direction);
            if sweep.abs() > FRAC_PI_2 + SWEEP_EPSILON {
                continue;
            }
            let candidate = (mismatch, sweep.abs(), center);
            let better = best.as_ref().is_none_or(|(best_mismatch, best_sweep, _)| {
                (mismatch, sweep.abs()) < (*best_mismatch, *best_sweep)
            });
            if better {
                best = Some(candidate);
            }
        }

        match best {
            Some((_, _, center)) => Some(center),
            None => {
                self.note(
                    line,
                    NoteKind::AmbiguousArc,
                    "no I/J sign combination yields a valid single-quadrant arc",
                );
                None
            }
        }
    }

    fn close_contour(&mut self, line: usize) {
        let mut segments = std::mem::take(&mut self.contour);
        if segments.is_empty() {
            return;
        }
        if segments.len() < 2 {
            self.note(
                line,
                NoteKind::UnclosedRegion,
                "degenerate region contour dropped",
            );
            return;
        }

        let first_start = segments.first().map(ContourSegment::start);
        let last_end = segments.last().map(ContourSegment::end);
        let (Some(first_start), Some(last_end)) = (first_start, last_end) else {
            return;
        };

        let tolerance = self
            .state
            .format
            .map_or(1e-6, |format| format.tolerance());
        let gap = (first_start.x - last_end.x)
            .abs()
            .max((first_start.y - last_end.y).abs());
        if gap > tolerance {
            self.note(
                line,
                NoteKind::UnclosedRegion,
                format!("region contour gap {gap} exceeds tolerance {tolerance}"),
            );
            return;
        }
        if gap > 0.0 {
            if let Some(last) = segments.last_mut() {
                last.set_end(first_start);
            }
        }

        self.emit(Primitive::Region(Region {
            segments,
            level: self.state.level,
            polarity: self.state.level_polarity,
        }));
    }

    /// Routes an emitted primitive to the innermost open frame.
    fn emit(&mut self, primitive: Primitive) {
        if let Some(frame) = self.block_stack.last_mut() {
            frame.body.push(primitive);
            return;
        }
        if let Some(frame) = self.step_repeat.as_mut() {
            frame.buffer.push(primitive);
            return;
        }
        self.push_output(primitive);
    }

    fn push_output(&mut self, primitive: Primitive) {
        if let Some(bounds) = primitive.bounding_box(self.apertures.map(), &self.output.tools) {
            self.output.stats.bounds.merge(&bounds);
        }
        let index = self.output.primitives.len();
        for mut attribute in self.pending_object_attrs.drain(..) {
            attribute.primitive = Some(index);
            self.output.attributes.push(attribute);
        }
        self.output.primitives.push(primitive);
    }

    fn finish(mut self) -> Result<CamFile, CamError> {
        self.finish_macro();

        if !self.ended {
            self.note(
                0,
                NoteKind::Deprecated,
                "stream ended without an M02 end-of-program",
            );
            self.end_of_stream(0);
        }
        if self.trailing_blocks > 0 {
            let count = self.trailing_blocks;
            let line = self.trailing_line;
            self.note(
                line,
                NoteKind::TrailingData,
                format!("{count} data block(s) after end of program"),
            );
        }
        while let Some(frame) = self.block_stack.pop() {
            self.note(
                0,
                NoteKind::UnknownCommand,
                format!(
                    "aperture block D{} never closed; {} primitive(s) dropped",
                    frame.dcode,
                    frame.body.len()
                ),
            );
        }

        self.output.stats.units = self.state.units;
        self.output.apertures = self.apertures.into_map();
        Ok(self.output)
    }
}

const fn direction_of(mode: InterpolationMode) -> ArcDirection {
    match mode {
        InterpolationMode::CounterClockwiseArc => ArcDirection::CounterClockwise,
        _ => ArcDirection::Clockwise,
    }
}

fn parse_attribute(scope: AttributeScope, body: &str, line: usize) -> Attribute {
    let mut parts = body.split(',');
    let name = parts.next().unwrap_or_default().trim().to_string();
    let values = parts.map(str::to_string).collect();
    Attribute {
        scope,
        name,
        values,
        line,
        primitive: None,
    }
}

impl Words {
    const fn has_coordinates(&self) -> bool {
        self.x.is_some() || self.y.is_some() || self.i.is_some() || self.j.is_some()
    }
}

/// Splits a command block into G/M/D words and raw coordinate fields.
fn parse_words(text: &str) -> Result<Words, String> {
    let mut words = Words::default();
    let mut rest = text;

    while let Some(letter) = rest.chars().next() {
        let tail = rest.get(1..).unwrap_or_default();
        let value_end = tail
            .find(|c: char| !c.is_ascii_digit() && c != '+' && c != '-')
            .unwrap_or(tail.len());
        let (value_raw, next) = tail.split_at(value_end);

        match letter {
            'G' => {
                let code = value_raw
                    .parse::<u16>()
                    .map_err(|_| format!("malformed G code in `{text}`"))?;
                words.g_codes.push(code);
            }
            'M' => {
                let code = value_raw
                    .parse::<u16>()
                    .map_err(|_| format!("malformed M code in `{text}`"))?;
                words.m_code = Some(code);
            }
            'D' => {
                let code = value_raw
                    .parse::<i32>()
                    .map_err(|_| format!("malformed D code in `{text}`"))?;
                words.d_code = Some(code);
            }
            'X' => words.x = Some(value_raw.to_string()),
            'Y' => words.y = Some(value_raw.to_string()),
            'I' => words.i = Some(value_raw.to_string()),
            'J' => words.j = Some(value_raw.to_string()),
            other => {
                return Err(format!("unexpected word `{other}` in `{text}`"));
            }
        }
        rest = next;
    }

    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn parse_ok(source: &str) -> CamFile {
        let parsed = parse(source.as_bytes());
        assert!(parsed.is_ok(), "expected Ok, got {:?}", parsed.err());
        parsed.unwrap_or_else(|_| CamFile::new(FileFormat::Gerber))
    }

    const HEADER: &str = "%FSLAX24Y24*%%MOMM*%";

    #[test]
    fn ut_gbr_001_minimal_flash_emits_circle_at_origin() {
        let file = parse_ok(&format!("{HEADER}%ADD10C,0.5*%D10*X0Y0D03*M02*"));
        assert_eq!(file.primitives.len(), 1);
        assert!(matches!(
            file.primitives.first(),
            Some(Primitive::Flash(Flash { aperture: 10, .. }))
        ));
        assert!((file.stats.bounds.min_x + 0.25).abs() < EPSILON);
        assert!((file.stats.bounds.max_x - 0.25).abs() < EPSILON);
        assert!((file.stats.bounds.min_y + 0.25).abs() < EPSILON);
        assert!((file.stats.bounds.max_y - 0.25).abs() < EPSILON);
    }

    #[test]
    fn ut_gbr_002_linear_draw_updates_current_point() {
        let file = parse_ok(&format!(
            "{HEADER}%ADD11C,0.1*%D11*X0Y0D02*X10000Y0D01*Y10000D01*M02*"
        ));
        assert_eq!(file.primitives.len(), 2);
        assert!(
            matches!(file.primitives.get(1), Some(Primitive::Line(_))),
            "second primitive should be a line"
        );
        if let Some(Primitive::Line(second)) = file.primitives.get(1) {
            assert!((second.start.x - 1.0).abs() < EPSILON);
            assert!((second.start.y - 0.0).abs() < EPSILON);
            assert!((second.end.x - 1.0).abs() < EPSILON);
            assert!((second.end.y - 1.0).abs() < EPSILON);
        }
    }

    #[test]
    fn ut_gbr_003_single_quadrant_arc_resolves_center() {
        let file = parse_ok(&format!(
            "{HEADER}%ADD10C,0.1*%D10*G02*G74*X10000Y10000D02*X20000Y20000I10000J0D01*M02*"
        ));
        assert_eq!(file.primitives.len(), 1);
        assert!(
            matches!(file.primitives.first(), Some(Primitive::Arc(_))),
            "expected an arc primitive"
        );
        if let Some(Primitive::Arc(arc)) = file.primitives.first() {
            assert!((arc.center.x - 2.0).abs() < EPSILON);
            assert!((arc.center.y - 1.0).abs() < EPSILON);
            assert_eq!(arc.direction, ArcDirection::Clockwise);
            assert_eq!(arc.quadrant_mode, QuadrantMode::Single);
        }
    }

    #[test]
    fn ut_gbr_004_region_contour_closes_exactly() {
        let file = parse_ok(&format!(
            "{HEADER}G36*X0Y0D02*X10000Y0D01*X10000Y10000D01*X0Y10000D01*X0Y0D01*G37*M02*"
        ));
        assert_eq!(file.primitives.len(), 1);
        assert!(
            matches!(file.primitives.first(), Some(Primitive::Region(_))),
            "expected a region primitive"
        );
        if let Some(Primitive::Region(region)) = file.primitives.first() {
            assert_eq!(region.segments.len(), 4);
            let first = region.segments.first().map(ContourSegment::start);
            let last = region.segments.last().map(ContourSegment::end);
            assert_eq!(first, last, "contour must close exactly");
        }
    }

    #[test]
    fn ut_gbr_005_step_repeat_duplicates_on_grid() {
        let file = parse_ok(&format!(
            "{HEADER}%ADD10C,0.5*%D10*%SRX2Y3I5.0J4.0*%X0Y0D03*%SR*%M02*"
        ));
        assert_eq!(file.primitives.len(), 6);
        let mut positions: Vec<(f64, f64)> = file
            .primitives
            .iter()
            .filter_map(|primitive| match primitive {
                Primitive::Flash(flash) => Some((flash.position.x, flash.position.y)),
                _ => None,
            })
            .collect();
        positions.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        assert_eq!(
            positions,
            vec![
                (0.0, 0.0),
                (0.0, 4.0),
                (0.0, 8.0),
                (5.0, 0.0),
                (5.0, 4.0),
                (5.0, 8.0)
            ]
        );
    }

    #[test]
    fn ut_gbr_006_level_polarity_stamps_primitives() {
        let file = parse_ok(&format!(
            "{HEADER}%ADD10C,0.5*%D10*X0Y0D03*%LPC*%X10000Y0D03*M02*"
        ));
        assert_eq!(file.primitives.len(), 2);
        assert!(matches!(
            file.primitives.first(),
            Some(Primitive::Flash(Flash {
                polarity: Polarity::Dark,
                level: 0,
                ..
            }))
        ));
        assert!(matches!(
            file.primitives.get(1),
            Some(Primitive::Flash(Flash {
                polarity: Polarity::Clear,
                level: 1,
                ..
            }))
        ));
    }

    #[test]
    fn ut_gbr_007_block_aperture_flash_descends() {
        let file = parse_ok(&format!(
            "{HEADER}%ADD10C,0.5*%%ABD12*%D10*X0Y0D03*X10000Y0D03*%AB*%D12*X20000Y20000D03*M02*"
        ));
        // The block body holds two flashes; flashing D12 materializes both
        // translated to (2, 2).
        assert_eq!(file.primitives.len(), 2);
        let positions: Vec<(f64, f64)> = file
            .primitives
            .iter()
            .filter_map(|primitive| match primitive {
                Primitive::Flash(flash) => Some((flash.position.x, flash.position.y)),
                _ => None,
            })
            .collect();
        assert_eq!(positions, vec![(2.0, 2.0), (3.0, 2.0)]);
        assert!(matches!(
            file.apertures.get(&12),
            Some(Aperture::Block { body }) if body.len() == 2
        ));
    }

    #[test]
    fn ut_gbr_008_object_attributes_attach_to_next_primitive() {
        let file = parse_ok(&format!(
            "{HEADER}%ADD10C,0.5*%D10*%TO.N,GND*%X0Y0D03*X10000Y0D03*M02*"
        ));
        let object_attrs: Vec<&Attribute> = file
            .attributes
            .iter()
            .filter(|attr| attr.scope == AttributeScope::Object)
            .collect();
        assert_eq!(object_attrs.len(), 1);
        assert_eq!(object_attrs.first().map(|attr| attr.primitive), Some(Some(0)));
        assert_eq!(
            object_attrs.first().map(|attr| attr.name.as_str()),
            Some(".N")
        );
    }

    #[test]
    fn bc_gbr_001_coordinate_before_fs_is_fatal() {
        let parsed = parse(b"%MOMM*%%ADD10C,0.5*%D10*X0Y0D03*M02*");
        assert!(matches!(parsed, Err(CamError::Format(_))));
    }

    #[test]
    fn bc_gbr_002_duplicate_fs_is_fatal() {
        let parsed = parse(b"%FSLAX24Y24*%%FSLAX24Y24*%M02*");
        assert!(matches!(parsed, Err(CamError::Format(_))));
    }

    #[test]
    fn bc_gbr_003_flash_in_region_is_dropped_with_note() {
        let file = parse_ok(&format!(
            "{HEADER}%ADD10C,0.5*%D10*G36*X0Y0D02*X10000Y0D01*X10000Y10000D03*X0Y0D01*G37*M02*"
        ));
        assert!(file
            .stats
            .notes
            .iter()
            .any(|note| note.kind == NoteKind::FlashInRegion));
        assert!(file
            .primitives
            .iter()
            .all(|primitive| !matches!(primitive, Primitive::Flash(_))));
    }

    #[test]
    fn bc_gbr_004_undefined_aperture_drops_emission() {
        let file = parse_ok(&format!("{HEADER}D42*X0Y0D02*X10000Y0D01*M02*"));
        assert!(file.primitives.is_empty());
        assert!(file
            .stats
            .notes
            .iter()
            .any(|note| note.kind == NoteKind::UndefinedAperture));
    }

    #[test]
    fn bc_gbr_005_trailing_data_after_m02_is_noted() {
        let file = parse_ok(&format!("{HEADER}%ADD10C,0.5*%D10*X0Y0D03*M02*X10000Y0D03*"));
        assert_eq!(file.primitives.len(), 1);
        assert!(file
            .stats
            .notes
            .iter()
            .any(|note| note.kind == NoteKind::TrailingData));
    }

    #[test]
    fn bc_gbr_006_unclosed_region_gap_drops_with_note() {
        let file = parse_ok(&format!(
            "{HEADER}G36*X0Y0D02*X10000Y0D01*X10000Y10000D01*G37*M02*"
        ));
        assert!(file.primitives.is_empty());
        assert!(file
            .stats
            .notes
            .iter()
            .any(|note| note.kind == NoteKind::UnclosedRegion));
    }

    #[test]
    fn bc_gbr_007_ambiguous_single_quadrant_arc_is_noted() {
        // End point not on any candidate circle.
        let file = parse_ok(&format!(
            "{HEADER}%ADD10C,0.1*%D10*G02*G74*X0Y0D02*X30000Y17500I10000J0D01*M02*"
        ));
        assert!(file.primitives.is_empty());
        assert!(file
            .stats
            .notes
            .iter()
            .any(|note| note.kind == NoteKind::AmbiguousArc));
    }

    #[test]
    fn bc_gbr_008_number_overflow_drops_block_and_continues() {
        let file = parse_ok(&format!(
            "{HEADER}%ADD10C,0.5*%D10*X123456789Y0D03*X10000Y0D03*M02*"
        ));
        assert_eq!(file.primitives.len(), 1);
        assert!(file
            .stats
            .notes
            .iter()
            .any(|note| note.kind == NoteKind::NumberOverflow));
    }

    #[test]
    fn bc_gbr_009_modal_operation_repeats_previous_draw() {
        let file = parse_ok(&format!(
            "{HEADER}%ADD10C,0.1*%D10*G01*X0Y0D02*X10000Y0D01*X20000Y0*M02*"
        ));
        assert_eq!(file.primitives.len(), 2);
        assert!(file
            .stats
            .notes
            .iter()
            .any(|note| note.kind == NoteKind::Deprecated));
    }

    #[test]
    fn bc_gbr_010_incremental_notation_accumulates() {
        let file = parse_ok(
            "%FSLIX24Y24*%%MOMM*%%ADD10C,0.1*%D10*X10000Y10000D02*X10000Y0D01*M02*",
        );
        assert_eq!(file.primitives.len(), 1);
        if let Some(Primitive::Line(line)) = file.primitives.first() {
            assert!((line.start.x - 1.0).abs() < EPSILON);
            assert!((line.end.x - 2.0).abs() < EPSILON);
            assert!((line.end.y - 1.0).abs() < EPSILON);
        }
    }
}
