//! Excellon dialect detection.
//!
//! Excellon has no single normative grammar: units, zero handling, and digit
//! widths are frequently implicit. The detector extracts what the header
//! declares and infers the rest from body coordinates, reporting how much of
//! the result is guesswork through [`Confidence`].

use crate::error::CamError;
use crate::excellon::reader::{Section, SourceLine};
use crate::gerber::format::{CoordinateFormat, Notation, ZeroSuppression};
use crate::model::Unit;

/// Plausible board window used when scoring candidate formats, in
/// millimeters of largest coordinate magnitude.
const MIN_PLAUSIBLE_MM: f64 = 1.0;
const MAX_PLAUSIBLE_MM: f64 = 600.0;

const MM_PER_INCH: f64 = 25.4;

/// How trustworthy the detected format is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// The file declared its format explicitly (`;FILE_FORMAT`).
    Declared,
    /// Units and zero handling were declared; digit widths are the
    /// conventional defaults (2:4 inch, 3:3 metric).
    Defaulted,
    /// Digit widths were inferred by scoring body coordinates.
    Inferred,
}

/// Detected coordinate format, units, and provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Decoding recipe for bare coordinate strings.
    pub format: CoordinateFormat,
    /// Measurement units.
    pub units: Unit,
    /// How the format was established.
    pub confidence: Confidence,
}

/// What the header actually said, before any guessing.
#[derive(Debug, Default)]
struct Declarations {
    units: Option<Unit>,
    suppression: Option<ZeroSuppression>,
    file_format: Option<(u8, u8)>,
    incremental: bool,
}

/// Detects the dialect of a tokenized Excellon file.
///
/// Priority order: an explicit `;FILE_FORMAT` comment wins; declared units
/// plus zero handling select the conventional defaults; otherwise body
/// coordinates are scored against a plausible board window.
///
/// # Errors
///
/// Returns [`CamError::UnknownDialect`] when nothing is declared and the
/// body is too short to score, and [`CamError::Format`] for declared digit
/// counts outside the supported range.
pub fn detect(lines: &[SourceLine]) -> Result<Dialect, CamError> {
    let declared = scan_declarations(lines);
    let notation = if declared.incremental {
        Notation::Incremental
    } else {
        Notation::Absolute
    };
    let units = declared.units.unwrap_or(Unit::Inches);
    // Excellon files default to keeping leading zeros, i.e. suppressing
    // trailing ones.
    let suppression = declared.suppression.unwrap_or(ZeroSuppression::Trailing);

    if let Some((integer_digits, decimal_digits)) = declared.file_format {
        return Ok(Dialect {
            format: CoordinateFormat::new(integer_digits, decimal_digits, suppression, notation)?,
            units,
            confidence: Confidence::Declared,
        });
    }

    if declared.units.is_some() && declared.suppression.is_some() {
        let (integer_digits, decimal_digits) = default_digits(units);
        return Ok(Dialect {
            format: CoordinateFormat::new(integer_digits, decimal_digits, suppression, notation)?,
            units,
            confidence: Confidence::Defaulted,
        });
    }

    let samples = coordinate_samples(lines);
    if samples.is_empty() {
        // Nothing to decode; defaults are as good as anything.
        let (integer_digits, decimal_digits) = default_digits(units);
        return Ok(Dialect {
            format: CoordinateFormat::new(integer_digits, decimal_digits, suppression, notation)?,
            units,
            confidence: Confidence::Defaulted,
        });
    }
    if samples.len() < 2 {
        return Err(CamError::UnknownDialect);
    }

    let format = infer_from_samples(&samples, units, suppression, notation)?;
    Ok(Dialect {
        format,
        units,
        confidence: Confidence::Inferred,
    })
}

/// Conventional digit widths per unit system.
pub const fn default_digits(units: Unit) -> (u8, u8) {
    match units {
        Unit::Inches => (2, 4),
        Unit::Millimeters => (3, 3),
    }
}

/// Maps an Excellon `LZ`/`TZ` token to the suppression the codec uses.
///
/// The header declares which zeros are *included*: `LZ` keeps leading zeros
/// (so trailing ones are suppressed) and `TZ` keeps trailing zeros.
pub const fn suppression_from_token(keeps_leading: bool) -> ZeroSuppression {
    if keeps_leading {
        ZeroSuppression::Trailing
    } else {
        ZeroSuppression::Leading
    }
}

fn scan_declarations(lines: &[SourceLine]) -> Declarations {
    let mut declared = Declarations::default();

    for line in lines {
        let upper = line.text.to_ascii_uppercase();

        if let Some(comment) = upper.strip_prefix(';') {
            if let Some(value) = comment.trim().strip_prefix("FILE_FORMAT=") {
                if let Some((integer_raw, decimal_raw)) = value.split_once(':') {
                    let parsed = integer_raw
                        .trim()
                        .parse::<u8>()
                        .and_then(|i| decimal_raw.trim().parse::<u8>().map(|d| (i, d)));
                    if let Ok(digits) = parsed {
                        declared.file_format = Some(digits);
                    }
                }
            }
            continue;
        }

        if upper.starts_with("INCH") || upper.starts_with("METRIC") {
            declared.units = Some(if upper.starts_with("METRIC") {
                Unit::Millimeters
            } else {
                Unit::Inches
            });
            if upper.contains(",LZ") {
                declared.suppression = Some(suppression_from_token(true));
            } else if upper.contains(",TZ") {
                declared.suppression = Some(suppression_from_token(false));
            }
            continue;
        }

        if upper.starts_with("ICI") {
            declared.incremental = upper.contains("ON");
        }
    }

    declared
}

/// Collects bare digit strings from body X/Y words (signs stripped, strings
/// with explicit decimal points skipped).
fn coordinate_samples(lines: &[SourceLine]) -> Vec<String> {
    let mut samples = Vec::new();
    for line in lines {
        if line.section != Section::Body || line.text.starts_with(';') {
            continue;
        }
        let upper = line.text.to_ascii_uppercase();
        if !upper.starts_with('X') && !upper.starts_with('Y') && !upper.starts_with("G0") {
            continue;
        }
        let mut rest = upper.as_str();
        while let Some(position) = rest.find(['X', 'Y']) {
            let tail = rest.get(position + 1..).unwrap_or_default();
            let end = tail
                .find(|c: char| !c.is_ascii_digit() && c != '+' && c != '-' && c != '.')
                .unwrap_or(tail.len());
            let word = tail.get(..end).unwrap_or_default();
            let digits = word.trim_start_matches(['+', '-']);
            if !digits.is_empty() && !digits.contains('.') {
                samples.push(digits.to_string());
            }
            rest = tail.get(end..).unwrap_or_default();
        }
    }
    samples
}

fn infer_from_samples(
    samples: &[String],
    units: Unit,
    suppression: ZeroSuppression,
    notation: Notation,
) -> Result<CoordinateFormat, CamError> {
    let width = samples.iter().map(String::len).max().unwrap_or(0);
    if width == 0 || width > 12 {
        return Err(CamError::UnknownDialect);
    }

    let to_mm = match units {
        Unit::Millimeters => 1.0,
        Unit::Inches => MM_PER_INCH,
    };

    let mut best: Option<(f64, u8, CoordinateFormat)> = None;
    for integer_digits in 1..=6u8 {
        let Some(decimal_digits) = width
            .checked_sub(usize::from(integer_digits))
            .and_then(|d| u8::try_from(d).ok())
        else {
            continue;
        };
        if decimal_digits > 6 {
            continue;
        }
        let Ok(candidate) =
            CoordinateFormat::new(integer_digits, decimal_digits, suppression, notation)
        else {
            continue;
        };

        let mut max_abs_mm: f64 = 0.0;
        let mut decodable = true;
        for sample in samples {
            match crate::gerber::format::parse_fixed(sample, &candidate) {
                Ok(value) => max_abs_mm = max_abs_mm.max(value.abs() * to_mm),
                Err(_) => {
                    decodable = false;
                    break;
                }
            }
        }
        if !decodable || !(MIN_PLAUSIBLE_MM..=MAX_PLAUSIBLE_MM).contains(&max_abs_mm) {
            continue;
        }

        // Smaller extent wins; ties prefer fewer decimal digits.
        let better = best.as_ref().is_none_or(|(best_extent, best_decimals, _)| {
            (max_abs_mm, decimal_digits) < (*best_extent, *best_decimals)
        });
        if better {
            best = Some((max_abs_mm, decimal_digits, candidate));
        }
    }

    best.map(|(_, _, format)| format)
        .ok_or(CamError::UnknownDialect)
}
