//! Fixed-point coordinate codec.
//!
//! Gerber and Excellon coordinate fields are bare digit strings whose value
//! depends on the declared digit widths and zero-suppression mode. This
//! module reconstructs rationals from those strings and re-encodes them for
//! round-trip checks.

use serde::Serialize;

use crate::error::CamError;

/// Maximum digits on either side of the implied decimal point.
pub const MAX_FIELD_DIGITS: u8 = 6;

/// Which zeros a file omits from coordinate fields.
///
/// This is the Gerber-file convention (which zeros are *suppressed*).
/// Excellon headers declare which zeros are *included*; the Excellon reader
/// flips the token before it gets here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ZeroSuppression {
    /// Leading zeros omitted: right-align and left-pad.
    Leading,
    /// Trailing zeros omitted: left-align and right-pad.
    Trailing,
    /// All digits present; field width must match exactly.
    None,
}

/// Coordinate notation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Notation {
    /// Coordinates are absolute positions.
    Absolute,
    /// Coordinates are deltas from the current point (deprecated).
    Incremental,
}

/// The decoding recipe for bare coordinate strings.
///
/// Set once per file (`FS` in Gerber, header or inference in Excellon) and
/// fixed for the remainder of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoordinateFormat {
    /// Digits before the implied decimal point (1..=6).
    pub integer_digits: u8,
    /// Digits after the implied decimal point (0..=6).
    pub decimal_digits: u8,
    /// Zero-suppression mode.
    pub zero_suppression: ZeroSuppression,
    /// Absolute or incremental notation.
    pub notation: Notation,
}

impl CoordinateFormat {
    /// Creates a format, validating digit ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CamError::Format`] when `integer_digits` is outside 1..=6 or
    /// `decimal_digits` is outside 0..=6.
    pub fn new(
        integer_digits: u8,
        decimal_digits: u8,
        zero_suppression: ZeroSuppression,
        notation: Notation,
    ) -> Result<Self, CamError> {
        if integer_digits == 0 || integer_digits > MAX_FIELD_DIGITS {
            return Err(CamError::Format(format!(
                "integer digit count {integer_digits} outside 1..=6"
            )));
        }
        if decimal_digits > MAX_FIELD_DIGITS {
            return Err(CamError::Format(format!(
                "decimal digit count {decimal_digits} outside 0..=6"
            )));
        }
        Ok(Self {
            integer_digits,
            decimal_digits,
            zero_suppression,
            notation,
        })
    }

    /// Total field width in digits.
    pub const fn width(&self) -> usize {
        self.integer_digits as usize + self.decimal_digits as usize
    }

    /// One least-significant-digit step; coordinate comparisons use this as
    /// their equality tolerance.
    pub fn tolerance(&self) -> f64 {
        10f64.powi(-i32::from(self.decimal_digits))
    }
}

/// Decodes a fixed-point coordinate string under `format`.
///
/// Strings containing an explicit decimal point (seen in Excellon bodies and
/// parameter fields) bypass the fixed-point rules entirely.
///
/// # Errors
///
/// Returns [`CamError::NumberOverflow`] when the digit count exceeds the
/// field width (or mismatches it, for [`ZeroSuppression::None`]), and
/// [`CamError::Parse`] for empty or non-numeric input.
pub fn parse_fixed(raw: &str, format: &CoordinateFormat) -> Result<f64, CamError> {
    if raw.contains('.') {
        return parse_decimal(raw);
    }

    let (sign, digits) = split_sign(raw);
    if digits.is_empty() {
        return Err(CamError::Parse("empty coordinate field".to_string()));
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CamError::Parse(format!("invalid coordinate field `{raw}`")));
    }

    let width = format.width();
    if digits.len() > width {
        return Err(CamError::NumberOverflow(format!(
            "`{raw}` has {} digits but the format allows {width}",
            digits.len()
        )));
    }
    // Zero is always written as a bare "0", even without suppression.
    if format.zero_suppression == ZeroSuppression::None
        && digits.len() != width
        && digits != "0"
    {
        return Err(CamError::NumberOverflow(format!(
            "`{raw}` has {} digits but the format requires exactly {width}",
            digits.len()
        )));
    }

    let padded = match format.zero_suppression {
        ZeroSuppression::Leading | ZeroSuppression::None => format!("{digits:0>width$}"),
        ZeroSuppression::Trailing => format!("{digits:0<width$}"),
    };

    let (int_part, frac_part) = padded.split_at(usize::from(format.integer_digits));
    let assembled = format!("{int_part}.{frac_part}");
    let magnitude: f64 = assembled
        .parse()
        .map_err(|_| CamError::Parse(format!("invalid coordinate field `{raw}`")))?;
    Ok(sign * magnitude)
}

/// Encodes a value back into the fixed-point representation.
///
/// Inverse of [`parse_fixed`] up to zero-suppression re-canonicalization;
/// zero always encodes as `"0"`.
///
/// # Errors
///
/// Returns [`CamError::NumberOverflow`] when the integer part does not fit
/// the format's integer digit count.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_fixed(value: f64, format: &CoordinateFormat) -> Result<String, CamError> {
    let negative = value < 0.0;
    let scale = 10f64.powi(i32::from(format.decimal_digits));
    let scaled = (value.abs() * scale).round();

    let limit = 10f64.powi(i32::try_from(format.width()).unwrap_or(i32::MAX));
    if scaled >= limit {
        return Err(CamError::NumberOverflow(format!(
            "{value} does not fit a {}:{} field",
            format.integer_digits, format.decimal_digits
        )));
    }

    let width = format.width();
    let digits = format!("{:0width$}", scaled as u64);

    let trimmed = match format.zero_suppression {
        ZeroSuppression::Leading => digits.trim_start_matches('0'),
        ZeroSuppression::Trailing => digits.trim_end_matches('0'),
        ZeroSuppression::None => digits.as_str(),
    };
    if trimmed.is_empty() || trimmed.bytes().all(|b| b == b'0') {
        return Ok("0".to_string());
    }
    Ok(if negative {
        format!("-{trimmed}")
    } else {
        trimmed.to_string()
    })
}

/// Parses a decimal-point number as found in parameter fields, macro
/// arguments, and `;FILE_FORMAT` comments.
///
/// # Errors
///
/// Returns [`CamError::Parse`] for non-numeric input.
pub fn parse_decimal(raw: &str) -> Result<f64, CamError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| CamError::Parse(format!("invalid decimal value `{raw}`")))
}

fn split_sign(raw: &str) -> (f64, &str) {
    match (raw.strip_prefix('-'), raw.strip_prefix('+')) {
        (Some(rest), _) => (-1.0, rest),
        (None, Some(rest)) => (1.0, rest),
        (None, None) => (1.0, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn fmt(i: u8, d: u8, z: ZeroSuppression) -> CoordinateFormat {
        CoordinateFormat {
            integer_digits: i,
            decimal_digits: d,
            zero_suppression: z,
            notation: Notation::Absolute,
        }
    }

    fn assert_parses(raw: &str, format: &CoordinateFormat, expected: f64) {
        let parsed = parse_fixed(raw, format);
        assert!(parsed.is_ok(), "`{raw}` should parse");
        if let Ok(value) = parsed {
            assert!(
                (value - expected).abs() < EPSILON,
                "`{raw}` => {value}, expected {expected}"
            );
        }
    }

    #[test]
    fn ut_fmt_001_leading_suppression_left_pads() {
        let format = fmt(2, 4, ZeroSuppression::Leading);
        assert_parses("1500", &format, 0.15);
        assert_parses("10000", &format, 1.0);
        assert_parses("-1500", &format, -0.15);
    }

    #[test]
    fn ut_fmt_002_trailing_suppression_right_pads() {
        let format = fmt(2, 4, ZeroSuppression::Trailing);
        assert_parses("15", &format, 15.0);
        assert_parses("015", &format, 1.5);
        assert_parses("-0015", &format, -0.15);
    }

    #[test]
    fn ut_fmt_003_no_suppression_requires_exact_width() {
        let format = fmt(2, 3, ZeroSuppression::None);
        assert_parses("12345", &format, 12.345);
        assert!(matches!(
            parse_fixed("1234", &format),
            Err(CamError::NumberOverflow(_))
        ));
    }

    #[test]
    fn ut_fmt_004_plus_sign_is_accepted() {
        let format = fmt(2, 4, ZeroSuppression::Leading);
        assert_parses("+1500", &format, 0.15);
    }

    #[test]
    fn ut_fmt_005_explicit_decimal_bypasses_format() {
        let format = fmt(2, 4, ZeroSuppression::Leading);
        assert_parses("3.25", &format, 3.25);
        assert_parses("-0.5", &format, -0.5);
    }

    #[test]
    fn ut_fmt_006_round_trip_over_sample_grid() {
        let formats = [
            fmt(2, 4, ZeroSuppression::Leading),
            fmt(2, 4, ZeroSuppression::Trailing),
            fmt(3, 3, ZeroSuppression::Leading),
            fmt(2, 5, ZeroSuppression::Trailing),
            fmt(4, 2, ZeroSuppression::None),
        ];
        let values = [0.0, 0.15, -0.15, 1.0, -7.5, 12.34, 99.99];
        for format in &formats {
            for &value in &values {
                let encoded = format_fixed(value, format);
                assert!(encoded.is_ok(), "{value} should encode");
                let Ok(encoded) = encoded else {
                    continue;
                };
                let decoded = parse_fixed(&encoded, format);
                assert!(decoded.is_ok(), "`{encoded}` should decode");
                if let Ok(decoded) = decoded {
                    assert!(
                        (decoded - value).abs() < format.tolerance(),
                        "{value} -> `{encoded}` -> {decoded} under {format:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn ut_fmt_007_zero_always_encodes_as_single_digit() {
        let format = fmt(2, 4, ZeroSuppression::Trailing);
        assert_eq!(format_fixed(0.0, &format).ok().as_deref(), Some("0"));
    }

    #[test]
    fn bc_fmt_001_overlong_field_overflows() {
        let format = fmt(2, 4, ZeroSuppression::Leading);
        assert!(matches!(
            parse_fixed("1234567", &format),
            Err(CamError::NumberOverflow(_))
        ));
    }

    #[test]
    fn bc_fmt_002_garbage_field_is_a_parse_error() {
        let format = fmt(2, 4, ZeroSuppression::Leading);
        assert!(matches!(
            parse_fixed("12a4", &format),
            Err(CamError::Parse(_))
        ));
        assert!(matches!(parse_fixed("", &format), Err(CamError::Parse(_))));
    }

    #[test]
    fn bc_fmt_003_format_validation_rejects_out_of_range_digits() {
        assert!(CoordinateFormat::new(0, 4, ZeroSuppression::Leading, Notation::Absolute).is_err());
        assert!(CoordinateFormat::new(7, 4, ZeroSuppression::Leading, Notation::Absolute).is_err());
        assert!(CoordinateFormat::new(2, 7, ZeroSuppression::Leading, Notation::Absolute).is_err());
        assert!(CoordinateFormat::new(2, 0, ZeroSuppression::Leading, Notation::Absolute).is_ok());
    }

    #[test]
    fn bc_fmt_004_encode_overflow_is_reported() {
        let format = fmt(2, 4, ZeroSuppression::Leading);
        assert!(matches!(
            format_fixed(123.0, &format),
            Err(CamError::NumberOverflow(_))
        ));
    }
}
