#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::indexing_slicing)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! `PcbCam` WASM module — RS-274X (Gerber) and Excellon CAM-file parsing.
//!
//! The crate decodes CAM byte streams into a normalized [`CamFile`]: an
//! ordered primitive list (draws, arcs, flashes, regions, drill hits, slots)
//! plus the aperture/tool dictionary, attributes, and parse notes. Rendering
//! and unit transforms are downstream concerns.

pub mod error;
pub mod excellon;
pub mod gerber;
pub mod model;

use wasm_bindgen::prelude::*;

use crate::error::CamError;
use crate::model::{CamFile, FileFormat};

/// How many leading bytes the format sniffer inspects.
const SNIFF_WINDOW: usize = 4096;

/// Initialize the WASM module. Sets up the panic hook for debugging.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

/// Smoke-test export. Returns 42.
#[allow(clippy::missing_const_for_fn)]
#[wasm_bindgen]
pub fn ping() -> u32 {
    42
}

/// Detects whether a byte stream is Gerber or Excellon.
///
/// Gerber is recognized by `%FS`/`%MO`/`%AD` parameters near the start of
/// the stream; Excellon by `M48` or tool-definition lines. When neither
/// matches, the caller-supplied filename hint decides.
///
/// # Errors
///
/// Returns [`CamError::UnknownFormat`] when content and hint both fail.
pub fn detect_format(data: &[u8], filename_hint: Option<&str>) -> Result<FileFormat, CamError> {
    let window = data.get(..data.len().min(SNIFF_WINDOW)).unwrap_or(data);
    let text = String::from_utf8_lossy(window);

    if text.contains("%FS") || text.contains("%MO") || text.contains("%AD") {
        return Ok(FileFormat::Gerber);
    }
    if text.contains("M48") || text.lines().any(is_tool_definition_line) {
        return Ok(FileFormat::Excellon);
    }

    if let Some(hint) = filename_hint {
        let extension = hint.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
        match extension.as_str() {
            "gbr" | "gtl" | "gbl" | "gts" | "gbs" | "gto" | "gbo" | "gko" | "gml" | "pho" => {
                return Ok(FileFormat::Gerber);
            }
            "drl" | "drd" | "txt" | "xln" | "exc" | "ncd" => {
                return Ok(FileFormat::Excellon);
            }
            _ => {}
        }
    }

    Err(CamError::UnknownFormat)
}

/// True for lines shaped like `T<n>C<diameter>` Excellon tool definitions.
fn is_tool_definition_line(line: &str) -> bool {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('T') else {
        return false;
    };
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    digits_end > 0 && rest.get(digits_end..).unwrap_or_default().starts_with('C')
}

/// Parses a CAM byte stream, auto-detecting its format.
///
/// # Errors
///
/// Returns [`CamError::UnknownFormat`] when the format cannot be detected,
/// or the underlying interpreter's fatal error.
pub fn parse_bytes(data: &[u8], filename_hint: Option<&str>) -> Result<CamFile, CamError> {
    match detect_format(data, filename_hint)? {
        FileFormat::Gerber => gerber::parse(data),
        FileFormat::Excellon => excellon::parse(data),
    }
}

fn to_js(result: Result<CamFile, CamError>) -> Result<JsValue, JsValue> {
    let file = result.map_err(|error| JsValue::from_str(&error.to_string()))?;
    serde_wasm_bindgen::to_value(&file).map_err(|error| JsValue::from_str(&error.to_string()))
}

/// Parse a Gerber RS-274X file from raw bytes.
///
/// Returns the full decoded `CamFile` as a `JsValue` via
/// `serde-wasm-bindgen`: primitives in draw order, the aperture dictionary,
/// attributes, and accumulated notes.
///
/// # Errors
///
/// Returns a descriptive error string if parsing fails fatally.
#[wasm_bindgen]
pub fn parse_gerber(data: &[u8]) -> Result<JsValue, JsValue> {
    to_js(gerber::parse(data))
}

/// Parse an Excellon drill file from raw bytes.
///
/// Returns the full decoded `CamFile` as a `JsValue`, including the tool
/// table and any dialect-inference notes.
///
/// # Errors
///
/// Returns a descriptive error string if parsing fails fatally.
#[wasm_bindgen]
pub fn parse_excellon(data: &[u8]) -> Result<JsValue, JsValue> {
    to_js(excellon::parse(data))
}

/// Parse a CAM file of either format, auto-detecting from the content and
/// an optional filename hint.
///
/// # Errors
///
/// Returns a descriptive error string when the format is unrecognized or
/// parsing fails fatally.
#[wasm_bindgen]
pub fn parse_auto(data: &[u8], filename_hint: Option<String>) -> Result<JsValue, JsValue> {
    to_js(parse_bytes(data, filename_hint.as_deref()))
}


#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn wasm_ping_returns_42() {
        assert_eq!(ping(), 42);
    }
}
